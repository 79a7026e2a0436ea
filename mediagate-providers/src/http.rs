//! Shared HTTP client construction
//!
//! All outbound clients share connection pooling and carry the same
//! user-agent. Redirects are disabled to prevent SSRF via redirect to
//! private IPs.

use std::time::Duration;

use reqwest::Client;

/// Product user-agent sent on every outbound request.
pub const USER_AGENT: &str = concat!("MediaGate/", env!("CARGO_PKG_VERSION"));

/// Default per-call timeout for catalog and metadata providers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-call timeout for AI chat completions.
pub const AI_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-call timeout for long-list LLM recommendations.
pub const AI_RECOMMENDATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Build a pooled client with the given per-call timeout.
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client() {
        let client = build_client(DEFAULT_TIMEOUT);
        assert!(client.is_ok());
    }

    #[test]
    fn test_user_agent_has_version() {
        assert!(USER_AGENT.starts_with("MediaGate/"));
        assert!(USER_AGENT.len() > "MediaGate/".len());
    }
}
