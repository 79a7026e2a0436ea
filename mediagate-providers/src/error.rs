//! Shared provider client error types
//!
//! Common error enum and utilities used by all provider clients.

use thiserror::Error;

/// Common error type for all provider HTTP clients.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error {status} for {url}")]
    Http {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("API error (code {code}): {message}")]
    Api { code: u64, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited by remote service")]
    RateLimited,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
}

impl ProviderError {
    /// Whether a retry is worthwhile (transient network or 5xx/429).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited => true,
            Self::Http { status, .. } => status.is_server_error(),
            _ => false,
        }
    }

    /// Whether the remote authoritatively reported the resource missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Http { status, .. } => *status == reqwest::StatusCode::NOT_FOUND,
            _ => false,
        }
    }
}

/// Check HTTP response status before processing the body.
///
/// 404 and 429 are mapped to their dedicated variants so callers can apply
/// the data-cleanup and quota policies without string matching.
pub fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound(resp.url().to_string()));
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited);
    }
    if status.is_client_error() || status.is_server_error() {
        return Err(ProviderError::Http {
            status,
            url: resp.url().to_string(),
        });
    }
    Ok(resp)
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for ProviderError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Network("connection reset".into()).is_transient());
        assert!(ProviderError::RateLimited.is_transient());
        assert!(ProviderError::Http {
            status: reqwest::StatusCode::BAD_GATEWAY,
            url: "http://x".into()
        }
        .is_transient());
        assert!(!ProviderError::Auth("bad token".into()).is_transient());
        assert!(!ProviderError::NotFound("gone".into()).is_transient());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(ProviderError::NotFound("x".into()).is_not_found());
        assert!(!ProviderError::RateLimited.is_not_found());
    }
}
