//! Downloader HTTP client
//!
//! Auth is a form login that yields a bearer token; the token is fetched per
//! call because the downloader invalidates sessions aggressively.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::error::{check_response, ProviderError};
use crate::http::build_client;

/// A subscription request. `media_type` uses the downloader's own labels
/// (`电影` for movies, `电视剧` for series). `best_version = 1` marks a
/// quality-upgrade request.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub name: String,
    pub tmdbid: i64,
    #[serde(rename = "type")]
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_version: Option<i32>,
}

impl SubscribeRequest {
    #[must_use]
    pub fn movie(name: impl Into<String>, tmdb_id: i64) -> Self {
        Self {
            name: name.into(),
            tmdbid: tmdb_id,
            media_type: "电影".to_string(),
            season: None,
            best_version: None,
        }
    }

    #[must_use]
    pub fn series(name: impl Into<String>, tmdb_id: i64, season: Option<i64>) -> Self {
        Self {
            name: name.into(),
            tmdbid: tmdb_id,
            media_type: "电视剧".to_string(),
            season,
            best_version: None,
        }
    }

    #[must_use]
    pub const fn with_best_version(mut self) -> Self {
        self.best_version = Some(1);
        self
    }
}

#[derive(Clone)]
pub struct MoviePilotClient {
    base_url: String,
    username: String,
    password: String,
    client: Client,
}

impl MoviePilotClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let username = username.into();
        if base_url.is_empty() || username.is_empty() {
            return Err(ProviderError::InvalidConfig(
                "downloader url or username is empty".to_string(),
            ));
        }
        Ok(Self {
            base_url,
            username,
            password: password.into(),
            client: build_client(timeout)?,
        })
    }

    async fn login(&self) -> Result<String, ProviderError> {
        let url = format!("{}/api/v1/login/access-token", self.base_url);
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;
        let resp = check_response(resp)?;
        let body: Value = resp.json().await?;
        body.get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Auth("downloader returned no access token".to_string()))
    }

    /// Submit a subscription. 200/201/204 all count as accepted.
    pub async fn subscribe(&self, request: &SubscribeRequest) -> Result<(), ProviderError> {
        let token = self.login().await?;
        let url = format!("{}/api/v1/subscribe/", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            tracing::info!(name = %request.name, tmdb_id = request.tmdbid, "downloader accepted subscription");
            Ok(())
        } else {
            let text = resp.text().await.unwrap_or_default();
            Err(ProviderError::Api {
                code: u64::from(status.as_u16()),
                message: format!("subscribe rejected: {text}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_subscribe_request_shapes() {
        let movie = SubscribeRequest::movie("沙丘", 438631);
        let v = serde_json::to_value(&movie).expect("serialize");
        assert_eq!(v["type"], "电影");
        assert!(v.get("season").is_none());
        assert!(v.get("best_version").is_none());

        let season = SubscribeRequest::series("漫长的季节", 224535, Some(2)).with_best_version();
        let v = serde_json::to_value(&season).expect("serialize");
        assert_eq!(v["type"], "电视剧");
        assert_eq!(v["season"], 2);
        assert_eq!(v["best_version"], 1);
    }

    #[tokio::test]
    async fn test_subscribe_logs_in_then_posts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/login/access-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/subscribe/"))
            .and(wiremock::matchers::header("authorization", "Bearer tok"))
            .and(body_json(serde_json::json!({
                "name": "沙丘", "tmdbid": 438631, "type": "电影"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = MoviePilotClient::new(server.uri(), "admin", "pw", Duration::from_secs(5))
            .expect("client builds");
        client
            .subscribe(&SubscribeRequest::movie("沙丘", 438631))
            .await
            .expect("accepted");
    }

    #[tokio::test]
    async fn test_missing_token_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/login/access-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = MoviePilotClient::new(server.uri(), "admin", "pw", Duration::from_secs(5))
            .expect("client builds");
        let err = client
            .subscribe(&SubscribeRequest::movie("X", 1))
            .await
            .expect_err("no token");
        assert!(matches!(err, ProviderError::Auth(_)));
    }
}
