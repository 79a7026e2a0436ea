//! Cultural Provider HTTP client
//!
//! Acting credits are keyed by IMDb ID when available, falling back to a
//! title/year search on the provider side.

use std::time::Duration;

use reqwest::Client;

use crate::error::{check_response, ProviderError};
use crate::http::build_client;

use super::types::{ActingResponse, CelebrityDetails, CulturalActor};

#[derive(Clone)]
pub struct DoubanClient {
    base_url: String,
    cookie: Option<String>,
    client: Client,
}

impl DoubanClient {
    pub fn new(
        base_url: impl Into<String>,
        cookie: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cookie,
            client: build_client(timeout)?,
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(cookie) = &self.cookie {
            req = req.header(reqwest::header::COOKIE, cookie);
        }
        req
    }

    /// Fetch the acting credits for a media item.
    ///
    /// `mtype` is `"movie"` or `"tv"`. IMDb ID takes precedence; the
    /// explicit cultural ID overrides both when present.
    pub async fn get_acting(
        &self,
        name: &str,
        imdb_id: Option<&str>,
        mtype: Option<&str>,
        year: Option<&str>,
        cultural_id: Option<&str>,
    ) -> Result<Vec<CulturalActor>, ProviderError> {
        let url = format!("{}/acting", self.base_url);
        let mut query: Vec<(&str, String)> = vec![("q", name.to_string())];
        if let Some(id) = imdb_id {
            query.push(("imdbid", id.to_string()));
        }
        if let Some(t) = mtype {
            query.push(("type", t.to_string()));
        }
        if let Some(y) = year {
            query.push(("year", y.to_string()));
        }
        if let Some(id) = cultural_id {
            query.push(("id", id.to_string()));
        }

        let resp = self.request(&url).query(&query).send().await?;
        let resp = check_response(resp)?;
        let body: ActingResponse = resp.json().await?;
        Ok(body.cast)
    }

    /// Per-person details by celebrity ID.
    pub async fn celebrity_details(
        &self,
        celebrity_id: &str,
    ) -> Result<CelebrityDetails, ProviderError> {
        let url = format!("{}/celebrity/{celebrity_id}", self.base_url);
        let resp = self.request(&url).send().await?;
        let resp = check_response(resp)?;
        Ok(resp.json().await?)
    }

    /// Scrape a remote list page, returning `(title, optional imdb id)`
    /// pairs. The provider renders these as JSON when asked politely.
    pub async fn list_items(
        &self,
        list_url: &str,
        start: i64,
    ) -> Result<serde_json::Value, ProviderError> {
        let resp = self
            .request(list_url)
            .query(&[("start", start.to_string())])
            .send()
            .await?;
        let resp = check_response(resp)?;
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_acting_prefers_imdb_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acting"))
            .and(query_param("imdbid", "tt0473692"))
            .and(query_param("type", "tv"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cast": [{"id": "1", "name": "张译", "character": "饰 秦昊"}]
            })))
            .mount(&server)
            .await;

        let client = DoubanClient::new(server.uri(), None, Duration::from_secs(5))
            .expect("client builds");
        let cast = client
            .get_acting("漫长的季节", Some("tt0473692"), Some("tv"), Some("2023"), None)
            .await
            .expect("ok");
        assert_eq!(cast[0].name, "张译");
    }

    #[tokio::test]
    async fn test_cookie_header_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/celebrity/1274297"))
            .and(wiremock::matchers::header("cookie", "bid=x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "1274297", "name": "周迅"
            })))
            .mount(&server)
            .await;

        let client = DoubanClient::new(server.uri(), Some("bid=x".into()), Duration::from_secs(5))
            .expect("client builds");
        let details = client.celebrity_details("1274297").await.expect("ok");
        assert_eq!(details.name, "周迅");
    }
}
