//! Metadata Provider HTTP client
//!
//! Paged endpoints (`list`, `discover`, person iteration) are finite
//! sequences bounded by the reported total page count and restartable from
//! any page.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::error::{check_response, ProviderError};
use crate::http::build_client;

use super::types::{
    CombinedCredits, ListPage, MovieDetails, PagedResponse, PersonDetails, SearchResult,
    SeasonDetails, TvDetails,
};

#[derive(Clone)]
pub struct TmdbClient {
    base_url: String,
    api_key: String,
    language: String,
    client: Client,
}

impl TmdbClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        language: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ProviderError::InvalidConfig(
                "metadata provider api key is empty".to_string(),
            ));
        }
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            language: language.into(),
            client: build_client(timeout)?,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let mut full_query: Vec<(&str, String)> = vec![
            ("api_key", self.api_key.clone()),
            ("language", self.language.clone()),
        ];
        full_query.extend_from_slice(query);

        let send = || async {
            let resp = self
                .client
                .get(&url)
                .query(&full_query)
                .send()
                .await
                .map_err(ProviderError::from)?;
            let resp = check_response(resp)?;
            resp.json::<T>().await.map_err(ProviderError::from)
        };

        send.retry(
            ExponentialBuilder::default()
                .with_max_times(3)
                .with_min_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(5)),
        )
        .when(ProviderError::is_transient)
        .await
    }

    pub async fn movie_details(
        &self,
        movie_id: i64,
        append: Option<&str>,
    ) -> Result<MovieDetails, ProviderError> {
        let mut query = Vec::new();
        if let Some(a) = append {
            query.push(("append_to_response", a.to_string()));
        }
        self.get_json(&format!("/movie/{movie_id}"), &query).await
    }

    pub async fn tv_details(
        &self,
        tv_id: i64,
        append: Option<&str>,
    ) -> Result<TvDetails, ProviderError> {
        let mut query = Vec::new();
        if let Some(a) = append {
            query.push(("append_to_response", a.to_string()));
        }
        self.get_json(&format!("/tv/{tv_id}"), &query).await
    }

    pub async fn season_details(
        &self,
        tv_id: i64,
        season_number: i64,
    ) -> Result<SeasonDetails, ProviderError> {
        self.get_json(&format!("/tv/{tv_id}/season/{season_number}"), &[])
            .await
    }

    pub async fn person_details(
        &self,
        person_id: i64,
        append: Option<&str>,
    ) -> Result<PersonDetails, ProviderError> {
        let mut query = Vec::new();
        if let Some(a) = append {
            query.push(("append_to_response", a.to_string()));
        }
        self.get_json(&format!("/person/{person_id}"), &query).await
    }

    pub async fn person_combined_credits(
        &self,
        person_id: i64,
    ) -> Result<CombinedCredits, ProviderError> {
        self.get_json(&format!("/person/{person_id}/combined_credits"), &[])
            .await
    }

    /// Search movies or TV. `kind` is `"movie"` or `"tv"`.
    pub async fn search(
        &self,
        kind: &str,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let mut params = vec![("query", query.to_string()), ("page", "1".to_string())];
        if let Some(y) = year {
            // Movie search takes `year`, TV search takes `first_air_date_year`.
            let key = if kind == "movie" {
                "year"
            } else {
                "first_air_date_year"
            };
            params.push((key, y.to_string()));
        }
        let page: PagedResponse<SearchResult> =
            self.get_json(&format!("/search/{kind}"), &params).await?;
        Ok(page.results)
    }

    /// One page of a curated list.
    pub async fn list_page(&self, list_id: &str, page: i64) -> Result<ListPage, ProviderError> {
        self.get_json(&format!("/list/{list_id}"), &[("page", page.to_string())])
            .await
    }

    /// One page of a discover query. `kind` is `"movie"` or `"tv"`; the
    /// caller passes through the already-expanded query parameters.
    pub async fn discover_page(
        &self,
        kind: &str,
        params: &[(String, String)],
        page: i64,
    ) -> Result<PagedResponse<SearchResult>, ProviderError> {
        let mut query: Vec<(&str, String)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        query.push(("page", page.to_string()));
        self.get_json(&format!("/discover/{kind}"), &query).await
    }

    /// Find by external IMDb ID; used by list sources that only carry `tt…`.
    pub async fn find_by_imdb(
        &self,
        imdb_id: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        self.get_json(
            &format!("/find/{imdb_id}"),
            &[("external_source", "imdb_id".to_string())],
        )
        .await
    }

    pub async fn movie_genres(&self) -> Result<serde_json::Value, ProviderError> {
        self.get_json("/genre/movie/list", &[]).await
    }

    pub async fn tv_genres(&self) -> Result<serde_json::Value, ProviderError> {
        self.get_json("/genre/tv/list", &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TmdbClient {
        TmdbClient::new(server.uri(), "k", "zh-CN", Duration::from_secs(5))
            .expect("client builds")
    }

    #[test]
    fn test_rejects_missing_api_key() {
        assert!(TmdbClient::new("http://x", "", "zh-CN", Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn test_search_uses_year_param_for_movies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/movie"))
            .and(query_param("year", "1995"))
            .and(query_param("language", "zh-CN"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "page": 1,
                "results": [{"id": 949, "title": "Heat", "release_date": "1995-12-15"}],
                "total_pages": 1, "total_results": 1
            })))
            .mount(&server)
            .await;

        let results = client_for(&server)
            .search("movie", "Heat", Some(1995))
            .await
            .expect("search ok");
        assert_eq!(results[0].id, 949);
    }

    #[tokio::test]
    async fn test_search_uses_first_air_date_year_for_tv() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/tv"))
            .and(query_param("first_air_date_year", "2017"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "page": 1, "results": [], "total_pages": 1, "total_results": 0
            })))
            .mount(&server)
            .await;

        let results = client_for(&server)
            .search("tv", "Dark", Some(2017))
            .await
            .expect("search ok");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_person_not_found_is_authoritative() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/person/404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .person_details(404, None)
            .await
            .expect_err("404");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_transient_5xx_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movie/1"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/movie/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 1, "title": "Recovered"
            })))
            .mount(&server)
            .await;

        let details = client_for(&server)
            .movie_details(1, None)
            .await
            .expect("retry succeeds");
        assert_eq!(details.title, "Recovered");
    }
}
