//! Library Server HTTP client

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::{check_response, ProviderError};
use crate::http::build_client;

use super::types::{AuthResponse, ItemsResponse, MediaItem, UserDto};

const X_EMBY_TOKEN: &str = "X-Emby-Token";

/// Maximum IDs per batched `Ids=` lookup.
pub const MAX_IDS_PER_REQUEST: usize = 200;

/// Library Server HTTP client.
///
/// Carries the server API key; user-scoped endpoints take the user ID
/// explicitly because the proxy calls them on behalf of arbitrary users.
#[derive(Clone)]
pub struct EmbyClient {
    base_url: String,
    api_key: String,
    user_id: String,
    client: Client,
}

impl EmbyClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        user_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ProviderError::InvalidConfig(
                "library server base url is empty".to_string(),
            ));
        }
        Ok(Self {
            base_url,
            api_key: api_key.into(),
            user_id: user_id.into(),
            client: build_client(timeout)?,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/emby{}", self.base_url, path)
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(X_EMBY_TOKEN, HeaderValue::from_str(&self.api_key)?);
        Ok(headers)
    }

    /// Authenticate a user by name, returning `(access_token, user_id)`.
    ///
    /// Used to obtain the admin token that item deletion requires.
    pub async fn authenticate_by_name(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(String, String), ProviderError> {
        let url = self.url("/Users/AuthenticateByName");
        let body = json!({ "Username": username, "Pw": password });

        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .header("X-Emby-Authorization", "Emby Client=\"MediaGate\", Device=\"server\", DeviceId=\"mediagate\", Version=\"1\"")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProviderError::Auth(format!(
                "login failed: {}",
                resp.status()
            )));
        }

        let auth: AuthResponse = resp.json().await?;
        Ok((auth.access_token, auth.user.id))
    }

    /// Fetch one item's details through the user-scoped Items endpoint.
    pub async fn get_item(
        &self,
        item_id: &str,
        fields: Option<&str>,
    ) -> Result<Option<MediaItem>, ProviderError> {
        let user_id = self.user_id.clone();
        let mut items = self
            .get_items_by_ids(&user_id, &[item_id.to_string()], fields)
            .await?;
        Ok(if items.is_empty() {
            None
        } else {
            Some(items.swap_remove(0))
        })
    }

    /// Batched ID lookup under a given user's visibility.
    ///
    /// Splits into chunks of [`MAX_IDS_PER_REQUEST`]; the server silently
    /// drops IDs the user cannot see, so the result may be shorter than the
    /// input.
    pub async fn get_items_by_ids(
        &self,
        user_id: &str,
        ids: &[String],
        fields: Option<&str>,
    ) -> Result<Vec<MediaItem>, ProviderError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IDS_PER_REQUEST) {
            let url = self.url(&format!("/Users/{user_id}/Items"));
            let mut query: Vec<(&str, String)> = vec![("Ids", chunk.join(","))];
            if let Some(f) = fields {
                query.push(("Fields", f.to_string()));
            }
            let resp = self
                .client
                .get(&url)
                .headers(self.headers()?)
                .query(&query)
                .send()
                .await?;
            let resp = check_response(resp)?;
            let page: ItemsResponse = resp.json().await?;
            all.extend(page.items);
        }
        Ok(all)
    }

    /// Query children of a parent (recursive), optionally by type.
    pub async fn get_children(
        &self,
        parent_id: &str,
        item_types: Option<&str>,
        fields: Option<&str>,
        start_index: i64,
        limit: i64,
    ) -> Result<ItemsResponse, ProviderError> {
        let url = self.url(&format!("/Users/{}/Items", self.user_id));
        let mut query: Vec<(&str, String)> = vec![
            ("ParentId", parent_id.to_string()),
            ("Recursive", "true".to_string()),
            ("StartIndex", start_index.to_string()),
            ("Limit", limit.to_string()),
        ];
        if let Some(t) = item_types {
            query.push(("IncludeItemTypes", t.to_string()));
        }
        if let Some(f) = fields {
            query.push(("Fields", f.to_string()));
        }

        let resp = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .query(&query)
            .send()
            .await?;
        let resp = check_response(resp)?;
        Ok(resp.json().await?)
    }

    /// Count items of a type under a parent.
    pub async fn get_item_count(
        &self,
        parent_id: &str,
        item_types: &str,
    ) -> Result<i64, ProviderError> {
        let page = self
            .get_children(parent_id, Some(item_types), None, 0, 0)
            .await?;
        Ok(page.total_record_count)
    }

    /// Resolve an episode (or season) to its owning series ID.
    pub async fn get_series_id_for_child(
        &self,
        item_id: &str,
    ) -> Result<Option<String>, ProviderError> {
        let item = self.get_item(item_id, Some("SeriesId")).await?;
        Ok(item.and_then(|i| i.series_id))
    }

    /// The user's top-level views (libraries).
    pub async fn get_views(&self, user_id: &str) -> Result<Vec<MediaItem>, ProviderError> {
        let url = self.url(&format!("/Users/{user_id}/Views"));
        let resp = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await?;
        let resp = check_response(resp)?;
        let page: ItemsResponse = resp.json().await?;
        Ok(page.items)
    }

    /// Walk the ancestor chain to the item's library root view.
    pub async fn get_library_root(
        &self,
        item_id: &str,
    ) -> Result<Option<MediaItem>, ProviderError> {
        let url = self.url(&format!("/Items/{item_id}/Ancestors"));
        let resp = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .query(&[("UserId", self.user_id.as_str())])
            .send()
            .await?;
        let resp = check_response(resp)?;
        let ancestors: Vec<MediaItem> = resp.json().await?;
        // The view root is the ancestor that carries a CollectionType.
        Ok(ancestors
            .into_iter()
            .find(|a| a.collection_type.is_some()))
    }

    /// Full item update. The caller sends back the complete item document
    /// with the cast list replaced; the server treats this as an edit.
    pub async fn update_item(&self, item_id: &str, body: &Value) -> Result<(), ProviderError> {
        let url = self.url(&format!("/Items/{item_id}"));
        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await?;
        check_response(resp)?;
        Ok(())
    }

    /// Ask the server to refresh an item's metadata from its providers.
    pub async fn refresh_item(&self, item_id: &str, recursive: bool) -> Result<(), ProviderError> {
        let url = self.url(&format!("/Items/{item_id}/Refresh"));
        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .query(&[
                ("Recursive", if recursive { "true" } else { "false" }),
                ("MetadataRefreshMode", "FullRefresh"),
            ])
            .send()
            .await?;
        check_response(resp)?;
        Ok(())
    }

    /// Create a boxset collection seeded with the given item IDs.
    /// Returns the new collection's item ID.
    pub async fn create_collection(
        &self,
        name: &str,
        item_ids: &[String],
    ) -> Result<String, ProviderError> {
        let url = self.url("/Collections");
        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .query(&[("Name", name), ("Ids", &item_ids.join(","))])
            .send()
            .await?;
        let resp = check_response(resp)?;
        let body: Value = resp.json().await?;
        body.get("Id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Parse("collection create response missing Id".into()))
    }

    /// Append items to an existing collection.
    pub async fn add_to_collection(
        &self,
        collection_id: &str,
        item_ids: &[String],
    ) -> Result<(), ProviderError> {
        if item_ids.is_empty() {
            return Ok(());
        }
        let url = self.url(&format!("/Collections/{collection_id}/Items"));
        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .query(&[("Ids", item_ids.join(","))])
            .send()
            .await?;
        check_response(resp)?;
        Ok(())
    }

    /// Remove items from a collection.
    pub async fn remove_from_collection(
        &self,
        collection_id: &str,
        item_ids: &[String],
    ) -> Result<(), ProviderError> {
        if item_ids.is_empty() {
            return Ok(());
        }
        let url = self.url(&format!("/Collections/{collection_id}/Items/Delete"));
        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .query(&[("Ids", item_ids.join(","))])
            .send()
            .await?;
        check_response(resp)?;
        Ok(())
    }

    /// All server users, with policies.
    pub async fn get_users(&self) -> Result<Vec<UserDto>, ProviderError> {
        let url = self.url("/Users");
        let resp = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await?;
        let resp = check_response(resp)?;
        Ok(resp.json().await?)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<UserDto, ProviderError> {
        let url = self.url(&format!("/Users/{user_id}"));
        let resp = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await?;
        let resp = check_response(resp)?;
        Ok(resp.json().await?)
    }

    /// Create a user; the server rejects duplicate names with 400.
    pub async fn create_user(&self, name: &str) -> Result<UserDto, ProviderError> {
        let url = self.url("/Users/New");
        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&json!({ "Name": name }))
            .send()
            .await?;
        let resp = check_response(resp)?;
        Ok(resp.json().await?)
    }

    /// Force-apply a full policy document to a user.
    pub async fn set_user_policy(
        &self,
        user_id: &str,
        policy: &Value,
    ) -> Result<(), ProviderError> {
        let url = self.url(&format!("/Users/{user_id}/Policy"));
        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(policy)
            .send()
            .await?;
        check_response(resp)?;
        Ok(())
    }

    /// Force-apply a display configuration document to a user.
    pub async fn set_user_configuration(
        &self,
        user_id: &str,
        configuration: &Value,
    ) -> Result<(), ProviderError> {
        let url = self.url(&format!("/Users/{user_id}/Configuration"));
        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(configuration)
            .send()
            .await?;
        check_response(resp)?;
        Ok(())
    }

    /// Delete an item. Requires an access token from an admin login rather
    /// than the API key.
    pub async fn delete_item(
        &self,
        item_id: &str,
        admin_token: &str,
    ) -> Result<(), ProviderError> {
        let url = self.url(&format!("/Items/{item_id}"));
        let resp = self
            .client
            .delete(&url)
            .header(X_EMBY_TOKEN, HeaderValue::from_str(admin_token)?)
            .send()
            .await?;
        check_response(resp)?;
        Ok(())
    }

    /// The server's own ID, used to stamp synthetic views.
    pub async fn get_server_id(&self) -> Result<String, ProviderError> {
        let url = self.url("/System/Info");
        let resp = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await?;
        let resp = check_response(resp)?;
        let body: Value = resp.json().await?;
        body.get("Id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Parse("system info missing Id".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> EmbyClient {
        EmbyClient::new(server.uri(), "key", "admin-user", Duration::from_secs(5))
            .expect("client builds")
    }

    #[test]
    fn test_rejects_empty_base_url() {
        let err = EmbyClient::new("", "key", "u", Duration::from_secs(5));
        assert!(err.is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let c = EmbyClient::new("http://emby:8096/", "key", "u", Duration::from_secs(5))
            .expect("client builds");
        assert_eq!(c.base_url(), "http://emby:8096");
    }

    #[tokio::test]
    async fn test_get_items_by_ids_chunks_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/emby/Users/u1/Items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Items": [{"Id": "1", "Name": "A", "Type": "Movie"}],
                "TotalRecordCount": 1
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let ids: Vec<String> = (0..(MAX_IDS_PER_REQUEST + 1))
            .map(|i| i.to_string())
            .collect();
        let items = client
            .get_items_by_ids("u1", &ids, None)
            .await
            .expect("request succeeds");
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_get_item_returns_none_when_invisible() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/emby/Users/admin-user/Items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Items": [], "TotalRecordCount": 0
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let item = client.get_item("missing", None).await.expect("ok");
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn test_create_collection_parses_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emby/Collections"))
            .and(query_param("Name", "Top Picks"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"Id": "c42"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let id = client
            .create_collection("Top Picks", &["1".into(), "2".into()])
            .await
            .expect("created");
        assert_eq!(id, "c42");
    }

    #[tokio::test]
    async fn test_not_found_maps_to_dedicated_variant() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/emby/Users/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.get_user("gone").await.expect_err("should fail");
        assert!(err.is_not_found());
    }
}
