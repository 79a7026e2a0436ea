//! Reverse proxy with synthetic libraries
//!
//! Every request defaults to transparent forwarding to the real Library
//! Server (hop-by-hop headers stripped, bodies streamed, WebSocket
//! upgrades tunneled). Four request shapes are intercepted to inject
//! synthetic libraries resolved from the custom-collection engine under
//! the calling user's effective permissions.

pub mod forward;
pub mod image;
pub mod items;
pub mod latest;
pub mod mimic;
pub mod views;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;

use mediagate_core::config::ProxyConfig;
use mediagate_core::repository::CollectionRepository;
use mediagate_core::service::RecommendationEngine;

pub use mimic::{from_mimicked_id, is_mimicked_id, to_mimicked_id};

pub struct ProxyState {
    pub emby_base_url: String,
    pub emby_api_key: String,
    pub server_id: String,
    pub config: ProxyConfig,
    pub collections: CollectionRepository,
    pub pool: sqlx::PgPool,
    pub recommender: Arc<RecommendationEngine>,
    pub http: reqwest::Client,
}

impl ProxyState {
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/", any(dispatch))
            .route("/{*path}", any(dispatch))
            .with_state(self)
    }
}

/// Route interception happens here; everything unmatched forwards.
async fn dispatch(State(state): State<Arc<ProxyState>>, req: Request<Body>) -> Response {
    // WebSocket upgrades tunnel straight through.
    if forward::wants_websocket(req.headers()) {
        return forward::tunnel_websocket(state, req).await;
    }

    let path = req.uri().path().to_string();
    let query = forward::parse_query(req.uri());

    if !state.config.enabled {
        return forward::forward(state, req).await;
    }

    // 1. Rebuilt Views response.
    if let Some(user_id) = match_views_path(&path) {
        return views::handle_views(&state, &user_id).await.into_response();
    }

    // 2. Latest items (per-library or aggregate).
    if path.ends_with("/Items/Latest") {
        if let Some(user_id) = extract_user_id(&path) {
            return latest::handle_latest(&state, &user_id, &query, req).await;
        }
    }

    // 3. Synthetic view details.
    if let Some((user_id, mimicked_id)) = match_item_details_path(&path) {
        if is_mimicked_id(&mimicked_id) {
            return items::handle_mimicked_details(&state, &user_id, &mimicked_id)
                .await
                .into_response();
        }
    }

    // 4. Synthetic view primary image.
    if let Some(item_id) = match_image_path(&path) {
        if is_mimicked_id(&item_id) {
            return image::handle_mimicked_image(&state, &query).await;
        }
    }

    // 5. Item queries scoped to a synthetic parent.
    if let Some(parent_id) = query.get("ParentId") {
        if is_mimicked_id(parent_id) {
            if items::is_metadata_sidecar(&path) {
                return items::handle_sidecar(&state, &path, parent_id, &query).await;
            }
            if let Some(user_id) = extract_user_id(&path) {
                let parent_id = parent_id.clone();
                return items::handle_mimicked_items(&state, &user_id, &parent_id, &query)
                    .await
                    .into_response();
            }
        }
    }

    forward::forward(state, req).await
}

/// `/emby/Users/{uid}/Views` (with or without the /emby prefix).
fn match_views_path(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches("/emby");
    let rest = trimmed.strip_prefix("/Users/")?;
    let (user_id, tail) = rest.split_once('/')?;
    (tail == "Views").then(|| user_id.to_string())
}

/// `/emby/Users/{uid}/Items/{id}` exactly.
fn match_item_details_path(path: &str) -> Option<(String, String)> {
    let trimmed = path.trim_start_matches("/emby");
    let rest = trimmed.strip_prefix("/Users/")?;
    let mut parts = rest.split('/');
    let user_id = parts.next()?;
    if parts.next()? != "Items" {
        return None;
    }
    let item_id = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((user_id.to_string(), item_id.to_string()))
}

/// `/emby/Items/{id}/Images/...`.
fn match_image_path(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches("/emby");
    let rest = trimmed.strip_prefix("/Items/")?;
    let (item_id, tail) = rest.split_once('/')?;
    tail.starts_with("Images").then(|| item_id.to_string())
}

fn extract_user_id(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches("/emby");
    let rest = trimmed.strip_prefix("/Users/")?;
    rest.split('/').next().map(str::to_string)
}

pub(crate) fn empty_items_response() -> Response {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({"Items": [], "TotalRecordCount": 0})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_views_path() {
        assert_eq!(
            match_views_path("/emby/Users/u1/Views"),
            Some("u1".to_string())
        );
        assert_eq!(match_views_path("/Users/u1/Views"), Some("u1".to_string()));
        assert_eq!(match_views_path("/emby/Users/u1/Items"), None);
        assert_eq!(match_views_path("/emby/System/Info"), None);
    }

    #[test]
    fn test_match_item_details_path() {
        assert_eq!(
            match_item_details_path("/emby/Users/u1/Items/-900007"),
            Some(("u1".to_string(), "-900007".to_string()))
        );
        // Deeper paths are not detail requests.
        assert_eq!(
            match_item_details_path("/emby/Users/u1/Items/-900007/Images/Primary"),
            None
        );
        assert_eq!(match_item_details_path("/emby/Users/u1/Items"), None);
    }

    #[test]
    fn test_match_image_path() {
        assert_eq!(
            match_image_path("/emby/Items/-900007/Images/Primary"),
            Some("-900007".to_string())
        );
        assert_eq!(match_image_path("/emby/Items/-900007"), None);
    }

    #[test]
    fn test_extract_user_id() {
        assert_eq!(
            extract_user_id("/emby/Users/u1/Items/Latest"),
            Some("u1".to_string())
        );
        assert_eq!(extract_user_id("/emby/System/Info"), None);
    }
}
