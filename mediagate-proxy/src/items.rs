//! Synthetic library details and item queries

use std::collections::HashMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use mediagate_core::models::{CollectionKind, CustomCollection};
use mediagate_core::repository::{VirtualLibraryQuery, VirtualQueryOptions};

use super::forward::fetch_items_preserving_order;
use super::mimic::from_mimicked_id;
use super::{empty_items_response, ProxyState};

const DEFAULT_FIELDS: &str = "PrimaryImageAspectRatio,BasicSyncInfo,DateCreated,UserData,SortName";

/// Metadata sidecar endpoints clients probe under a parent; synthetic
/// parents answer from the real collection, or empty.
const SIDECAR_SUFFIXES: [&str; 6] = [
    "/Items/Prefixes",
    "/Genres",
    "/Studios",
    "/Tags",
    "/OfficialRatings",
    "/Years",
];

#[must_use]
pub fn is_metadata_sidecar(path: &str) -> bool {
    SIDECAR_SUFFIXES.iter().any(|s| path.ends_with(s))
}

/// Synthesized detail document for the view itself.
pub async fn handle_mimicked_details(
    state: &ProxyState,
    _user_id: &str,
    mimicked_id: &str,
) -> Response {
    let Some(db_id) = from_mimicked_id(mimicked_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let coll = match state.collections.get(db_id).await {
        Ok(Some(coll)) => coll,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "collection lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let image_tags = coll
        .emby_collection_id
        .as_ref()
        .map(|id| json!({"Primary": id}))
        .unwrap_or_else(|| json!({}));

    Json(json!({
        "Name": coll.name,
        "ServerId": state.server_id,
        "Id": mimicked_id,
        "Type": "CollectionFolder",
        "CollectionType": coll.definition.collection_type(),
        "IsFolder": true,
        "ImageTags": image_tags,
    }))
    .into_response()
}

/// `GET /Users/{uid}/Items?ParentId={mimicked}` — resolve the collection's
/// contents under the user's effective permissions, hydrate details from
/// the real server, and page truthfully.
pub async fn handle_mimicked_items(
    state: &ProxyState,
    user_id: &str,
    mimicked_id: &str,
    query: &HashMap<String, String>,
) -> Response {
    let Some(db_id) = from_mimicked_id(mimicked_id) else {
        return empty_items_response();
    };
    let coll = match state.collections.get(db_id).await {
        Ok(Some(coll)) => coll,
        _ => return empty_items_response(),
    };

    let requested_limit: i64 = query
        .get("Limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(50);
    let offset: i64 = query
        .get("StartIndex")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    // The collection's own cap overrides client paging beyond it.
    let defined_limit = coll.definition.limit.map(|l| l as i64);
    let effective_limit = match defined_limit {
        Some(cap) if offset >= cap => {
            return Json(json!({"Items": [], "TotalRecordCount": cap})).into_response();
        }
        Some(cap) => requested_limit.min(cap - offset),
        None => requested_limit,
    };

    let mut opts = VirtualQueryOptions::for_user(user_id);
    opts.item_types = coll.definition.item_type.clone();
    opts.target_library_ids = coll.definition.target_library_ids.clone();
    opts.sort_by = query
        .get("SortBy")
        .cloned()
        .unwrap_or_else(|| "DateCreated".to_string());
    opts.sort_order = query
        .get("SortOrder")
        .cloned()
        .unwrap_or_else(|| "Descending".to_string());
    opts.limit = effective_limit;
    opts.offset = offset;

    match coll.kind {
        CollectionKind::Filter => {
            opts.rules = coll.definition.rules.clone();
            opts.logic = coll.definition.logic;
        }
        CollectionKind::AiRecommendation => {
            // Per-user pool computed now; the SQL layer applies permissions
            // and paging over it.
            let pool_size = (effective_limit + offset).max(effective_limit) as usize + 50;
            let pool = state
                .recommender
                .generate_for_user(
                    user_id,
                    pool_size,
                    coll.definition.ai_prompt.as_deref(),
                    &coll.definition.item_type,
                )
                .await
                .unwrap_or_default();
            opts.tmdb_ids = Some(pool.into_iter().map(|g| g.tmdb_id).collect());
        }
        CollectionKind::List | CollectionKind::AiRecommendationGlobal => {
            opts.tmdb_ids = Some(
                coll.generated_media_info
                    .iter()
                    .map(|g| g.tmdb_id.clone())
                    .collect(),
            );
        }
    }

    if opts.tmdb_ids.as_ref().is_some_and(Vec::is_empty) {
        return empty_items_response();
    }

    let (ids, total) = match VirtualLibraryQuery::run(&state.pool, &opts).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "virtual library query failed");
            return empty_items_response();
        }
    };
    let reported_total = match defined_limit {
        Some(cap) => total.min(cap),
        None => total,
    };
    if ids.is_empty() {
        return Json(json!({"Items": [], "TotalRecordCount": reported_total})).into_response();
    }

    let fields = query
        .get("Fields")
        .cloned()
        .unwrap_or_else(|| DEFAULT_FIELDS.to_string());
    let items = fetch_items_preserving_order(state, user_id, &ids, &fields).await;

    Json(json!({"Items": items, "TotalRecordCount": reported_total})).into_response()
}

/// Sidecar endpoints under a synthetic parent are answered from the real
/// collection when it exists, otherwise empty.
pub async fn handle_sidecar(
    state: &ProxyState,
    path: &str,
    mimicked_id: &str,
    query: &HashMap<String, String>,
) -> Response {
    let real_collection_id = match from_mimicked_id(mimicked_id) {
        Some(db_id) => match state.collections.get(db_id).await {
            Ok(Some(coll)) => coll.emby_collection_id,
            _ => None,
        },
        None => None,
    };
    let Some(real_collection_id) = real_collection_id else {
        return Json(json!([])).into_response();
    };

    let url = format!("{}{}", state.emby_base_url, path);
    let mut forwarded: Vec<(String, String)> = query
        .iter()
        .filter(|(k, _)| k.as_str() != "ParentId")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    forwarded.push(("ParentId".to_string(), real_collection_id));
    forwarded.push(("api_key".to_string(), state.emby_api_key.clone()));

    match state.http.get(&url).query(&forwarded).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body = resp.json::<Value>().await.unwrap_or_else(|_| json!([]));
            Json(body).into_response()
        }
        _ => Json(json!([])).into_response(),
    }
}

/// Visibility re-check used by latest aggregation.
#[must_use]
pub fn visible_active(coll: &CustomCollection, user_id: &str) -> bool {
    coll.is_active() && coll.visible_to(user_id) && coll.emby_collection_id.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_detection() {
        assert!(is_metadata_sidecar("/emby/Genres"));
        assert!(is_metadata_sidecar("/emby/Items/Prefixes"));
        assert!(is_metadata_sidecar("/emby/OfficialRatings"));
        assert!(!is_metadata_sidecar("/emby/Users/u1/Items"));
    }
}
