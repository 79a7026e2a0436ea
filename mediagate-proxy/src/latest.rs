//! Latest-items handling
//!
//! A `ParentId` pointing at a synthetic library replaces the native
//! response with the collection's newest items. A global request (no
//! `ParentId`) aggregates across active collections flagged
//! `show_in_latest`, dedupes by library ID, and re-sorts by creation date.
//! Anything else forwards untouched.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use mediagate_core::models::CollectionKind;
use mediagate_core::repository::{VirtualLibraryQuery, VirtualQueryOptions};

use super::forward::{fetch_items_preserving_order, forward};
use super::items::visible_active;
use super::mimic::{from_mimicked_id, is_mimicked_id};
use super::ProxyState;

const LATEST_FIELDS: &str = "PrimaryImageAspectRatio,BasicSyncInfo,DateCreated,UserData";

pub async fn handle_latest(
    state: &Arc<ProxyState>,
    user_id: &str,
    query: &HashMap<String, String>,
    req: Request<Body>,
) -> Response {
    let parent_id = query
        .get("ParentId")
        .or_else(|| query.get("customViewId"))
        .cloned();
    let limit: i64 = query.get("Limit").and_then(|v| v.parse().ok()).unwrap_or(20);
    let fields = query
        .get("Fields")
        .cloned()
        .unwrap_or_else(|| LATEST_FIELDS.to_string());

    match parent_id {
        Some(parent) if is_mimicked_id(&parent) => {
            synthetic_latest(state, user_id, &parent, limit, &fields).await
        }
        Some(_) => forward(state.clone(), req).await,
        None => aggregate_latest(state, user_id, limit, &fields).await,
    }
}

async fn synthetic_latest(
    state: &ProxyState,
    user_id: &str,
    mimicked_id: &str,
    limit: i64,
    fields: &str,
) -> Response {
    let Some(db_id) = from_mimicked_id(mimicked_id) else {
        return Json(json!([])).into_response();
    };
    let coll = match state.collections.get(db_id).await {
        Ok(Some(coll)) => coll,
        _ => return Json(json!([])).into_response(),
    };
    if !coll.definition.show_in_latest {
        return Json(json!([])).into_response();
    }

    let ids = collection_latest_ids(state, user_id, &coll, limit).await;
    if ids.is_empty() {
        return Json(json!([])).into_response();
    }
    let items = fetch_items_preserving_order(state, user_id, &ids, fields).await;
    Json(Value::Array(items)).into_response()
}

async fn aggregate_latest(
    state: &ProxyState,
    user_id: &str,
    limit: i64,
    fields: &str,
) -> Response {
    let collections = match state.collections.all_active().await {
        Ok(collections) => collections,
        Err(e) => {
            tracing::error!(error = %e, "collection listing failed");
            return Json(json!([])).into_response();
        }
    };

    let mut candidate_ids = Vec::new();
    for coll in collections
        .iter()
        .filter(|c| c.definition.show_in_latest && visible_active(c, user_id))
    {
        candidate_ids.extend(collection_latest_ids(state, user_id, coll, limit).await);
    }
    // Dedup by library ID, keeping first occurrence.
    let mut seen = std::collections::HashSet::new();
    candidate_ids.retain(|id| seen.insert(id.clone()));
    if candidate_ids.is_empty() {
        return Json(json!([])).into_response();
    }

    // Hydrate, then re-sort the union by DateCreated.
    let mut items = fetch_items_preserving_order(state, user_id, &candidate_ids, fields).await;
    items.sort_by(|a, b| {
        let date_a = a.get("DateCreated").and_then(Value::as_str).unwrap_or("");
        let date_b = b.get("DateCreated").and_then(Value::as_str).unwrap_or("");
        date_b.cmp(date_a)
    });
    items.truncate(limit as usize);
    Json(Value::Array(items)).into_response()
}

/// Newest member IDs of one collection for this user, permission-filtered.
async fn collection_latest_ids(
    state: &ProxyState,
    user_id: &str,
    coll: &mediagate_core::models::CustomCollection,
    limit: i64,
) -> Vec<String> {
    let mut opts = VirtualQueryOptions::for_user(user_id);
    opts.item_types = coll.definition.item_type.clone();
    opts.target_library_ids = coll.definition.target_library_ids.clone();
    opts.sort_by = "DateCreated".to_string();
    opts.sort_order = "Descending".to_string();
    opts.limit = limit;
    opts.offset = 0;
    match coll.kind {
        CollectionKind::Filter => {
            opts.rules = coll.definition.rules.clone();
            opts.logic = coll.definition.logic;
        }
        _ => {
            opts.tmdb_ids = Some(
                coll.generated_media_info
                    .iter()
                    .map(|g| g.tmdb_id.clone())
                    .collect(),
            );
        }
    }
    if opts.tmdb_ids.as_ref().is_some_and(Vec::is_empty) {
        return Vec::new();
    }
    match VirtualLibraryQuery::run(&state.pool, &opts).await {
        Ok((ids, _)) => ids,
        Err(e) => {
            tracing::error!(collection = coll.id, error = %e, "latest query failed");
            Vec::new()
        }
    }
}
