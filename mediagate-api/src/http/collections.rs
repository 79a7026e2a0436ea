//! Custom-collection CRUD and corrections

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use mediagate_core::models::{CollectionDefinition, CollectionKind, ItemType, SubscriptionStatus};

use crate::http::{AppError, AppResult};
use crate::AppState;

#[derive(Deserialize)]
pub struct CollectionPayload {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub definition: CollectionDefinition,
    #[serde(default)]
    pub allowed_user_ids: Option<Vec<String>>,
    #[serde(default)]
    pub sort_order: i32,
}

pub async fn list(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let collections = state.collection_repo.all().await?;
    Ok(Json(json!({ "collections": collections })))
}

pub async fn detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let coll = state
        .collection_repo
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("合集 {id} 不存在")))?;
    Ok(Json(json!({ "collection": coll })))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CollectionPayload>,
) -> AppResult<Json<Value>> {
    let kind = CollectionKind::parse(&payload.kind)
        .ok_or_else(|| AppError::bad_request(format!("无效的合集类型: {}", payload.kind)))?;
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("合集名称不能为空"));
    }
    let coll = state
        .collection_repo
        .create(
            payload.name.trim(),
            kind,
            &payload.definition,
            payload.allowed_user_ids.as_deref(),
        )
        .await?;
    Ok(Json(json!({ "collection": coll })))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<CollectionPayload>,
) -> AppResult<Json<Value>> {
    state
        .collection_repo
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("合集 {id} 不存在")))?;
    state
        .collection_repo
        .update_definition(
            id,
            payload.name.trim(),
            &payload.definition,
            payload.allowed_user_ids.as_deref(),
            payload.sort_order,
        )
        .await?;
    Ok(Json(json!({"status": "updated"})))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    if !state.collection_repo.delete(id).await? {
        return Err(AppError::not_found(format!("合集 {id} 不存在")));
    }
    Ok(Json(json!({"status": "deleted"})))
}

/// Queue a one-off sync of this collection.
pub async fn sync(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let coll = state
        .collection_repo
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("合集 {id} 不存在")))?;

    let service = state.collections.clone();
    state.queue.submit(
        format!("同步合集: {}", coll.name),
        mediagate_core::task::ProcessorKind::Media,
        move |ctx| Box::pin(async move { service.sync_collection(&ctx, &coll).await }),
    );
    Ok(Json(json!({"status": "sync_submitted"})))
}

#[derive(Deserialize)]
pub struct StatusPayload {
    pub status: String,
}

pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<StatusPayload>,
) -> AppResult<Json<Value>> {
    if !matches!(payload.status.as_str(), "active" | "paused" | "disabled") {
        return Err(AppError::bad_request(format!(
            "无效的状态: {}",
            payload.status
        )));
    }
    state.collection_repo.set_status(id, &payload.status).await?;
    Ok(Json(json!({"status": "updated"})))
}

#[derive(Deserialize)]
pub struct MediaStatusPayload {
    pub tmdb_id: String,
    pub item_type: String,
    pub status: String,
}

/// Override one entry's subscription status (e.g. mark ignored).
pub async fn override_media_status(
    State(state): State<Arc<AppState>>,
    Path(_id): Path<i64>,
    Json(payload): Json<MediaStatusPayload>,
) -> AppResult<Json<Value>> {
    let item_type = ItemType::parse(&payload.item_type)
        .ok_or_else(|| AppError::bad_request("无效的媒体类型"))?;
    let status = SubscriptionStatus::parse(&payload.status)
        .ok_or_else(|| AppError::bad_request("无效的订阅状态"))?;
    state
        .media_repo
        .set_subscription_status(&payload.tmdb_id, item_type, status)
        .await?;
    Ok(Json(json!({"status": "updated"})))
}

#[derive(Deserialize)]
pub struct CorrectMatchPayload {
    pub old_tmdb_id: String,
    pub new_tmdb_id: String,
    #[serde(default)]
    pub season: Option<i64>,
}

/// Swap the metadata ID bound to a list entry, optionally with a season.
pub async fn correct_match(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<CorrectMatchPayload>,
) -> AppResult<Json<Value>> {
    let changed = state
        .collection_repo
        .correct_generated_item(
            id,
            &payload.old_tmdb_id,
            &payload.new_tmdb_id,
            payload.season,
        )
        .await?;
    if !changed {
        return Err(AppError::not_found("该条目不在合集中"));
    }
    Ok(Json(json!({"status": "corrected"})))
}
