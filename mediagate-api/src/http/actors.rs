//! Actor subscription endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use mediagate_core::models::{ItemType, SubscriptionFilter, TrackedStatus};

use crate::http::{AppError, AppResult};
use crate::AppState;

#[derive(Deserialize)]
pub struct SubscriptionPayload {
    pub tmdb_person_id: i64,
    pub actor_name: String,
    #[serde(default)]
    pub filter: SubscriptionFilter,
}

pub async fn list(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let subscriptions = state.actors.all_subscriptions().await?;
    Ok(Json(json!({ "subscriptions": subscriptions })))
}

pub async fn detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let subscription = state
        .actors
        .get_subscription(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("订阅 {id} 不存在")))?;
    let tracked = state.actors.tracked_media(id).await?;
    Ok(Json(json!({ "subscription": subscription, "tracked": tracked })))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubscriptionPayload>,
) -> AppResult<Json<Value>> {
    if payload.actor_name.trim().is_empty() {
        return Err(AppError::bad_request("演员名不能为空"));
    }
    let id = state
        .actors
        .create_subscription(payload.tmdb_person_id, payload.actor_name.trim(), &payload.filter)
        .await?;
    Ok(Json(json!({"status": "created", "id": id})))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    if !state.actors.delete_subscription(id).await? {
        return Err(AppError::not_found(format!("订阅 {id} 不存在")));
    }
    Ok(Json(json!({"status": "deleted"})))
}

/// Queue a full rescan of one subscription.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let subscription = state
        .actors
        .get_subscription(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("订阅 {id} 不存在")))?;

    let actors = state.actors.clone();
    state.queue.submit(
        format!("刷新演员订阅: {}", subscription.actor_name),
        mediagate_core::task::ProcessorKind::Actor,
        move |ctx| Box::pin(async move { actors.scan_subscription(&ctx, &subscription).await }),
    );
    Ok(Json(json!({"status": "refresh_submitted"})))
}

/// Submit one tracked work to the downloader.
pub async fn subscribe_tracked(
    State(state): State<Arc<AppState>>,
    Path((id, tmdb_id)): Path<(i64, String)>,
) -> AppResult<Json<Value>> {
    use mediagate_providers::moviepilot::SubscribeRequest;

    let Some(downloader) = &state.downloader else {
        return Err(AppError::bad_request("下载器未配置"));
    };
    let tracked = state.actors.tracked_media(id).await?;
    let work = tracked
        .into_iter()
        .find(|t| t.tmdb_id == tmdb_id)
        .ok_or_else(|| AppError::not_found("该作品不在订阅追踪中"))?;
    let tmdb: i64 = work
        .tmdb_id
        .parse()
        .map_err(|_| AppError::bad_request("无效的媒体ID"))?;

    if !state.quota.try_acquire() {
        return Err(AppError::quota_exhausted());
    }
    let request = match work.item_type {
        ItemType::Series => SubscribeRequest::series(&work.title, tmdb, work.season_number),
        _ => SubscribeRequest::movie(&work.title, tmdb),
    };
    downloader
        .subscribe(&request)
        .await
        .map_err(|e| AppError::internal(format!("订阅提交失败: {e}")))?;
    Ok(Json(json!({"status": "submitted"})))
}

#[derive(Deserialize)]
pub struct TrackedStatusPayload {
    pub item_type: String,
    pub status: String,
}

pub async fn override_tracked(
    State(state): State<Arc<AppState>>,
    Path((id, tmdb_id)): Path<(i64, String)>,
    Json(payload): Json<TrackedStatusPayload>,
) -> AppResult<Json<Value>> {
    let item_type = ItemType::parse(&payload.item_type)
        .ok_or_else(|| AppError::bad_request("无效的媒体类型"))?;
    let status = TrackedStatus::parse(&payload.status)
        .ok_or_else(|| AppError::bad_request("无效的追踪状态"))?;
    state
        .actors
        .override_tracked_status(id, &tmdb_id, item_type, status)
        .await?;
    Ok(Json(json!({"status": "updated"})))
}
