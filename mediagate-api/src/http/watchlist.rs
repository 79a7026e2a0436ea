//! Watchlist endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::{AppError, AppResult};
use crate::AppState;

pub async fn list(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let entries = state.watchlist.repository().all().await?;
    Ok(Json(json!({ "watchlist": entries })))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(series_id): Path<String>,
) -> AppResult<Json<Value>> {
    if !state.watchlist.repository().remove(&series_id).await? {
        return Err(AppError::not_found("该剧集不在追剧列表中"));
    }
    Ok(Json(json!({"status": "removed"})))
}

pub async fn force_end(
    State(state): State<Arc<AppState>>,
    Path(series_id): Path<String>,
) -> AppResult<Json<Value>> {
    state.watchlist.force_end(&series_id).await?;
    Ok(Json(json!({"status": "force_ended"})))
}

/// Subscribe all missing seasons of one series.
pub async fn subscribe_gaps(
    State(state): State<Arc<AppState>>,
    Path(series_id): Path<String>,
) -> AppResult<Json<Value>> {
    if state.quota.remaining() == 0 {
        return Err(AppError::quota_exhausted());
    }
    let submitted = state.watchlist.subscribe_gaps(&series_id).await?;
    Ok(Json(json!({"status": "submitted", "count": submitted})))
}

#[derive(Deserialize)]
pub struct SeasonPayload {
    pub season: i64,
}

pub async fn subscribe_season(
    State(state): State<Arc<AppState>>,
    Path(series_id): Path<String>,
    Json(payload): Json<SeasonPayload>,
) -> AppResult<Json<Value>> {
    let entry = state
        .watchlist
        .repository()
        .get(&series_id)
        .await?
        .ok_or_else(|| AppError::not_found("该剧集不在追剧列表中"))?;
    if state.quota.remaining() == 0 {
        return Err(AppError::quota_exhausted());
    }
    let accepted = state
        .watchlist
        .subscribe_season(&entry.title, &entry.tmdb_id, payload.season)
        .await?;
    if !accepted {
        return Err(AppError::quota_exhausted());
    }
    Ok(Json(json!({"status": "submitted"})))
}

/// Queue the quality-upgrade resubscribe pass.
pub async fn batch_resubscribe(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let cleanup = state.cleanup.clone();
    state.queue.submit(
        "媒体洗版",
        mediagate_core::task::ProcessorKind::Media,
        move |ctx| {
            Box::pin(async move {
                cleanup.resubscribe_low_quality(&ctx).await?;
                Ok(())
            })
        },
    );
    Ok(Json(json!({"status": "task_submitted"})))
}
