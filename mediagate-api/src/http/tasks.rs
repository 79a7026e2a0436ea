//! Task control endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::http::{AppError, AppResult};
use crate::AppState;

/// Current worker status plus the recent processing-log tail.
pub async fn status(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let status = state.queue.status().snapshot();
    let tail = state.log_repo.tail(50).await?;
    Ok(Json(json!({
        "status": status,
        "logs": tail,
    })))
}

/// Cooperative stop of whatever is running.
pub async fn trigger_stop(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.queue.signal_stop();
    Json(json!({"status": "stop_signal_sent"}))
}

/// Enqueue a registered task by key.
pub async fn trigger_task(
    State(state): State<Arc<AppState>>,
    Path(task_key): Path<String>,
) -> AppResult<Json<Value>> {
    if !state.registry.submit(&state.queue, &task_key) {
        return Err(AppError::not_found(format!("未知任务: {task_key}")));
    }
    Ok(Json(json!({"status": "task_submitted", "task": task_key})))
}
