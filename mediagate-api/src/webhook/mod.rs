//! Webhook ingestion pipeline
//!
//! Classifies Library Server events and routes them through debouncers and
//! the stream-readiness preflight before any work reaches the task queue.

pub mod batch;
pub mod debounce;
pub mod preflight;
pub mod userdata;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use mediagate_core::config::WebhookConfig;

use crate::AppState;

pub use batch::BatchDebouncer;
pub use debounce::UpdateDebouncers;

/// Events carrying per-user playback/favorite state.
const USER_DATA_EVENTS: [&str; 8] = [
    "item.markfavorite",
    "item.unmarkfavorite",
    "item.markplayed",
    "item.markunplayed",
    "playback.start",
    "playback.pause",
    "playback.stop",
    "item.rate",
];

/// Events that feed the new-item/update pipeline.
const TRIGGER_EVENTS: [&str; 5] = [
    "item.add",
    "library.new",
    "library.deleted",
    "metadata.update",
    "image.update",
];

const TRIGGER_TYPES: [&str; 3] = ["Movie", "Series", "Episode"];

/// Shared webhook machinery: debouncer tables and the preflight semaphore.
/// Timings come from the application config at each call site.
#[derive(Clone)]
pub struct WebhookState {
    pub batch: Arc<BatchDebouncer>,
    pub updates: Arc<UpdateDebouncers>,
    pub preflight_permits: Arc<Semaphore>,
}

impl WebhookState {
    #[must_use]
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            batch: Arc::new(BatchDebouncer::new()),
            updates: Arc::new(UpdateDebouncers::new()),
            preflight_permits: Arc::new(Semaphore::new(config.preflight_concurrency.max(1))),
        }
    }
}

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let event = payload
        .get("Event")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    tracing::debug!(event, "收到 Webhook");

    if event == "user.policyupdated" {
        return handle_policy_updated(&state, &payload).await;
    }

    if USER_DATA_EVENTS.contains(&event.as_str()) {
        return userdata::handle(&state, &event, &payload).await;
    }

    if !TRIGGER_EVENTS.contains(&event.as_str()) {
        return (
            StatusCode::OK,
            Json(json!({"status": "event_ignored_not_in_trigger_list"})),
        );
    }

    let item = payload.get("Item").cloned().unwrap_or(Value::Null);
    let item_id = item.get("Id").and_then(Value::as_str).unwrap_or_default();
    let item_name = item
        .get("Name")
        .and_then(Value::as_str)
        .unwrap_or("未知项目")
        .to_string();
    let item_type = item
        .get("Type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if item_id.is_empty() || !TRIGGER_TYPES.contains(&item_type.as_str()) {
        return (
            StatusCode::OK,
            Json(json!({"status": "event_ignored_no_id_or_wrong_type"})),
        );
    }
    let item_id = item_id.to_string();

    match event.as_str() {
        "library.deleted" => handle_deleted(&state, &item_id, &item_type).await,
        "item.add" | "library.new" => {
            // Preflight runs detached; the webhook answers immediately.
            let state = state.clone();
            let id = item_id.clone();
            tokio::spawn(async move {
                preflight::wait_for_stream_ready(state, id, item_name, item_type).await;
            });
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "processing_started_with_stream_check",
                    "item_id": item_id,
                })),
            )
        }
        "metadata.update" | "image.update" => {
            handle_update_event(&state, &event, &item_id, &item_name, &item_type, &payload).await
        }
        _ => (StatusCode::OK, Json(json!({"status": "event_unhandled"}))),
    }
}

async fn handle_policy_updated(
    state: &Arc<AppState>,
    payload: &Value,
) -> (StatusCode, Json<Value>) {
    let Some(user_id) = payload
        .get("User")
        .and_then(|u| u.get("Id"))
        .and_then(Value::as_str)
    else {
        return (
            StatusCode::OK,
            Json(json!({"status": "event_ignored_no_user_id"})),
        );
    };
    let user_name = payload
        .get("User")
        .and_then(|u| u.get("Name"))
        .and_then(Value::as_str)
        .unwrap_or("未知用户")
        .to_string();

    // Our own policy pushes echo back as this event; the marker table
    // tells them apart, single-shot.
    if state.markers.consume(user_id) {
        tracing::debug!(user = %user_name, "忽略系统内部触发的权限更新事件");
        return (
            StatusCode::OK,
            Json(json!({"status": "event_ignored_system_triggered"})),
        );
    }

    let templates = state.templates.clone();
    let user_id = user_id.to_string();
    state.queue.submit(
        format!("自动同步权限 (源: {user_name})"),
        mediagate_core::task::ProcessorKind::Media,
        move |_ctx| {
            Box::pin(async move { templates.auto_sync_on_policy_change(&user_id).await })
        },
    );
    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "auto_sync_task_submitted"})),
    )
}

async fn handle_deleted(
    state: &Arc<AppState>,
    item_id: &str,
    item_type: &str,
) -> (StatusCode, Json<Value>) {
    if let Err(e) = state.media_repo.remove_library_item(item_id).await {
        tracing::error!(item_id, error = %e, "delete cleanup failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error_processing_remove_event"})),
        );
    }
    // Movie/series deletions change the recommendation pool.
    if matches!(item_type, "Movie" | "Series") {
        state.recommender.invalidate_cache();
    }
    (
        StatusCode::OK,
        Json(json!({"status": "delete_event_processed"})),
    )
}

async fn handle_update_event(
    state: &Arc<AppState>,
    event: &str,
    item_id: &str,
    item_name: &str,
    item_type: &str,
    payload: &Value,
) -> (StatusCode, Json<Value>) {
    // Episodes debounce on their owning series.
    let (target_id, target_name) = if item_type == "Episode" {
        match state.emby.get_series_id_for_child(item_id).await {
            Ok(Some(series_id)) => {
                let name = state
                    .emby
                    .get_item(&series_id, None)
                    .await
                    .ok()
                    .flatten()
                    .map_or_else(|| item_name.to_string(), |i| i.name);
                (series_id, name)
            }
            _ => {
                return (
                    StatusCode::OK,
                    Json(json!({"status": "event_ignored_episode_no_series_id"})),
                );
            }
        }
    } else {
        (item_id.to_string(), item_name.to_string())
    };

    if event == "metadata.update" {
        debounce::schedule_metadata_sync(state.clone(), target_id.clone(), target_name);
        (
            StatusCode::ACCEPTED,
            Json(json!({"status": "metadata_update_task_debounced", "item_id": target_id})),
        )
    } else {
        let description = payload
            .get("Description")
            .and_then(Value::as_str)
            .unwrap_or("Webhook Image Update")
            .to_string();
        debounce::schedule_image_sync(state.clone(), target_id.clone(), target_name, description);
        (
            StatusCode::ACCEPTED,
            Json(json!({"status": "asset_update_task_debounced", "item_id": target_id})),
        )
    }
}
