//! User-data event handling
//!
//! Favorite/played/rating events carry `UserData` fields; playback events
//! synthesize a last-played timestamp and completion resets the position.
//! Episode IDs always normalize to their owning series before the upsert.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use mediagate_core::models::UserMediaState;

use crate::AppState;

pub async fn handle(
    state: &Arc<AppState>,
    event: &str,
    payload: &Value,
) -> (StatusCode, Json<Value>) {
    let user_id = payload
        .get("User")
        .and_then(|u| u.get("Id"))
        .and_then(Value::as_str);
    let item = payload.get("Item");
    let item_id = item
        .and_then(|i| i.get("Id"))
        .and_then(Value::as_str);
    let item_type = item
        .and_then(|i| i.get("Type"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let (Some(user_id), Some(item_id)) = (user_id, item_id) else {
        return (
            StatusCode::OK,
            Json(json!({"status": "event_ignored_missing_data"})),
        );
    };

    // Normalize episodes to their series.
    let target_id = match item_type {
        "Movie" | "Series" => Some(item_id.to_string()),
        "Episode" => state
            .emby
            .get_series_id_for_child(item_id)
            .await
            .ok()
            .flatten(),
        _ => None,
    };
    let Some(target_id) = target_id else {
        return (
            StatusCode::OK,
            Json(json!({"status": "event_ignored_unsupported_type_or_not_found"})),
        );
    };

    let mut update = UserMediaState {
        user_id: user_id.to_string(),
        item_id: target_id,
        ..Default::default()
    };
    let mut has_fields = false;

    match event {
        "item.markfavorite" | "item.unmarkfavorite" | "item.markplayed" | "item.markunplayed"
        | "item.rate" => {
            // Only these events carry authoritative UserData fields.
            let user_data = item.and_then(|i| i.get("UserData"));
            if let Some(favorite) = user_data
                .and_then(|d| d.get("IsFavorite"))
                .and_then(Value::as_bool)
            {
                update.is_favorite = Some(favorite);
                has_fields = true;
            }
            if let Some(played) = user_data
                .and_then(|d| d.get("Played"))
                .and_then(Value::as_bool)
            {
                update.played = Some(played);
                has_fields = true;
                if played {
                    update.playback_position_ticks = Some(0);
                    update.last_played_at = Some(Utc::now());
                }
            }
        }
        "playback.start" | "playback.pause" | "playback.stop" => {
            let playback = payload.get("PlaybackInfo");
            if let Some(ticks) = playback
                .and_then(|p| p.get("PositionTicks"))
                .and_then(Value::as_i64)
            {
                update.playback_position_ticks = Some(ticks);
                has_fields = true;
            }
            update.last_played_at = Some(Utc::now());
            has_fields = true;

            if event == "playback.stop" {
                let completed = playback
                    .and_then(|p| p.get("PlayedToCompletion"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                update.played = Some(completed);
                if completed {
                    update.playback_position_ticks = Some(0);
                }
            }

            // Playback traffic doubles as the session heartbeat.
            if let Err(e) = state
                .user_repo
                .heartbeat_session(user_id, Some(&update.item_id), None)
                .await
            {
                tracing::debug!(error = %e, "session heartbeat failed");
            }
        }
        _ => {}
    }

    if !has_fields {
        return (
            StatusCode::OK,
            Json(json!({"status": "event_ignored_no_updatable_data"})),
        );
    }

    match state.user_repo.upsert_media_state(&update).await {
        Ok(()) => {
            tracing::trace!(user = user_id, item = %update.item_id, event, "用户媒体状态已更新");
            (
                StatusCode::OK,
                Json(json!({"status": "user_data_updated"})),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "user media state upsert failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error_updating_user_data"})),
            )
        }
    }
}
