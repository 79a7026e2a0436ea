//! Stream-readiness preflight
//!
//! A fresh movie or episode may land before the server has probed its
//! streams; processing it then yields empty technical metadata. The
//! preflight polls the item until a video stream reports a codec or width,
//! then enqueues the batch event. The shared semaphore is held only across
//! the API call so idle waiting never occupies a permit.

use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;

use crate::webhook::batch::QueuedEvent;
use crate::AppState;

pub async fn wait_for_stream_ready(
    state: Arc<AppState>,
    item_id: String,
    item_name: String,
    item_type: String,
) {
    // Only playable leaves need the probe; containers enqueue directly.
    if item_type != "Movie" && item_type != "Episode" {
        enqueue(&state, item_id, item_name, item_type);
        return;
    }

    let config = &state.config.webhook;
    let interval = Duration::from_secs(config.preflight_interval_seconds);
    tracing::info!(item = %item_name, "开始预检视频流数据");

    for attempt in 0..config.preflight_max_attempts {
        let details = {
            let _permit = state
                .webhook
                .preflight_permits
                .acquire()
                .await
                .expect("semaphore never closed");
            state.emby.get_item(&item_id, Some("MediaSources")).await
        };

        match details {
            Ok(Some(item)) => {
                let ready = item.media_sources.iter().any(|source| {
                    source.media_streams.iter().any(|stream| {
                        stream.stream_type.as_deref() == Some("Video")
                            && (stream.codec.is_some() || stream.width.is_some())
                    })
                });
                if ready {
                    tracing::info!(
                        item = %item_name,
                        waited_seconds = u64::from(attempt) * config.preflight_interval_seconds,
                        "预检成功，加入处理队列"
                    );
                    enqueue(&state, item_id, item_name, item_type);
                    return;
                }
            }
            Ok(None) => {
                tracing::warn!(item = %item_name, "预检时项目已消失，停止等待");
                return;
            }
            Err(e) => {
                tracing::warn!(item = %item_name, error = %e, "预检查询失败，稍后重试");
            }
        }

        // Sleep outside the semaphore; jitter spreads synchronized polls.
        let jitter =
            rand::rng().random_range(0..=config.preflight_jitter_seconds.max(1) * 1000);
        tokio::time::sleep(interval + Duration::from_millis(jitter)).await;
    }

    tracing::warn!(
        item = %item_name,
        "预检超时，未能读取视频流数据，强制加入处理队列"
    );
    enqueue(&state, item_id, item_name, item_type);
}

fn enqueue(state: &Arc<AppState>, item_id: String, item_name: String, item_type: String) {
    state.webhook.batch.clone().enqueue(
        state.clone(),
        QueuedEvent {
            item_id,
            item_name,
            item_type,
        },
    );
}
