//! Per-item update debouncers
//!
//! `metadata.update` and `image.update` storms collapse onto one timer per
//! resolved parent; a newer event kills the older timer so only the latest
//! fires. Coalesced image events lose their individual descriptions.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use mediagate_core::task::ProcessorKind;

use crate::AppState;

/// Description used once image events have been merged; no single event's
/// text describes the batch anymore.
pub const COALESCED_IMAGE_DESCRIPTION: &str = "Multiple image updates detected";

#[derive(Default)]
pub struct UpdateDebouncers {
    timers: DashMap<String, JoinHandle<()>>,
}

impl UpdateDebouncers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any pending timer for `key`; returns whether one existed.
    fn replace(&self, key: String, handle: JoinHandle<()>) -> bool {
        match self.timers.insert(key, handle) {
            Some(previous) => {
                previous.abort();
                true
            }
            None => false,
        }
    }

    fn finish(&self, key: &str) {
        self.timers.remove(key);
    }
}

pub fn schedule_metadata_sync(state: Arc<AppState>, item_id: String, item_name: String) {
    let delay = Duration::from_secs(state.config.webhook.update_debounce_seconds);
    let key = format!("metadata:{item_id}");

    let timers = state.webhook.updates.clone();
    let timer_key = key.clone();
    let handle = tokio::spawn({
        let state = state.clone();
        async move {
            tokio::time::sleep(delay).await;
            state.webhook.updates.finish(&timer_key);
            tracing::info!(item = %item_name, "防抖计时器到期，执行元数据同步");
            let metadata = state.metadata.clone();
            let id = item_id.clone();
            state.queue.submit(
                format!("元数据同步: {item_name}"),
                ProcessorKind::Media,
                move |_ctx| Box::pin(async move { metadata.sync_metadata_cache(&id).await }),
            );
        }
    });
    if timers.replace(key, handle) {
        tracing::debug!("已取消旧的元数据同步计时器，以最新事件为准");
    }
}

pub fn schedule_image_sync(
    state: Arc<AppState>,
    item_id: String,
    item_name: String,
    description: String,
) {
    let delay = Duration::from_secs(state.config.webhook.update_debounce_seconds);
    let key = format!("image:{item_id}");

    // Coalescing decision happens at schedule time: if a timer is already
    // pending, the merged batch no longer matches any single description.
    let had_previous = state.webhook.updates.timers.contains_key(&key);
    let effective_description = if had_previous {
        COALESCED_IMAGE_DESCRIPTION.to_string()
    } else {
        description
    };

    let timers = state.webhook.updates.clone();
    let timer_key = key.clone();
    let handle = tokio::spawn({
        let state = state.clone();
        async move {
            tokio::time::sleep(delay).await;
            state.webhook.updates.finish(&timer_key);
            tracing::info!(
                item = %item_name,
                description = %effective_description,
                "防抖计时器到期，执行图片同步"
            );
            let metadata = state.metadata.clone();
            let id = item_id.clone();
            state.queue.submit(
                format!("图片同步: {item_name}"),
                ProcessorKind::Media,
                move |_ctx| Box::pin(async move { metadata.sync_metadata_cache(&id).await }),
            );
        }
    });
    if timers.replace(key, handle) {
        tracing::info!("检测到图片更新事件合并，描述已升级为通用文本");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_last_writer_wins() {
        // Rapid events for one key leave exactly one live timer: the
        // latest. Earlier timers are aborted before they fire.
        let debouncers = UpdateDebouncers::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            let fired = fired.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                fired.fetch_add(1, Ordering::SeqCst);
                // Only the last scheduled timer should get here.
                assert_eq!(i, 4);
            });
            debouncers.replace("series-1".to_string(), handle);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_independent_keys_do_not_interfere() {
        let debouncers = UpdateDebouncers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for key in ["a", "b", "c"] {
            let fired = fired.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                fired.fetch_add(1, Ordering::SeqCst);
            });
            debouncers.replace(key.to_string(), handle);
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }
}
