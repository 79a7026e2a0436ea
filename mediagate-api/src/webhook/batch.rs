//! New-item batch debouncer
//!
//! Events for new media accumulate in one queue; each enqueue restarts a
//! short timer, and when it fires the batch is deduplicated by parent
//! (episodes fold into their series, keeping the concrete episode IDs on
//! the parent's record) and dispatched.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use mediagate_core::task::ProcessorKind;

use crate::AppState;

#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub item_id: String,
    pub item_name: String,
    pub item_type: String,
}

#[derive(Default)]
pub struct BatchDebouncer {
    queue: Mutex<Vec<QueuedEvent>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// One parent's accumulated batch record.
#[derive(Debug, Default, Clone)]
struct ParentRecord {
    name: String,
    item_type: String,
    episode_ids: HashSet<String>,
}

impl BatchDebouncer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and restart the debounce timer.
    pub fn enqueue(self: &Arc<Self>, state: Arc<AppState>, event: QueuedEvent) {
        let backlog = {
            let mut queue = self.queue.lock();
            queue.push(event);
            queue.len()
        };
        tracing::debug!(backlog, "入库事件已加入批处理队列");

        let delay = Duration::from_secs(state.config.webhook.batch_debounce_seconds);
        let debouncer = self.clone();
        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debouncer.flush(state).await;
        }));
    }

    /// Timer expiry: drain, dedup by parent, dispatch.
    async fn flush(self: Arc<Self>, state: Arc<AppState>) {
        let events: Vec<QueuedEvent> = {
            let mut queue = self.queue.lock();
            std::mem::take(&mut *queue)
        };
        if events.is_empty() {
            return;
        }
        tracing::info!(count = events.len(), "防抖计时器到期，开始批量处理入库事件");

        let mut parents: HashMap<String, ParentRecord> = HashMap::new();
        for event in events {
            if event.item_type == "Episode" {
                let series_id = match state.emby.get_series_id_for_child(&event.item_id).await {
                    Ok(Some(series_id)) => series_id,
                    _ => {
                        tracing::warn!(episode = %event.item_name, "分集未找到所属剧集，跳过");
                        continue;
                    }
                };
                let record = parents.entry(series_id.clone()).or_default();
                record.item_type = "Series".to_string();
                record.episode_ids.insert(event.item_id);
                if record.name.is_empty() {
                    record.name = state
                        .emby
                        .get_item(&series_id, None)
                        .await
                        .ok()
                        .flatten()
                        .map_or(event.item_name, |item| item.name);
                }
            } else {
                let record = parents.entry(event.item_id.clone()).or_default();
                record.name = event.item_name;
                record.item_type = event.item_type;
            }
        }

        tracing::info!(parents = parents.len(), "批量事件去重完成，开始分派任务");
        for (parent_id, record) in parents {
            dispatch_parent(&state, parent_id, record);
        }
    }
}

/// Per-parent dispatch: first sight gets the full processing flow; known
/// parents get light syncs (plus cast apply and a watchlist refresh for
/// series with fresh episodes).
fn dispatch_parent(state: &Arc<AppState>, parent_id: String, record: ParentRecord) {
    let episode_ids: Vec<String> = record.episode_ids.into_iter().collect();

    if !state.metadata.is_processed(&parent_id) {
        tracing::info!(parent = %record.name, "分派完整处理任务 (首次入库)");
        let metadata = state.metadata.clone();
        let recommender = state.recommender.clone();
        let id = parent_id.clone();
        state.queue.submit(
            format!("Webhook完整处理: {}", record.name),
            ProcessorKind::Media,
            move |ctx| {
                Box::pin(async move {
                    metadata.process(&ctx, &id, false).await?;
                    // New library content changes the recommendation pool.
                    recommender.invalidate_cache();
                    Ok(())
                })
            },
        );
        return;
    }

    if record.item_type == "Series" && !episode_ids.is_empty() {
        tracing::info!(
            parent = %record.name,
            episodes = episode_ids.len(),
            "分派轻量化更新任务 (追更)"
        );
        let metadata = state.metadata.clone();
        let series_id = parent_id.clone();
        let ids = episode_ids.clone();
        state.queue.submit(
            format!("轻量化同步演员表: {}", record.name),
            ProcessorKind::Media,
            move |ctx| {
                Box::pin(async move {
                    metadata
                        .apply_main_cast_to_episodes(&ctx, &series_id, &ids)
                        .await
                })
            },
        );

        submit_light_sync(state, &parent_id, &record.name);

        // Watchlist refresh needs the series' metadata ID.
        let media_repo = state.media_repo.clone();
        let watchlist = state.watchlist.clone();
        let series_id = parent_id.clone();
        let name = record.name.clone();
        state.queue.submit(
            format!("刷新智能追剧: {}", record.name),
            ProcessorKind::Watchlist,
            move |_ctx| {
                Box::pin(async move {
                    match media_repo.get_by_emby_id(&series_id).await? {
                        Some(meta) => watchlist.refresh_by_tmdb(&meta.tmdb_id).await,
                        None => {
                            tracing::warn!(series = %name, "无法获取元数据ID，跳过追剧刷新");
                            Ok(())
                        }
                    }
                })
            },
        );
    } else {
        tracing::info!(parent = %record.name, "已处理过，分派轻量元数据更新");
        submit_light_sync(state, &parent_id, &record.name);
    }
}

fn submit_light_sync(state: &Arc<AppState>, item_id: &str, name: &str) {
    let metadata = state.metadata.clone();
    let id = item_id.to_string();
    state.queue.submit(
        format!("Webhook元数据更新: {name}"),
        ProcessorKind::Media,
        move |_ctx| Box::pin(async move { metadata.sync_metadata_cache(&id).await }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_record_accumulates_episodes() {
        let mut record = ParentRecord::default();
        record.episode_ids.insert("e1".into());
        record.episode_ids.insert("e2".into());
        record.episode_ids.insert("e1".into());
        assert_eq!(record.episode_ids.len(), 2);
    }
}
