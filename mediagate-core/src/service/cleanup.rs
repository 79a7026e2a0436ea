//! Duplicate-version cleanup and quality-upgrade resubscription

use std::sync::Arc;

use mediagate_providers::emby::EmbyClient;
use mediagate_providers::moviepilot::{MoviePilotClient, SubscribeRequest};

use crate::models::{ItemType, MediaVersion};
use crate::repository::{CleanupRepository, MediaRepository};
use crate::service::quota::DailyQuota;
use crate::task::TaskContext;
use crate::{Error, Result};

/// Below this width a kept version is considered upgrade-worthy.
const UPGRADE_WIDTH_THRESHOLD: i64 = 1920;

pub struct CleanupScanner {
    cleanup: CleanupRepository,
    media: MediaRepository,
    emby: Arc<EmbyClient>,
    downloader: Option<Arc<MoviePilotClient>>,
    quota: Arc<DailyQuota>,
    admin_username: String,
    admin_password: String,
}

impl CleanupScanner {
    #[must_use]
    pub fn new(
        cleanup: CleanupRepository,
        media: MediaRepository,
        emby: Arc<EmbyClient>,
        downloader: Option<Arc<MoviePilotClient>>,
        quota: Arc<DailyQuota>,
        admin_username: String,
        admin_password: String,
    ) -> Self {
        Self {
            cleanup,
            media,
            emby,
            downloader,
            quota,
            admin_username,
            admin_password,
        }
    }

    #[must_use]
    pub const fn repository(&self) -> &CleanupRepository {
        &self.cleanup
    }

    /// Scan the metadata cache for rows backed by multiple colocated
    /// library items and record a cleanup task per duplicate set.
    pub async fn scan(&self, ctx: &TaskContext) -> Result<()> {
        for item_type in [ItemType::Movie, ItemType::Series] {
            let rows = self.media.get_all_in_library(item_type).await?;
            let total = rows.len();
            for (idx, meta) in rows.into_iter().enumerate() {
                if idx % 100 == 0 {
                    ctx.check_stop()?;
                    ctx.update(
                        (idx * 100 / total.max(1)) as i32,
                        &format!("扫描重复版本 {}/{}", idx + 1, total),
                    );
                }
                if meta.emby_item_ids.len() < 2 {
                    self.cleanup.remove(&meta.tmdb_id, meta.item_type).await?;
                    continue;
                }

                let versions = self.collect_versions(&meta.emby_item_ids).await;
                if versions.len() < 2 {
                    continue;
                }
                let best = versions
                    .iter()
                    .max_by_key(|v| v.quality_key())
                    .map(|v| v.emby_item_id.clone());
                self.cleanup
                    .upsert(&meta.tmdb_id, meta.item_type, &meta.title, &versions, best.as_deref())
                    .await?;
            }
        }
        Ok(())
    }

    async fn collect_versions(&self, emby_item_ids: &[String]) -> Vec<MediaVersion> {
        let mut versions = Vec::with_capacity(emby_item_ids.len());
        for id in emby_item_ids {
            let Ok(Some(item)) = self.emby.get_item(id, Some("MediaSources,Path")).await else {
                continue;
            };
            let source = item.media_sources.first();
            let video = source.and_then(|s| {
                s.media_streams
                    .iter()
                    .find(|m| m.stream_type.as_deref() == Some("Video"))
            });
            versions.push(MediaVersion {
                emby_item_id: id.clone(),
                path: item.path.clone(),
                container: source.and_then(|s| s.container.clone()),
                width: video.and_then(|v| v.width),
                bitrate: source.and_then(|s| s.bitrate),
                size_bytes: source.and_then(|s| s.size),
            });
        }
        versions
    }

    /// Delete every non-best version of one cleanup task. Item deletion
    /// needs an admin access token, obtained via login.
    pub async fn execute_task(&self, task_id: i64) -> Result<usize> {
        let task = self
            .cleanup
            .get(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("cleanup task {task_id}")))?;
        let Some(best) = &task.best_version_id else {
            return Err(Error::InvalidInput(
                "task has no best version selected".to_string(),
            ));
        };

        let (token, _) = self
            .emby
            .authenticate_by_name(&self.admin_username, &self.admin_password)
            .await?;

        let mut deleted = 0;
        for version in &task.versions {
            if &version.emby_item_id == best {
                continue;
            }
            match self.emby.delete_item(&version.emby_item_id, &token).await {
                Ok(()) => {
                    self.media
                        .remove_library_item(&version.emby_item_id)
                        .await?;
                    deleted += 1;
                }
                Err(e) => {
                    tracing::error!(item = %version.emby_item_id, error = %e, "version delete failed");
                }
            }
        }
        self.cleanup.set_status(task_id, "done").await?;
        Ok(deleted)
    }

    /// Quality upgrade pass: resubscribe in-library items whose best
    /// version is below the width threshold, flagged `best_version=1`.
    pub async fn resubscribe_low_quality(&self, ctx: &TaskContext) -> Result<usize> {
        let Some(downloader) = &self.downloader else {
            tracing::info!("downloader not configured, resubscribe skipped");
            return Ok(0);
        };

        let mut submitted = 0;
        let rows = self.media.get_all_in_library(ItemType::Movie).await?;
        let total = rows.len();
        for (idx, meta) in rows.into_iter().enumerate() {
            if idx % 100 == 0 {
                ctx.check_stop()?;
                ctx.update(
                    (idx * 100 / total.max(1)) as i32,
                    &format!("洗版扫描 {}/{}", idx + 1, total),
                );
            }
            let versions = self.collect_versions(&meta.emby_item_ids).await;
            let best_width = versions.iter().filter_map(|v| v.width).max().unwrap_or(0);
            if best_width == 0 || best_width >= UPGRADE_WIDTH_THRESHOLD {
                continue;
            }
            let Ok(tmdb) = meta.tmdb_id.parse::<i64>() else {
                continue;
            };
            if !self.quota.try_acquire() {
                tracing::info!("subscription quota exhausted, resubscribe pass ends");
                break;
            }
            let request = SubscribeRequest::movie(&meta.title, tmdb).with_best_version();
            match downloader.subscribe(&request).await {
                Ok(()) => submitted += 1,
                Err(e) => tracing::warn!(title = %meta.title, error = %e, "resubscribe failed"),
            }
        }
        Ok(submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_version_by_quality_key() {
        let versions = [
            MediaVersion {
                emby_item_id: "sd".into(),
                path: None,
                container: None,
                width: Some(720),
                bitrate: Some(1_500),
                size_bytes: Some(700),
            },
            MediaVersion {
                emby_item_id: "hd".into(),
                path: None,
                container: None,
                width: Some(1920),
                bitrate: Some(8_000),
                size_bytes: Some(4_000),
            },
        ];
        let best = versions.iter().max_by_key(|v| v.quality_key()).expect("some");
        assert_eq!(best.emby_item_id, "hd");
    }

    #[test]
    fn test_upgrade_threshold() {
        assert!(1280 < UPGRADE_WIDTH_THRESHOLD);
        assert!(1920 >= UPGRADE_WIDTH_THRESHOLD);
    }
}
