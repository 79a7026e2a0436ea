//! Watchlist processor
//!
//! Tracks series against the metadata provider's season list: missing
//! seasons, the next episode to air, completion, and revival when a brand
//! new season is announced. A manual force-end survives episode-count churn
//! but not a new season; that exception is deliberate.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use mediagate_providers::emby::{EmbyClient, MediaItem};
use mediagate_providers::moviepilot::{MoviePilotClient, SubscribeRequest};
use mediagate_providers::tmdb::{TmdbClient, TvDetails};

use crate::models::{NextEpisode, WatchlistEntry, WatchlistStatus};
use crate::repository::WatchlistRepository;
use crate::service::quota::DailyQuota;
use crate::task::TaskContext;
use crate::{Error, Result};

pub struct WatchlistProcessor {
    repo: WatchlistRepository,
    emby: Arc<EmbyClient>,
    tmdb: Arc<TmdbClient>,
    downloader: Option<Arc<MoviePilotClient>>,
    quota: Arc<DailyQuota>,
}

impl WatchlistProcessor {
    #[must_use]
    pub fn new(
        repo: WatchlistRepository,
        emby: Arc<EmbyClient>,
        tmdb: Arc<TmdbClient>,
        downloader: Option<Arc<MoviePilotClient>>,
        quota: Arc<DailyQuota>,
    ) -> Self {
        Self {
            repo,
            emby,
            tmdb,
            downloader,
            quota,
        }
    }

    #[must_use]
    pub const fn repository(&self) -> &WatchlistRepository {
        &self.repo
    }

    /// Called by the metadata processor when a series lands: start watching
    /// it unless it is already tracked.
    pub async fn add_from_item(&self, item: &MediaItem) -> Result<()> {
        if item.item_type != "Series" {
            return Ok(());
        }
        let Some(tmdb_id) = item.provider_id("Tmdb").map(str::to_string) else {
            return Ok(());
        };
        if self.repo.get(&item.id).await?.is_some() {
            return Ok(());
        }

        let entry = WatchlistEntry {
            emby_series_id: item.id.clone(),
            tmdb_id,
            title: item.name.clone(),
            status: WatchlistStatus::Watching,
            next_episode_to_air: None,
            missing_seasons: Vec::new(),
            last_known_season: 0,
            is_airing: false,
            last_checked_at: None,
        };
        self.repo.upsert(&entry).await?;
        tracing::info!(series = %item.name, "已加入智能追剧");
        Ok(())
    }

    /// Periodic scan. `include_ended` additionally revisits completed and
    /// force-ended entries (the weekly revival check).
    pub async fn scan(&self, ctx: &TaskContext, include_ended: bool) -> Result<()> {
        let entries = self.repo.scannable(include_ended).await?;
        let total = entries.len();
        for (idx, entry) in entries.into_iter().enumerate() {
            ctx.check_stop()?;
            ctx.update(
                (idx * 100 / total.max(1)) as i32,
                &format!("检查追剧 {}/{}: {}", idx + 1, total, entry.title),
            );
            if let Err(e) = self.refresh_entry(entry).await {
                if e.is_cancelled() {
                    return Err(e);
                }
                tracing::warn!(error = %e, "watchlist refresh failed for one entry");
            }
        }
        Ok(())
    }

    /// Webhook-driven refresh of one series by metadata ID.
    pub async fn refresh_by_tmdb(&self, tmdb_id: &str) -> Result<()> {
        if let Some(entry) = self.repo.get_by_tmdb_id(tmdb_id).await? {
            self.refresh_entry(entry).await?;
        }
        Ok(())
    }

    async fn refresh_entry(&self, mut entry: WatchlistEntry) -> Result<()> {
        let tmdb_id: i64 = entry
            .tmdb_id
            .parse()
            .map_err(|_| Error::InvalidInput(format!("bad tmdb id {}", entry.tmdb_id)))?;
        let details = self.tmdb.tv_details(tmdb_id, None).await?;

        let max_announced = max_regular_season(&details);
        let today = Utc::now().date_naive();
        let fully_aired = series_fully_aired(&details, today);

        entry.status = next_status(entry.status, max_announced, entry.last_known_season, fully_aired);
        entry.is_airing = !fully_aired || details.in_production;
        entry.next_episode_to_air = details.next_episode_to_air.as_ref().map(|e| NextEpisode {
            season_number: e.season_number,
            episode_number: e.episode_number,
            air_date: e
                .air_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            name: e.name.clone(),
        });

        entry.missing_seasons = self
            .compute_missing_seasons(&entry.emby_series_id, &details, today)
            .await;
        entry.last_known_season = entry.last_known_season.max(max_announced);
        entry.last_checked_at = Some(Utc::now());

        self.repo.upsert(&entry).await?;
        Ok(())
    }

    /// Announced seasons (specials excluded) that have started airing but
    /// have no counterpart in the library.
    async fn compute_missing_seasons(
        &self,
        emby_series_id: &str,
        details: &TvDetails,
        today: NaiveDate,
    ) -> Vec<i64> {
        let library_seasons: std::collections::HashSet<i64> = match self
            .emby
            .get_children(emby_series_id, Some("Season"), None, 0, 500)
            .await
        {
            Ok(page) => page
                .items
                .iter()
                .filter_map(|s| s.index_number.map(i64::from))
                .collect(),
            Err(e) => {
                tracing::debug!(emby_series_id, error = %e, "season listing failed");
                return Vec::new();
            }
        };

        details
            .seasons
            .iter()
            .filter(|s| s.season_number > 0)
            .filter(|s| {
                s.air_date
                    .as_deref()
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                    .is_some_and(|d| d <= today)
            })
            .map(|s| s.season_number)
            .filter(|n| !library_seasons.contains(n))
            .collect()
    }

    // ---- Manual operations (API surface) ----

    pub async fn force_end(&self, emby_series_id: &str) -> Result<()> {
        self.repo
            .set_status(emby_series_id, WatchlistStatus::ForceEnded)
            .await
    }

    /// Subscribe all missing seasons of one tracked series.
    pub async fn subscribe_gaps(&self, emby_series_id: &str) -> Result<usize> {
        let Some(entry) = self.repo.get(emby_series_id).await? else {
            return Err(Error::NotFound(format!(
                "series {emby_series_id} is not on the watchlist"
            )));
        };
        let mut submitted = 0;
        for season in &entry.missing_seasons {
            if self
                .subscribe_season(&entry.title, &entry.tmdb_id, *season)
                .await?
            {
                submitted += 1;
            }
        }
        Ok(submitted)
    }

    /// Subscribe a single season. Returns false when skipped on quota.
    pub async fn subscribe_season(
        &self,
        title: &str,
        tmdb_id: &str,
        season: i64,
    ) -> Result<bool> {
        let Some(downloader) = &self.downloader else {
            return Err(Error::InvalidInput("downloader is not configured".into()));
        };
        if !self.quota.try_acquire() {
            tracing::info!(title, season, "subscription quota exhausted, skipping");
            return Ok(false);
        }
        let tmdb: i64 = tmdb_id
            .parse()
            .map_err(|_| Error::InvalidInput(format!("bad tmdb id {tmdb_id}")))?;
        downloader
            .subscribe(&SubscribeRequest::series(title, tmdb, Some(season)))
            .await?;
        Ok(true)
    }
}

/// The highest announced non-special season number.
fn max_regular_season(details: &TvDetails) -> i64 {
    details
        .seasons
        .iter()
        .filter(|s| s.season_number > 0)
        .map(|s| s.season_number)
        .max()
        .unwrap_or(0)
}

/// Whether the series has nothing further scheduled.
fn series_fully_aired(details: &TvDetails, today: NaiveDate) -> bool {
    if details.next_episode_to_air.is_some() {
        return false;
    }
    if matches!(details.status.as_deref(), Some("Ended" | "Canceled")) {
        return true;
    }
    details
        .last_air_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .is_some_and(|d| d <= today)
}

/// The status transition function.
///
/// Revival fires on a newly *announced* season: any season number above the
/// recorded maximum reopens the entry, including a force-ended one.
fn next_status(
    current: WatchlistStatus,
    max_announced_season: i64,
    last_known_season: i64,
    fully_aired: bool,
) -> WatchlistStatus {
    if current.is_ended() {
        if max_announced_season > last_known_season {
            return WatchlistStatus::Watching;
        }
        return current;
    }
    if current == WatchlistStatus::Watching
        && fully_aired
        && max_announced_season <= last_known_season
    {
        return WatchlistStatus::Completed;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediagate_providers::tmdb::{EpisodeSummary, SeasonSummary};

    fn details_with(seasons: &[(i64, &str)], status: &str, next: bool) -> TvDetails {
        TvDetails {
            seasons: seasons
                .iter()
                .map(|(n, air)| SeasonSummary {
                    season_number: *n,
                    episode_count: 8,
                    air_date: Some((*air).to_string()),
                    name: None,
                })
                .collect(),
            status: Some(status.to_string()),
            next_episode_to_air: next.then(EpisodeSummary::default),
            ..Default::default()
        }
    }

    #[test]
    fn test_max_regular_season_skips_specials() {
        let details = details_with(&[(0, "2020-01-01"), (1, "2020-02-01"), (2, "2021-02-01")], "Ended", false);
        assert_eq!(max_regular_season(&details), 2);
    }

    #[test]
    fn test_fully_aired() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        let ended = details_with(&[(1, "2020-02-01")], "Ended", false);
        assert!(series_fully_aired(&ended, today));

        let upcoming = details_with(&[(1, "2020-02-01")], "Returning Series", true);
        assert!(!series_fully_aired(&upcoming, today));
    }

    #[test]
    fn test_watching_completes_when_aired_out() {
        let status = next_status(WatchlistStatus::Watching, 2, 2, true);
        assert_eq!(status, WatchlistStatus::Completed);
    }

    #[test]
    fn test_watching_stays_open_while_airing() {
        let status = next_status(WatchlistStatus::Watching, 2, 2, false);
        assert_eq!(status, WatchlistStatus::Watching);
    }

    #[test]
    fn test_completed_revives_on_new_season() {
        let status = next_status(WatchlistStatus::Completed, 3, 2, true);
        assert_eq!(status, WatchlistStatus::Watching);
    }

    #[test]
    fn test_force_ended_revives_only_on_new_season() {
        // Episode-count changes (same max season) never reopen a manual end.
        assert_eq!(
            next_status(WatchlistStatus::ForceEnded, 2, 2, false),
            WatchlistStatus::ForceEnded
        );
        // A brand-new season does; this exception is intentional.
        assert_eq!(
            next_status(WatchlistStatus::ForceEnded, 3, 2, true),
            WatchlistStatus::Watching
        );
    }

    #[test]
    fn test_paused_is_left_alone() {
        assert_eq!(
            next_status(WatchlistStatus::Paused, 5, 2, true),
            WatchlistStatus::Paused
        );
    }
}
