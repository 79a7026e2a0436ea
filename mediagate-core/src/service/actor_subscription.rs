//! Actor subscription processor
//!
//! For each tracked actor: pull the filmography, dedupe titles, enrich TV
//! billing order, classify every work against the subscription's filter and
//! the library, and reconcile subscription sources on the metadata cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};

use mediagate_providers::tmdb::{FilmographyEntry, TmdbClient};

use crate::models::{
    ActorSubscription, ItemType, MediaMetadata, SubscriptionFilter, SubscriptionSource,
    SubscriptionStatus, TrackedMedia, TrackedStatus,
};
use crate::repository::MediaRepository;
use crate::service::cast::{contains_cjk, normalize_name};
use crate::task::TaskContext;
use crate::{Error, Result};

/// Bounded concurrency for per-title detail fetches.
const ORDER_ENRICH_CONCURRENCY: usize = 5;

pub struct ActorSubscriptionProcessor {
    tmdb: Arc<TmdbClient>,
    media: MediaRepository,
    pool: sqlx::PgPool,
}

impl ActorSubscriptionProcessor {
    #[must_use]
    pub fn new(tmdb: Arc<TmdbClient>, media: MediaRepository, pool: sqlx::PgPool) -> Self {
        Self { tmdb, media, pool }
    }

    // ---- Subscription CRUD ----

    pub async fn create_subscription(
        &self,
        tmdb_person_id: i64,
        actor_name: &str,
        filter: &SubscriptionFilter,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO actor_subscriptions (tmdb_person_id, actor_name, filter)
             VALUES ($1, $2, $3)
             ON CONFLICT (tmdb_person_id) DO UPDATE SET
                actor_name = EXCLUDED.actor_name,
                filter = EXCLUDED.filter,
                enabled = TRUE
             RETURNING id",
        )
        .bind(tmdb_person_id)
        .bind(actor_name)
        .bind(serde_json::to_value(filter)?)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Option<ActorSubscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT id, tmdb_person_id, actor_name, enabled, filter, last_checked_at
             FROM actor_subscriptions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SubscriptionRow::into_model).transpose()
    }

    pub async fn all_subscriptions(&self) -> Result<Vec<ActorSubscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT id, tmdb_person_id, actor_name, enabled, filter, last_checked_at
             FROM actor_subscriptions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SubscriptionRow::into_model).collect()
    }

    pub async fn delete_subscription(&self, id: i64) -> Result<bool> {
        // Detach the source from every tracked work before the rows go.
        let tracked = self.tracked_media(id).await?;
        for work in &tracked {
            self.media
                .remove_subscription_source(&work.tmdb_id, work.item_type, "actor", &id.to_string())
                .await?;
        }
        let result = sqlx::query("DELETE FROM actor_subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn tracked_media(&self, subscription_id: i64) -> Result<Vec<TrackedMedia>> {
        let rows = sqlx::query_as::<_, TrackedRow>(
            "SELECT subscription_id, tmdb_id, item_type, title, release_date, season_number,
                    status, ignore_reason, emby_item_id
             FROM tracked_media WHERE subscription_id = $1 ORDER BY release_date DESC NULLS LAST",
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TrackedRow::into_model).collect()
    }

    pub async fn override_tracked_status(
        &self,
        subscription_id: i64,
        tmdb_id: &str,
        item_type: ItemType,
        status: TrackedStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE tracked_media SET status = $4, ignore_reason = NULL
             WHERE subscription_id = $1 AND tmdb_id = $2 AND item_type = $3",
        )
        .bind(subscription_id)
        .bind(tmdb_id)
        .bind(item_type.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- Scanning ----

    /// Scan every enabled subscription.
    pub async fn scan_all(&self, ctx: &TaskContext) -> Result<()> {
        let subs = self.all_subscriptions().await?;
        let enabled: Vec<_> = subs.into_iter().filter(|s| s.enabled).collect();
        let total = enabled.len();
        for (idx, sub) in enabled.into_iter().enumerate() {
            ctx.check_stop()?;
            ctx.update(
                (idx * 100 / total.max(1)) as i32,
                &format!("扫描演员订阅 {}/{}: {}", idx + 1, total, sub.actor_name),
            );
            if let Err(e) = self.scan_subscription(ctx, &sub).await {
                if e.is_cancelled() {
                    return Err(e);
                }
                tracing::warn!(actor = %sub.actor_name, error = %e, "actor scan failed");
            }
        }
        Ok(())
    }

    /// Full scan of one subscription.
    pub async fn scan_subscription(
        &self,
        ctx: &TaskContext,
        sub: &ActorSubscription,
    ) -> Result<()> {
        let credits = self.tmdb.person_combined_credits(sub.tmdb_person_id).await?;
        let works = dedup_filmography(credits.cast);
        let works = self.enrich_tv_order(ctx, works, sub.tmdb_person_id).await;

        let today = Utc::now().date_naive();
        let existing: HashMap<(String, String), TrackedMedia> = self
            .tracked_media(sub.id)
            .await?
            .into_iter()
            .map(|t| ((t.tmdb_id.clone(), t.item_type.as_str().to_string()), t))
            .collect();

        let mut current_keys = HashSet::new();
        for work in &works {
            ctx.check_stop()?;
            let item_type = if work.is_movie() {
                ItemType::Movie
            } else {
                ItemType::Series
            };
            let tmdb_id = work.id.to_string();
            current_keys.insert((tmdb_id.clone(), item_type.as_str().to_string()));

            let (status, ignore_reason) = self
                .classify_work(work, item_type, &sub.filter, today)
                .await?;

            self.upsert_tracked(sub.id, work, item_type, status, ignore_reason.as_deref())
                .await?;

            // New missing/pending works gain the subscription source.
            if matches!(status, TrackedStatus::Missing | TrackedStatus::PendingRelease) {
                self.ensure_metadata_stub(work, item_type).await?;
                self.media
                    .add_subscription_source(
                        &tmdb_id,
                        item_type,
                        &SubscriptionSource::actor(sub.id, &sub.actor_name),
                        SubscriptionStatus::Wanted,
                    )
                    .await?;
            }
        }

        // Works that fell out of the filmography lose this source.
        for (key, stale) in &existing {
            if !current_keys.contains(key) {
                self.media
                    .remove_subscription_source(
                        &stale.tmdb_id,
                        stale.item_type,
                        "actor",
                        &sub.id.to_string(),
                    )
                    .await?;
                sqlx::query(
                    "DELETE FROM tracked_media
                     WHERE subscription_id = $1 AND tmdb_id = $2 AND item_type = $3",
                )
                .bind(sub.id)
                .bind(&stale.tmdb_id)
                .bind(stale.item_type.as_str())
                .execute(&self.pool)
                .await?;
            }
        }

        sqlx::query("UPDATE actor_subscriptions SET last_checked_at = NOW() WHERE id = $1")
            .bind(sub.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Combined credits under-report TV billing order; fetch each TV
    /// title's credits to find the actor's slot, five at a time.
    async fn enrich_tv_order(
        &self,
        ctx: &TaskContext,
        works: Vec<FilmographyEntry>,
        person_id: i64,
    ) -> Vec<FilmographyEntry> {
        let (tv, movies): (Vec<_>, Vec<_>) = works.into_iter().partition(|w| !w.is_movie());

        let tmdb = self.tmdb.clone();
        let enriched: Vec<FilmographyEntry> = stream::iter(tv.into_iter().map(|mut work| {
            let tmdb = tmdb.clone();
            let stop = ctx.stop.clone();
            async move {
                if work.order.is_some() || stop.is_stop_requested() {
                    return work;
                }
                if let Ok(details) = tmdb.tv_details(work.id, Some("credits")).await {
                    if let Some(credits) = details.credits {
                        work.order = credits
                            .cast
                            .iter()
                            .find(|c| c.id == person_id)
                            .and_then(|c| c.order);
                    }
                }
                work
            }
        }))
        .buffer_unordered(ORDER_ENRICH_CONCURRENCY)
        .collect()
        .await;

        let mut all = movies;
        all.extend(enriched);
        all
    }

    async fn classify_work(
        &self,
        work: &FilmographyEntry,
        item_type: ItemType,
        filter: &SubscriptionFilter,
        today: NaiveDate,
    ) -> Result<(TrackedStatus, Option<String>)> {
        if let Some(reason) = filter_reject_reason(work, item_type, filter) {
            return Ok((TrackedStatus::Ignored, Some(reason)));
        }

        let tmdb_id = work.id.to_string();
        if let Some(meta) = self.media.get(&tmdb_id, item_type).await? {
            if meta.in_library {
                return Ok((TrackedStatus::InLibrary, None));
            }
        }

        let released = work
            .date()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .is_some_and(|d| d <= today);
        if released {
            Ok((TrackedStatus::Missing, None))
        } else {
            Ok((TrackedStatus::PendingRelease, None))
        }
    }

    async fn upsert_tracked(
        &self,
        subscription_id: i64,
        work: &FilmographyEntry,
        item_type: ItemType,
        status: TrackedStatus,
        ignore_reason: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO tracked_media
                (subscription_id, tmdb_id, item_type, title, release_date, status, ignore_reason)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (subscription_id, tmdb_id, item_type) DO UPDATE SET
                title = EXCLUDED.title,
                release_date = EXCLUDED.release_date,
                status = EXCLUDED.status,
                ignore_reason = EXCLUDED.ignore_reason",
        )
        .bind(subscription_id)
        .bind(work.id.to_string())
        .bind(item_type.as_str())
        .bind(work.display_title())
        .bind(work.date())
        .bind(status.as_str())
        .bind(ignore_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Missing works need a metadata row to hang the subscription source
    /// on; create a minimal out-of-library one.
    async fn ensure_metadata_stub(
        &self,
        work: &FilmographyEntry,
        item_type: ItemType,
    ) -> Result<()> {
        let tmdb_id = work.id.to_string();
        if self.media.get(&tmdb_id, item_type).await?.is_some() {
            return Ok(());
        }
        let mut meta = MediaMetadata::new(tmdb_id, item_type, work.display_title());
        meta.release_date = work
            .date()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        meta.release_year = meta.release_date.map(|d| {
            use chrono::Datelike;
            d.year()
        });
        meta.rating = Some(work.vote_average);
        self.media.upsert(&meta).await?;
        Ok(())
    }
}

/// Deduplicate within normalized-title buckets, keeping the most popular
/// entry of each bucket.
fn dedup_filmography(cast: Vec<FilmographyEntry>) -> Vec<FilmographyEntry> {
    let mut buckets: HashMap<String, FilmographyEntry> = HashMap::new();
    for work in cast {
        let title = work.display_title().to_string();
        if title.is_empty() {
            continue;
        }
        let key = format!(
            "{}:{}",
            if work.is_movie() { "movie" } else { "tv" },
            normalize_name(&title)
        );
        match buckets.get(&key) {
            Some(existing) if existing.popularity >= work.popularity => {}
            _ => {
                buckets.insert(key, work);
            }
        }
    }
    let mut works: Vec<_> = buckets.into_values().collect();
    works.sort_by(|a, b| b.popularity.total_cmp(&a.popularity));
    works
}

/// Apply the subscription filter; `Some(reason)` means rejected.
fn filter_reject_reason(
    work: &FilmographyEntry,
    item_type: ItemType,
    filter: &SubscriptionFilter,
) -> Option<String> {
    let Some(date) = work.date() else {
        return Some("缺少发行日期".to_string());
    };
    if filter.start_year > 0 {
        if let Some(year) = date
            .split('-')
            .next()
            .and_then(|y| y.parse::<i32>().ok())
        {
            if year < filter.start_year {
                return Some(format!("发行年份早于 {}", filter.start_year));
            }
        }
    }

    if !filter.media_types.is_empty() && !filter.media_types.contains(&item_type) {
        return Some("排除的媒体类型".to_string());
    }

    let genres: HashSet<i64> = work.genre_ids.iter().copied().collect();
    if !filter.genres_exclude.is_empty()
        && filter.genres_exclude.iter().any(|g| genres.contains(g))
    {
        return Some("排除的题材".to_string());
    }
    if !filter.genres_include.is_empty()
        && !filter.genres_include.iter().any(|g| genres.contains(g))
    {
        return Some("不包含指定的题材".to_string());
    }

    if filter.min_rating > 0.0 {
        // Sparse vote counts exempt a work from the rating floor.
        let exempted = work.vote_count < filter.min_vote_count || work.vote_average == 0.0;
        if !exempted && work.vote_average < filter.min_rating {
            return Some(format!(
                "评分过低 ({:.1}, {}人评价)",
                work.vote_average, work.vote_count
            ));
        }
    }

    if filter.chinese_title_only && !contains_cjk(work.display_title()) {
        return Some("缺少中文标题".to_string());
    }

    if filter.main_role_only {
        let order = work.order.unwrap_or(999);
        if order >= 3 {
            return Some(format!("非主演 (番位: {})", order + 1));
        }
    }

    None
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: i64,
    tmdb_person_id: i64,
    actor_name: String,
    enabled: bool,
    filter: serde_json::Value,
    last_checked_at: Option<chrono::DateTime<Utc>>,
}

impl SubscriptionRow {
    fn into_model(self) -> Result<ActorSubscription> {
        Ok(ActorSubscription {
            id: self.id,
            tmdb_person_id: self.tmdb_person_id,
            actor_name: self.actor_name,
            enabled: self.enabled,
            filter: serde_json::from_value(self.filter).unwrap_or_default(),
            last_checked_at: self.last_checked_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrackedRow {
    subscription_id: i64,
    tmdb_id: String,
    item_type: String,
    title: String,
    release_date: Option<String>,
    season_number: Option<i64>,
    status: String,
    ignore_reason: Option<String>,
    emby_item_id: Option<String>,
}

impl TrackedRow {
    fn into_model(self) -> Result<TrackedMedia> {
        Ok(TrackedMedia {
            subscription_id: self.subscription_id,
            item_type: ItemType::parse(&self.item_type)
                .ok_or_else(|| Error::Internal(format!("unknown item type {}", self.item_type)))?,
            status: TrackedStatus::parse(&self.status)
                .ok_or_else(|| Error::Internal(format!("unknown tracked status {}", self.status)))?,
            tmdb_id: self.tmdb_id,
            title: self.title,
            release_date: self.release_date,
            season_number: self.season_number,
            ignore_reason: self.ignore_reason,
            emby_item_id: self.emby_item_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work(title: &str, movie: bool, popularity: f64) -> FilmographyEntry {
        FilmographyEntry {
            id: 1,
            media_type: Some(if movie { "movie" } else { "tv" }.to_string()),
            title: movie.then(|| title.to_string()),
            name: (!movie).then(|| title.to_string()),
            release_date: movie.then(|| "2022-01-01".to_string()),
            first_air_date: (!movie).then(|| "2022-01-01".to_string()),
            popularity,
            vote_average: 7.5,
            vote_count: 500,
            ..Default::default()
        }
    }

    #[test]
    fn test_dedup_keeps_most_popular_per_title() {
        let works = dedup_filmography(vec![
            work("满江红", true, 10.0),
            work("满 江 红", true, 50.0),
            work("满江红", false, 5.0),
        ]);
        // The two movie spellings collapse; the TV entry is a separate
        // bucket.
        assert_eq!(works.len(), 2);
        let movie = works.iter().find(|w| w.is_movie()).expect("movie kept");
        assert!((movie.popularity - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_filter_rejects_by_year_and_type() {
        let mut filter = SubscriptionFilter {
            start_year: 2023,
            ..Default::default()
        };
        let w = work("流浪地球", true, 1.0);
        assert!(filter_reject_reason(&w, ItemType::Movie, &filter).is_some());

        filter.start_year = 0;
        filter.media_types = vec![ItemType::Series];
        assert_eq!(
            filter_reject_reason(&w, ItemType::Movie, &filter).as_deref(),
            Some("排除的媒体类型")
        );
    }

    #[test]
    fn test_filter_rating_floor_with_vote_exemption() {
        let filter = SubscriptionFilter {
            min_rating: 8.0,
            min_vote_count: 100,
            chinese_title_only: false,
            ..Default::default()
        };
        // 7.5 with 500 votes: below floor, not exempt.
        let popular = work("Some Film", true, 1.0);
        assert!(filter_reject_reason(&popular, ItemType::Movie, &filter)
            .is_some_and(|r| r.contains("评分过低")));

        // Same rating with 5 votes: exempt.
        let obscure = FilmographyEntry {
            vote_count: 5,
            ..work("Obscure Film", true, 1.0)
        };
        assert!(filter_reject_reason(&obscure, ItemType::Movie, &filter).is_none());
    }

    #[test]
    fn test_filter_chinese_title_requirement() {
        let filter = SubscriptionFilter::default();
        let latin = work("Latin Only", true, 1.0);
        assert_eq!(
            filter_reject_reason(&latin, ItemType::Movie, &filter).as_deref(),
            Some("缺少中文标题")
        );
        let chinese = work("满江红", true, 1.0);
        assert!(filter_reject_reason(&chinese, ItemType::Movie, &filter).is_none());
    }

    #[test]
    fn test_filter_main_role_cutoff() {
        let filter = SubscriptionFilter {
            main_role_only: true,
            chinese_title_only: false,
            ..Default::default()
        };
        let lead = FilmographyEntry {
            order: Some(2),
            ..work("Lead Part", true, 1.0)
        };
        assert!(filter_reject_reason(&lead, ItemType::Movie, &filter).is_none());

        let minor = FilmographyEntry {
            order: Some(3),
            ..work("Minor Part", true, 1.0)
        };
        assert!(filter_reject_reason(&minor, ItemType::Movie, &filter)
            .is_some_and(|r| r.contains("非主演")));
    }

    #[test]
    fn test_filter_missing_date_rejected() {
        let filter = SubscriptionFilter::default();
        let undated = FilmographyEntry {
            release_date: None,
            first_air_date: None,
            ..work("未定档", true, 1.0)
        };
        assert_eq!(
            filter_reject_reason(&undated, ItemType::Movie, &filter).as_deref(),
            Some("缺少发行日期")
        );
    }
}
