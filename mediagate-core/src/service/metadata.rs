//! Metadata processor
//!
//! The single entry point that turns a library item into an enriched cast
//! list, writes it back to the Library Server, refreshes the local metadata
//! cache, and fans out to the watchlist and collection engines.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use moka::future::Cache;

use mediagate_providers::douban::{CulturalActor, DoubanClient};
use mediagate_providers::emby::{EmbyClient, MediaItem, PersonEntry};
use mediagate_providers::tmdb::TmdbClient;

use crate::models::{AssetDetail, ItemType, MediaMetadata, PersonRef};
use crate::repository::person::IdentityFacts;
use crate::repository::{LogRepository, MediaRepository, PersonRepository};
use crate::service::cast::{
    clean_role_name, contains_cjk, evaluate_cast_quality, format_cast_list, normalize_name,
    select_role, unified_rating, ProcessedActor, ScoredActor,
};
use crate::service::collections::CollectionService;
use crate::service::translation::Translator;
use crate::service::watchlist::WatchlistProcessor;
use crate::task::TaskContext;
use crate::{with_transaction, Result};

/// Outcome of processing one item.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Ok,
    /// Parked on the review queue; the reason carries the computed score.
    NeedsReview { reason: String, score: f64 },
    Skipped,
}

const ITEM_FIELDS: &str = "People,ProviderIds,Genres,Tags,Overview,ProductionYear,PremiereDate,\
    OfficialRating,CommunityRating,RunTimeTicks,Path,DateCreated,Studios,ProductionLocations,\
    SeriesId,ParentId,MediaSources";

pub struct MetadataProcessor {
    emby: Arc<EmbyClient>,
    tmdb: Arc<TmdbClient>,
    douban: Option<Arc<DoubanClient>>,
    translator: Arc<Translator>,
    persons: PersonRepository,
    media: MediaRepository,
    log: LogRepository,
    watchlist: Arc<WatchlistProcessor>,
    collections: Arc<CollectionService>,
    quality_threshold: f64,
    role_prefix: bool,
    /// Idempotence gate; `force_full_update` bypasses and repopulates it.
    processed_items: Cache<String, ()>,
}

impl MetadataProcessor {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        emby: Arc<EmbyClient>,
        tmdb: Arc<TmdbClient>,
        douban: Option<Arc<DoubanClient>>,
        translator: Arc<Translator>,
        persons: PersonRepository,
        media: MediaRepository,
        log: LogRepository,
        watchlist: Arc<WatchlistProcessor>,
        collections: Arc<CollectionService>,
        quality_threshold: f64,
        role_prefix: bool,
    ) -> Self {
        Self {
            emby,
            tmdb,
            douban,
            translator,
            persons,
            media,
            log,
            watchlist,
            collections,
            quality_threshold,
            role_prefix,
            processed_items: Cache::builder().max_capacity(100_000).build(),
        }
    }

    #[must_use]
    pub fn is_processed(&self, item_id: &str) -> bool {
        self.processed_items.contains_key(item_id)
    }

    /// Process one library item end to end.
    pub async fn process(
        &self,
        ctx: &TaskContext,
        item_id: &str,
        force_full_update: bool,
    ) -> Result<ProcessOutcome> {
        ctx.check_stop()?;

        let Some(item) = self.emby.get_item(item_id, Some(ITEM_FIELDS)).await? else {
            tracing::warn!(item_id, "item vanished before processing");
            return Ok(ProcessOutcome::Skipped);
        };

        // Episodes are processed through their owning series.
        if item.item_type == "Episode" {
            if let Some(series_id) = item.series_id.clone() {
                return Box::pin(self.process(ctx, &series_id, force_full_update)).await;
            }
            tracing::warn!(item_id, "episode without series, skipping");
            return Ok(ProcessOutcome::Skipped);
        }

        if force_full_update {
            self.processed_items.invalidate(&item.id).await;
        } else if self.processed_items.contains_key(&item.id) {
            tracing::debug!(item_id, "already processed, short-circuiting");
            return Ok(ProcessOutcome::Skipped);
        }

        let item_name = item.name.clone();
        let is_animation = is_animation_or_documentary(&item.genres);

        // Candidate cast from the cultural provider.
        let cultural_cast = self.fetch_cultural_cast(&item).await;

        // Merge, translate, and resolve identities.
        let processed = self.build_processed_cast(&item, &cultural_cast).await?;

        let scored: Vec<ScoredActor> = processed
            .iter()
            .map(|a| ScoredActor {
                name: a.name.clone(),
                role: a.role.clone(),
            })
            .collect();
        let score =
            evaluate_cast_quality(&scored, item.people.len(), None, is_animation);

        if score < self.quality_threshold {
            let reason = format!("quality below threshold: {score:.1}");
            tracing::warn!(item = %item_name, score, "cast parked for review");
            self.log
                .queue_for_review(&item.id, &item_name, &reason, Some(score))
                .await?;
            self.log
                .log_outcome(&item.id, &item_name, "needs_review", Some(&reason))
                .await?;
            return Ok(ProcessOutcome::NeedsReview { reason, score });
        }

        self.write_cast_back(&item, &processed).await?;
        let meta = self.upsert_metadata_cache(&item).await?;
        self.log
            .log_outcome(&item.id, &item_name, "processed", None)
            .await?;

        // Fan-out: watchlist for series, then live collection matching.
        if item.item_type == "Series" {
            if let Err(e) = self.watchlist.add_from_item(&item).await {
                tracing::warn!(item = %item_name, error = %e, "watchlist add failed");
            }
        }
        if let Some(meta) = &meta {
            let library_id = self.resolve_library_id(&item.id).await;
            if let Err(e) = self
                .collections
                .match_new_item(meta, library_id.as_deref(), &item.id, &item_name)
                .await
            {
                tracing::warn!(item = %item_name, error = %e, "collection matching failed");
            }
        }

        self.processed_items.insert(item.id.clone(), ()).await;
        Ok(ProcessOutcome::Ok)
    }

    /// Light path for webhook follow-ups: refresh the metadata cache only.
    pub async fn sync_metadata_cache(&self, item_id: &str) -> Result<()> {
        let Some(item) = self.emby.get_item(item_id, Some(ITEM_FIELDS)).await? else {
            return Ok(());
        };
        let target = if item.item_type == "Episode" {
            match item.series_id.clone() {
                Some(series_id) => self.emby.get_item(&series_id, Some(ITEM_FIELDS)).await?,
                None => None,
            }
        } else {
            Some(item)
        };
        if let Some(item) = target {
            self.upsert_metadata_cache(&item).await?;
        }
        Ok(())
    }

    /// Copy the series' processed main cast onto newly arrived episodes.
    pub async fn apply_main_cast_to_episodes(
        &self,
        ctx: &TaskContext,
        series_id: &str,
        episode_ids: &[String],
    ) -> Result<()> {
        let Some(series) = self.emby.get_item(series_id, Some("People")).await? else {
            return Ok(());
        };
        let people = serde_json::to_value(&series.people)?;

        for (idx, episode_id) in episode_ids.iter().enumerate() {
            ctx.check_stop()?;
            let Some(episode) = self.emby.get_item(episode_id, Some(ITEM_FIELDS)).await? else {
                continue;
            };
            let mut body = serde_json::to_value(&episode)?;
            body["People"] = people.clone();
            if let Err(e) = self.emby.update_item(episode_id, &body).await {
                tracing::warn!(episode_id, error = %e, "episode cast apply failed");
            }
            ctx.update(
                ((idx + 1) * 100 / episode_ids.len().max(1)) as i32,
                &format!("同步分集演员表 {}/{}", idx + 1, episode_ids.len()),
            );
        }
        Ok(())
    }

    /// Periodic person-map enrichment: learn IMDb IDs for identity rows
    /// that only carry a metadata-provider person ID, five lookups at a
    /// time. A learned mapping may collide with a row already holding that
    /// IMDb ID; `set_imdb_for_tmdb` consolidates the two rows in place.
    /// IDs the provider no longer resolves are nulled on their rows.
    pub async fn enrich_person_map(&self, ctx: &TaskContext) -> Result<()> {
        let pending = self.persons.tmdb_ids_missing_imdb(5000).await?;
        if pending.is_empty() {
            return Ok(());
        }
        let total = pending.len();
        tracing::info!(total, "开始补充演员身份数据");

        for (batch_index, chunk) in pending.chunks(200).enumerate() {
            ctx.check_stop()?;
            ctx.update(
                (batch_index * 200 * 100 / total.max(1)) as i32,
                &format!("补充演员数据 批次 {}/{}", batch_index + 1, total.div_ceil(200)),
            );

            let fetched: Vec<(i64, std::result::Result<Option<String>, bool>)> =
                stream::iter(chunk.iter().copied().map(|person_id| {
                    let tmdb = self.tmdb.clone();
                    async move {
                        match tmdb.person_details(person_id, Some("external_ids")).await {
                            Ok(details) => {
                                let imdb = details
                                    .external_ids
                                    .and_then(|e| e.imdb_id)
                                    .filter(|id| !id.is_empty());
                                (person_id, Ok(imdb))
                            }
                            // Authoritative not-found is a data-cleanup
                            // signal; transient failures retry next run.
                            Err(e) => (person_id, Err(e.is_not_found())),
                        }
                    }
                }))
                .buffer_unordered(5)
                .collect()
                .await;

            let mut mappings: Vec<(i64, String)> = Vec::new();
            let mut stale: Vec<i64> = Vec::new();
            for (person_id, outcome) in fetched {
                match outcome {
                    Ok(Some(imdb_id)) => mappings.push((person_id, imdb_id)),
                    Ok(None) => {}
                    Err(true) => stale.push(person_id),
                    Err(false) => {}
                }
            }

            if !mappings.is_empty() {
                let persons = self.persons.clone();
                with_transaction(self.persons.pool(), move |tx| {
                    Box::pin(async move {
                        for (person_id, imdb_id) in &mappings {
                            if let Err(e) =
                                persons.set_imdb_for_tmdb(tx, *person_id, imdb_id).await
                            {
                                tracing::warn!(person_id, error = %e, "imdb mapping write failed");
                            }
                        }
                        Ok(())
                    })
                })
                .await?;
            }
            if !stale.is_empty() {
                let cleared = self.persons.clear_stale_tmdb_ids(&stale).await?;
                tracing::info!(cleared, "已清理失效的演员元数据ID");
            }
        }
        Ok(())
    }

    async fn fetch_cultural_cast(&self, item: &MediaItem) -> Vec<CulturalActor> {
        let Some(douban) = &self.douban else {
            return Vec::new();
        };
        let mtype = match item.item_type.as_str() {
            "Movie" => Some("movie"),
            "Series" => Some("tv"),
            _ => None,
        };
        let year = item.production_year.map(|y| y.to_string());
        match douban
            .get_acting(
                &item.name,
                item.provider_id("Imdb"),
                mtype,
                year.as_deref(),
                item.provider_id("Douban"),
            )
            .await
        {
            Ok(cast) => dedup_cultural_cast(cast),
            Err(e) => {
                tracing::warn!(item = %item.name, error = %e, "cultural cast fetch failed");
                Vec::new()
            }
        }
    }

    async fn build_processed_cast(
        &self,
        item: &MediaItem,
        cultural_cast: &[CulturalActor],
    ) -> Result<Vec<ProcessedActor>> {
        let actors: Vec<&PersonEntry> = item
            .people
            .iter()
            .filter(|p| {
                matches!(p.person_type.as_deref(), Some("Actor" | "GuestStar") | None)
            })
            .collect();

        // Index cultural candidates for the match hierarchy: cultural ID
        // first, then normalized name (both Chinese and Latin spellings).
        let mut by_id: HashMap<&str, &CulturalActor> = HashMap::new();
        let mut by_name: HashMap<String, &CulturalActor> = HashMap::new();
        for candidate in cultural_cast {
            if let Some(id) = candidate.id.as_deref() {
                by_id.insert(id, candidate);
            }
            by_name.insert(normalize_name(&candidate.name), candidate);
            if let Some(latin) = &candidate.latin_name {
                if !latin.is_empty() {
                    by_name.insert(normalize_name(latin), candidate);
                }
            }
        }

        let mut processed = Vec::with_capacity(actors.len());
        for (order, person) in actors.iter().enumerate() {
            let candidate = person
                .provider_id("Douban")
                .and_then(|id| by_id.get(id).copied())
                .or_else(|| by_name.get(&normalize_name(&person.name)).copied());

            let mut name = person.name.trim().to_string();
            if let Some(candidate) = candidate {
                if contains_cjk(&candidate.name) {
                    name = candidate.name.clone();
                }
            }
            if !contains_cjk(&name) {
                if let Some(translated) = self.translator.translate_field(&name).await? {
                    name = translated;
                }
            }

            let local_role = clean_role_name(person.role.as_deref().unwrap_or_default());
            let candidate_role = candidate
                .map(|c| clean_role_name(c.character.as_deref().unwrap_or_default()))
                .unwrap_or_default();
            let mut role = select_role(&local_role, &candidate_role);
            if !role.is_empty() && !contains_cjk(&role) {
                if let Some(translated) = self.translator.translate_field(&role).await? {
                    role = translated;
                }
            }

            processed.push(ProcessedActor {
                name,
                role,
                emby_person_id: person.id.clone(),
                tmdb_person_id: person.provider_id("Tmdb").and_then(|s| s.parse().ok()),
                imdb_id: person.provider_id("Imdb").map(str::to_string),
                douban_celebrity_id: candidate.and_then(|c| c.id.clone()),
                order,
            });
        }

        // Resolve identities in one transaction; merge conflicts stay
        // inside their savepoints.
        let persons = self.persons.clone();
        let facts: Vec<IdentityFacts> = processed
            .iter()
            .filter(|a| {
                a.emby_person_id.is_some()
                    || a.tmdb_person_id.is_some()
                    || a.imdb_id.is_some()
                    || a.douban_celebrity_id.is_some()
            })
            .map(|a| IdentityFacts {
                emby_person_id: a.emby_person_id.clone(),
                tmdb_person_id: a.tmdb_person_id,
                imdb_id: a.imdb_id.clone(),
                douban_celebrity_id: a.douban_celebrity_id.clone(),
                primary_name: a.name.clone(),
            })
            .collect();
        with_transaction(self.persons.pool(), move |tx| {
            Box::pin(async move {
                for fact in &facts {
                    if let Err(e) = persons.resolve_or_create(tx, fact).await {
                        // A broken identity fact must not sink the batch.
                        tracing::warn!(name = %fact.primary_name, error = %e, "identity resolve failed");
                    }
                }
                Ok(())
            })
        })
        .await?;

        let is_animation = is_animation_or_documentary(&item.genres);
        format_cast_list(&mut processed, is_animation, self.role_prefix);
        Ok(processed)
    }

    async fn write_cast_back(
        &self,
        item: &MediaItem,
        processed: &[ProcessedActor],
    ) -> Result<()> {
        let people: Vec<serde_json::Value> = processed
            .iter()
            .map(|a| {
                let mut provider_ids = serde_json::Map::new();
                if let Some(id) = a.tmdb_person_id {
                    provider_ids.insert("Tmdb".to_string(), serde_json::json!(id.to_string()));
                }
                if let Some(id) = &a.imdb_id {
                    provider_ids.insert("Imdb".to_string(), serde_json::json!(id));
                }
                serde_json::json!({
                    "Name": a.name,
                    "Id": a.emby_person_id,
                    "Role": a.role,
                    "Type": "Actor",
                    "ProviderIds": provider_ids,
                })
            })
            .collect();

        let mut body = serde_json::to_value(item)?;
        body["People"] = serde_json::Value::Array(people);
        self.emby.update_item(&item.id, &body).await?;
        Ok(())
    }

    /// Build and persist the metadata cache row for an item, enriched from
    /// the metadata provider when the item carries its ID.
    async fn upsert_metadata_cache(&self, item: &MediaItem) -> Result<Option<MediaMetadata>> {
        let Some(tmdb_id) = item.provider_id("Tmdb").map(str::to_string) else {
            tracing::debug!(item = %item.name, "no metadata provider id, cache skip");
            return Ok(None);
        };
        let Some(item_type) = ItemType::parse(&item.item_type) else {
            return Ok(None);
        };

        let mut meta = MediaMetadata::new(tmdb_id.clone(), item_type, item.name.clone());
        meta.original_title = None;
        meta.release_year = item.production_year;
        meta.release_date = item
            .premiere_date
            .as_deref()
            .and_then(parse_wire_date);
        meta.unified_rating = item
            .official_rating
            .as_deref()
            .and_then(unified_rating)
            .map(str::to_string);
        meta.runtime_minutes = item.run_time_ticks.map(|t| t / 600_000_000);
        meta.rating = item.community_rating;
        meta.overview = item.overview.clone();
        meta.genres = item.genres.clone();
        meta.tags = item.tags.clone();
        meta.studios = item.studios.iter().map(|s| s.name.clone()).collect();
        meta.countries = item.production_locations.clone();
        meta.in_library = true;
        meta.emby_item_ids = vec![item.id.clone()];
        meta.date_added = item
            .date_created
            .as_deref()
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc));
        meta.last_synced_at = Some(Utc::now());

        // Asset details drive the permission predicates.
        let library_id = self.resolve_library_id(&item.id).await;
        let ancestors = self.resolve_ancestor_ids(&item.id).await;
        meta.asset_details = vec![AssetDetail {
            emby_item_id: item.id.clone(),
            source_library_id: library_id,
            ancestor_ids: ancestors,
            runtime_minutes: meta.runtime_minutes,
        }];

        // Enrich from the metadata provider.
        if let Ok(parsed_id) = tmdb_id.parse::<i64>() {
            match item_type {
                ItemType::Movie => {
                    if let Ok(details) = self
                        .tmdb
                        .movie_details(parsed_id, Some("credits,keywords"))
                        .await
                    {
                        meta.original_title = details.original_title.clone();
                        meta.rating = Some(details.vote_average);
                        meta.overview = details.overview.or(meta.overview);
                        if meta.runtime_minutes.is_none() {
                            meta.runtime_minutes = details.runtime;
                        }
                        meta.genres = details.genres.iter().map(|g| g.name.clone()).collect();
                        meta.countries = details
                            .production_countries
                            .iter()
                            .map(|c| c.iso_3166_1.clone())
                            .collect();
                        meta.studios = details
                            .production_companies
                            .iter()
                            .map(|c| c.name.clone())
                            .collect();
                        if let Some(keywords) = &details.keywords {
                            meta.keywords =
                                keywords.all().iter().map(|k| k.name.clone()).collect();
                        }
                        if let Some(credits) = &details.credits {
                            fill_people(&mut meta, credits);
                        }
                    }
                }
                ItemType::Series => {
                    if let Ok(details) = self
                        .tmdb
                        .tv_details(parsed_id, Some("credits,keywords"))
                        .await
                    {
                        meta.original_title = details.original_name.clone();
                        meta.rating = Some(details.vote_average);
                        meta.overview = details.overview.or(meta.overview);
                        meta.genres = details.genres.iter().map(|g| g.name.clone()).collect();
                        meta.countries = details
                            .production_countries
                            .iter()
                            .map(|c| c.iso_3166_1.clone())
                            .collect();
                        meta.studios =
                            details.networks.iter().map(|n| n.name.clone()).collect();
                        if let Some(keywords) = &details.keywords {
                            meta.keywords =
                                keywords.all().iter().map(|k| k.name.clone()).collect();
                        }
                        if let Some(credits) = &details.credits {
                            fill_people(&mut meta, credits);
                        }
                    }
                }
                _ => {}
            }
        }

        // Merge library IDs from an existing row: one metadata row may back
        // several library items.
        if let Some(existing) = self.media.get(&tmdb_id, item_type).await? {
            for id in existing.emby_item_ids {
                if !meta.emby_item_ids.contains(&id) {
                    meta.emby_item_ids.push(id);
                }
            }
            for asset in existing.asset_details {
                if !meta
                    .asset_details
                    .iter()
                    .any(|a| a.emby_item_id == asset.emby_item_id)
                {
                    meta.asset_details.push(asset);
                }
            }
            meta.overview_embedding = existing.overview_embedding;
        }

        self.media.upsert(&meta).await?;
        Ok(Some(meta))
    }

    async fn resolve_library_id(&self, item_id: &str) -> Option<String> {
        match self.emby.get_library_root(item_id).await {
            Ok(Some(root)) => Some(root.id),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(item_id, error = %e, "library root lookup failed");
                None
            }
        }
    }

    async fn resolve_ancestor_ids(&self, item_id: &str) -> Vec<String> {
        // The ancestor chain is what ExcludedSubFolders matches against.
        match self.emby.get_library_root(item_id).await {
            Ok(Some(root)) => vec![root.id],
            _ => Vec::new(),
        }
    }
}

fn fill_people(meta: &mut MediaMetadata, credits: &mediagate_providers::tmdb::Credits) {
    meta.actors = credits
        .cast
        .iter()
        .map(|c| PersonRef {
            tmdb_id: Some(c.id),
            name: c.name.clone().unwrap_or_default(),
        })
        .collect();
    meta.directors = credits
        .crew
        .iter()
        .filter(|c| c.job.as_deref() == Some("Director"))
        .map(|c| PersonRef {
            tmdb_id: Some(c.id),
            name: c.name.clone().unwrap_or_default(),
        })
        .collect();
}

fn parse_wire_date(raw: &str) -> Option<NaiveDate> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|d| d.date_naive())
        .ok()
        .or_else(|| {
            let head = raw.get(..10).unwrap_or(raw);
            NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
        })
}

fn is_animation_or_documentary(genres: &[String]) -> bool {
    genres.iter().any(|g| {
        g == "Animation" || g == "Documentary" || g.contains("动画") || g.contains("纪录")
    })
}

/// Cultural credits repeat people across pages; first occurrence wins, by
/// cultural ID then by name.
fn dedup_cultural_cast(cast: Vec<CulturalActor>) -> Vec<CulturalActor> {
    let mut seen_ids = std::collections::HashSet::new();
    let mut seen_names = std::collections::HashSet::new();
    cast.into_iter()
        .filter(|actor| {
            if actor.name.trim().is_empty() {
                return false;
            }
            if let Some(id) = &actor.id {
                if !seen_ids.insert(id.clone()) {
                    return false;
                }
            }
            seen_names.insert(actor.name.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_animation_detection() {
        assert!(is_animation_or_documentary(&["Animation".to_string()]));
        assert!(is_animation_or_documentary(&["动画".to_string()]));
        assert!(is_animation_or_documentary(&["历史纪录片".to_string()]));
        assert!(!is_animation_or_documentary(&["Drama".to_string()]));
    }

    #[test]
    fn test_parse_wire_date() {
        assert_eq!(
            parse_wire_date("2023-04-22T00:00:00.0000000Z"),
            NaiveDate::from_ymd_opt(2023, 4, 22)
        );
        assert_eq!(
            parse_wire_date("2023-04-22"),
            NaiveDate::from_ymd_opt(2023, 4, 22)
        );
        assert_eq!(parse_wire_date("not a date"), None);
    }

    #[test]
    fn test_dedup_cultural_cast() {
        let cast = vec![
            CulturalActor {
                id: Some("1".into()),
                name: "周迅".into(),
                ..Default::default()
            },
            CulturalActor {
                id: Some("1".into()),
                name: "周迅(重复)".into(),
                ..Default::default()
            },
            CulturalActor {
                id: None,
                name: "周迅".into(),
                ..Default::default()
            },
            CulturalActor {
                id: None,
                name: "".into(),
                ..Default::default()
            },
        ];
        let deduped = dedup_cultural_cast(cast);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].name, "周迅");
    }

    #[test]
    fn test_runtime_tick_conversion() {
        // 2 hours in ticks (100ns units).
        let ticks: i64 = 72_000_000_000;
        assert_eq!(ticks / 600_000_000, 120);
    }
}
