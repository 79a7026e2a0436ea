//! Custom-collection engine
//!
//! The in-memory rule evaluator handles both batch generation (a full pass
//! over the metadata cache) and live matching of a single newly landed
//! item. The SQL twin in `repository::query` answers per-user proxy
//! requests; this one feeds collection sync and webhook fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::Value;

use mediagate_providers::emby::EmbyClient;

use crate::models::{
    CollectionDefinition, CollectionKind, CustomCollection, GeneratedItem, ItemType,
    MediaMetadata, Rule, RuleLogic, SubscriptionSource, SubscriptionStatus,
};
use crate::repository::{CollectionRepository, MediaRepository, WatchlistRepository};
use crate::service::cover::CoverGenerator;
use crate::service::list_importer::ListImporter;
use crate::service::recommendation::RecommendationEngine;
use crate::task::TaskContext;
use crate::Result;

/// Context the evaluator needs beyond the row itself.
pub struct MatchContext<'a> {
    /// TMDb IDs of currently airing series.
    pub airing_ids: &'a HashSet<String>,
    /// Pre-computed average episode runtimes per series.
    pub series_runtimes: &'a HashMap<String, f64>,
    pub today: NaiveDate,
}

pub struct FilterEngine;

impl FilterEngine {
    /// Evaluate one metadata row against a rule set.
    #[must_use]
    pub fn item_matches(
        meta: &MediaMetadata,
        rules: &[Rule],
        logic: RuleLogic,
        ctx: &MatchContext<'_>,
    ) -> bool {
        if rules.is_empty() {
            return true;
        }
        let mut results = rules.iter().map(|rule| Self::rule_matches(meta, rule, ctx));
        match logic {
            RuleLogic::And => results.all(|m| m),
            RuleLogic::Or => results.any(|m| m),
        }
    }

    fn rule_matches(meta: &MediaMetadata, rule: &Rule, ctx: &MatchContext<'_>) -> bool {
        match rule.field.as_str() {
            "genres" => string_list_matches(&meta.genres, &rule.operator, &rule.value),
            "countries" => string_list_matches(&meta.countries, &rule.operator, &rule.value),
            "studios" => string_list_matches(&meta.studios, &rule.operator, &rule.value),
            "tags" => string_list_matches(&meta.tags, &rule.operator, &rule.value),
            "keywords" => string_list_matches(&meta.keywords, &rule.operator, &rule.value),
            "actors" => person_matches(&meta.actors, &rule.operator, &rule.value, 3),
            "directors" => person_matches(&meta.directors, &rule.operator, &rule.value, 1),
            "release_date" => date_matches(meta.release_date, &rule.operator, &rule.value, ctx),
            "date_added" => date_matches(
                meta.date_added.map(|d| d.date_naive()),
                &rule.operator,
                &rule.value,
                ctx,
            ),
            "unified_rating" => {
                rating_enum_matches(meta.unified_rating.as_deref(), &rule.operator, &rule.value)
            }
            "is_in_progress" => {
                let airing = meta.item_type == ItemType::Series
                    && ctx.airing_ids.contains(&meta.tmdb_id);
                rule.value.as_bool().map_or(false, |want| want == airing)
            }
            "runtime" => {
                let runtime = if meta.item_type == ItemType::Series {
                    ctx.series_runtimes
                        .get(&meta.tmdb_id)
                        .copied()
                        .unwrap_or(0.0)
                } else {
                    meta.runtime_minutes.unwrap_or(0) as f64
                };
                // A zero runtime means unknown; it must not satisfy an
                // upper bound.
                if rule.operator == "lte" && runtime <= 0.0 {
                    false
                } else {
                    numeric_matches(runtime, &rule.operator, &rule.value)
                }
            }
            "release_year" => meta
                .release_year
                .is_some_and(|y| numeric_matches(f64::from(y), &rule.operator, &rule.value)),
            "rating" => meta
                .rating
                .is_some_and(|r| numeric_matches(r, &rule.operator, &rule.value)),
            "title" => title_matches(&meta.title, &rule.operator, &rule.value),
            _ => false,
        }
    }
}

fn value_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn string_list_matches(haystack: &[String], operator: &str, value: &Value) -> bool {
    match operator {
        "contains" | "eq" => value
            .as_str()
            .is_some_and(|needle| haystack.iter().any(|h| h == needle)),
        "is_one_of" => {
            let wanted = value_strings(value);
            haystack.iter().any(|h| wanted.iter().any(|w| w == h))
        }
        "is_none_of" => {
            let banned = value_strings(value);
            !haystack.iter().any(|h| banned.iter().any(|w| w == h))
        }
        _ => false,
    }
}

/// Person comparison: by metadata-provider ID, with name fallback.
/// `is_primary` looks only at the top billing slots.
fn person_matches(
    people: &[crate::models::PersonRef],
    operator: &str,
    value: &Value,
    primary_slots: usize,
) -> bool {
    let mut wanted_ids: HashSet<String> = HashSet::new();
    let mut wanted_names: Vec<String> = Vec::new();
    match value {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(obj) => {
                        match obj.get("id") {
                            Some(Value::Number(n)) => {
                                wanted_ids.insert(n.to_string());
                            }
                            Some(Value::String(s)) => {
                                wanted_ids.insert(s.clone());
                            }
                            _ => {}
                        }
                        if wanted_ids.is_empty() {
                            if let Some(name) = obj.get("name").and_then(Value::as_str) {
                                wanted_names.push(name.to_string());
                            }
                        }
                    }
                    Value::String(s) => wanted_names.push(s.clone()),
                    _ => {}
                }
            }
        }
        Value::String(s) => wanted_names.push(s.clone()),
        _ => {}
    }
    if wanted_ids.is_empty() && wanted_names.is_empty() {
        return false;
    }

    let scope: &[crate::models::PersonRef] = if operator == "is_primary" {
        &people[..people.len().min(primary_slots)]
    } else {
        people
    };

    let hit = scope.iter().any(|p| {
        if !wanted_ids.is_empty() {
            p.tmdb_id
                .is_some_and(|id| wanted_ids.contains(&id.to_string()))
        } else {
            wanted_names
                .iter()
                .any(|w| p.name.to_lowercase().contains(&w.to_lowercase()))
        }
    });

    match operator {
        "is_one_of" | "contains" | "is_primary" => hit,
        "is_none_of" => !hit,
        _ => false,
    }
}

fn date_matches(
    date: Option<NaiveDate>,
    operator: &str,
    value: &Value,
    ctx: &MatchContext<'_>,
) -> bool {
    let Some(date) = date else { return false };
    let Some(days) = value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    else {
        return false;
    };
    let cutoff = ctx.today - chrono::Duration::days(days);
    match operator {
        // Inclusive upper bound: today counts.
        "in_last_days" => date >= cutoff && date <= ctx.today,
        "not_in_last_days" => date < cutoff,
        _ => false,
    }
}

fn rating_enum_matches(rating: Option<&str>, operator: &str, value: &Value) -> bool {
    let Some(rating) = rating else { return false };
    match operator {
        "is_one_of" => value_strings(value).iter().any(|v| v == rating),
        "is_none_of" => !value_strings(value).iter().any(|v| v == rating),
        "eq" => value.as_str() == Some(rating),
        _ => false,
    }
}

fn numeric_matches(actual: f64, operator: &str, value: &Value) -> bool {
    let Some(expected) = value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    else {
        return false;
    };
    match operator {
        "gte" => actual >= expected,
        "lte" => actual <= expected,
        "eq" => (actual - expected).abs() < f64::EPSILON,
        _ => false,
    }
}

fn title_matches(title: &str, operator: &str, value: &Value) -> bool {
    let Some(needle) = value.as_str() else {
        return false;
    };
    let title = title.to_lowercase();
    let needle = needle.to_lowercase();
    match operator {
        "contains" => title.contains(&needle),
        "does_not_contain" => !title.contains(&needle),
        "starts_with" => title.starts_with(&needle),
        "ends_with" => title.ends_with(&needle),
        _ => false,
    }
}

// ---------------------------------------------------------------------------

pub struct CollectionService {
    collections: CollectionRepository,
    media: MediaRepository,
    watchlist: WatchlistRepository,
    emby: Arc<EmbyClient>,
    importer: Arc<ListImporter>,
    recommender: Arc<RecommendationEngine>,
    cover: Option<Arc<CoverGenerator>>,
}

impl CollectionService {
    #[must_use]
    pub fn new(
        collections: CollectionRepository,
        media: MediaRepository,
        watchlist: WatchlistRepository,
        emby: Arc<EmbyClient>,
        importer: Arc<ListImporter>,
        recommender: Arc<RecommendationEngine>,
        cover: Option<Arc<CoverGenerator>>,
    ) -> Self {
        Self {
            collections,
            media,
            watchlist,
            emby,
            importer,
            recommender,
            cover,
        }
    }

    #[must_use]
    pub const fn repository(&self) -> &CollectionRepository {
        &self.collections
    }

    /// Sync every active collection.
    pub async fn sync_all(&self, ctx: &TaskContext) -> Result<()> {
        let active = self.collections.all_active().await?;
        let total = active.len();
        for (idx, coll) in active.into_iter().enumerate() {
            ctx.check_stop()?;
            ctx.update(
                (idx * 100 / total.max(1)) as i32,
                &format!("同步合集 {}/{}: {}", idx + 1, total, coll.name),
            );
            if let Err(e) = self.sync_collection(ctx, &coll).await {
                if e.is_cancelled() {
                    return Err(e);
                }
                tracing::error!(collection = %coll.name, error = %e, "collection sync failed");
            }
        }
        Ok(())
    }

    /// Sync one collection according to its kind.
    pub async fn sync_collection(&self, ctx: &TaskContext, coll: &CustomCollection) -> Result<()> {
        match coll.kind {
            CollectionKind::Filter => self.sync_filter_collection(coll).await,
            CollectionKind::List => self.sync_list_collection(ctx, coll).await,
            CollectionKind::AiRecommendationGlobal => self.sync_global_ai_collection(coll).await,
            // Per-user recommendations are computed at request time; there
            // is nothing to precompute.
            CollectionKind::AiRecommendation => Ok(()),
        }
    }

    async fn sync_filter_collection(&self, coll: &CustomCollection) -> Result<()> {
        let generated = self.execute_filter(&coll.definition).await?;
        let in_library: Vec<String> = generated
            .iter()
            .filter_map(|g| g.emby_item_id.clone())
            .collect();
        self.ensure_emby_collection(coll, &in_library).await?;
        let count = in_library.len() as i64;

        // Filter collections keep only up to 9 samples for cover art.
        let samples: Vec<GeneratedItem> = generated.into_iter().take(9).collect();
        self.collections
            .save_sync_result(coll.id, &samples, count)
            .await?;
        self.generate_cover(coll, &samples).await;
        Ok(())
    }

    /// Run the rule evaluator over the whole metadata cache.
    pub async fn execute_filter(
        &self,
        definition: &CollectionDefinition,
    ) -> Result<Vec<GeneratedItem>> {
        let item_types = if definition.item_type.is_empty() {
            vec![ItemType::Movie]
        } else {
            definition.item_type.clone()
        };

        let mut all_rows = Vec::new();
        for item_type in &item_types {
            all_rows.extend(self.media.get_all_in_library(*item_type).await?);
        }

        if !definition.target_library_ids.is_empty() {
            all_rows.retain(|meta| {
                meta.asset_details.iter().any(|a| {
                    a.source_library_id
                        .as_ref()
                        .is_some_and(|id| definition.target_library_ids.contains(id))
                })
            });
        }

        let airing_ids = self.watchlist.airing_tmdb_ids().await?;
        let series_ids: Vec<String> = all_rows
            .iter()
            .filter(|m| m.item_type == ItemType::Series)
            .map(|m| m.tmdb_id.clone())
            .collect();
        let series_runtimes = self.media.series_average_runtimes(&series_ids).await?;
        let ctx = MatchContext {
            airing_ids: &airing_ids,
            series_runtimes: &series_runtimes,
            today: Utc::now().date_naive(),
        };

        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        for meta in &all_rows {
            if !FilterEngine::item_matches(meta, &definition.rules, definition.logic, &ctx) {
                continue;
            }
            let key = (meta.item_type, meta.tmdb_id.clone());
            if !seen.insert(key) {
                continue;
            }
            matched.push(GeneratedItem {
                tmdb_id: meta.tmdb_id.clone(),
                item_type: meta.item_type,
                emby_item_id: meta.primary_emby_id().map(str::to_string),
                season: None,
                title: Some(meta.title.clone()),
                release_date: meta.release_date.map(|d| d.to_string()),
            });
        }
        Ok(matched)
    }

    async fn sync_list_collection(&self, ctx: &TaskContext, coll: &CustomCollection) -> Result<()> {
        let mut generated = self.importer.process(ctx, &coll.definition).await?;
        self.hydrate_library_ids(&mut generated).await?;

        let in_library: Vec<String> = generated
            .iter()
            .filter_map(|g| g.emby_item_id.clone())
            .collect();
        self.ensure_emby_collection(coll, &in_library).await?;

        self.reconcile_subscriptions(coll, &generated).await?;

        let count = in_library.len() as i64;
        self.collections
            .save_sync_result(coll.id, &generated, count)
            .await?;
        self.generate_cover(coll, &generated).await;
        Ok(())
    }

    async fn sync_global_ai_collection(&self, coll: &CustomCollection) -> Result<()> {
        let mut generated = self.recommender.generate(&coll.definition).await?;
        self.hydrate_library_ids(&mut generated).await?;
        let in_library: Vec<String> = generated
            .iter()
            .filter_map(|g| g.emby_item_id.clone())
            .collect();
        self.ensure_emby_collection(coll, &in_library).await?;
        let count = in_library.len() as i64;
        self.collections
            .save_sync_result(coll.id, &generated, count)
            .await?;
        self.generate_cover(coll, &generated).await;
        Ok(())
    }

    /// Attach library item IDs to generated entries present in the cache.
    async fn hydrate_library_ids(&self, generated: &mut [GeneratedItem]) -> Result<()> {
        let tmdb_ids: Vec<String> = generated.iter().map(|g| g.tmdb_id.clone()).collect();
        let rows = self.media.get_by_tmdb_ids(&tmdb_ids).await?;
        let by_key: HashMap<(String, ItemType), &MediaMetadata> = rows
            .iter()
            .map(|m| ((m.tmdb_id.clone(), m.item_type), m))
            .collect();
        for item in generated.iter_mut() {
            if let Some(meta) = by_key.get(&(item.tmdb_id.clone(), item.item_type)) {
                if meta.in_library {
                    item.emby_item_id = meta.primary_emby_id().map(str::to_string);
                }
                if item.release_date.is_none() {
                    item.release_date = meta.release_date.map(|d| d.to_string());
                }
            }
        }
        Ok(())
    }

    /// List-collection health check: absent, unsubscribed entries become
    /// wanted (past release) or pending (future); removed entries lose the
    /// collection source.
    async fn reconcile_subscriptions(
        &self,
        coll: &CustomCollection,
        generated: &[GeneratedItem],
    ) -> Result<()> {
        let today = Utc::now().date_naive();
        let source = SubscriptionSource::collection(coll.id, &coll.name);

        let current: HashSet<(String, ItemType)> = generated
            .iter()
            .map(|g| (g.tmdb_id.clone(), g.item_type))
            .collect();

        // Entries that left the list lose this source (exact item-type
        // match; child seasons keep their own sources).
        for prev in &coll.generated_media_info {
            if !current.contains(&(prev.tmdb_id.clone(), prev.item_type)) {
                self.media
                    .remove_subscription_source(
                        &prev.tmdb_id,
                        prev.item_type,
                        &source.source_type,
                        &source.id,
                    )
                    .await?;
            }
        }

        for item in generated {
            if item.emby_item_id.is_some() {
                continue;
            }
            let Some(meta) = self.media.get(&item.tmdb_id, item.item_type).await? else {
                continue;
            };
            if meta.in_library {
                continue;
            }
            match meta.subscription_status {
                SubscriptionStatus::None | SubscriptionStatus::Wanted
                | SubscriptionStatus::PendingRelease => {}
                // Subscribed/ignored/paused entries are left alone.
                _ => continue,
            }

            let released = item
                .release_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                .is_none_or(|d| d <= today);
            let status = if released {
                SubscriptionStatus::Wanted
            } else {
                SubscriptionStatus::PendingRelease
            };
            self.media
                .add_subscription_source(&item.tmdb_id, item.item_type, &source, status)
                .await?;
        }
        Ok(())
    }

    /// Live matching for a single newly landed item (webhook fan-out).
    pub async fn match_new_item(
        &self,
        meta: &MediaMetadata,
        library_id: Option<&str>,
        emby_item_id: &str,
        item_name: &str,
    ) -> Result<Vec<i64>> {
        let airing_ids = self.watchlist.airing_tmdb_ids().await?;
        let series_runtimes = if meta.item_type == ItemType::Series {
            self.media
                .series_average_runtimes(&[meta.tmdb_id.clone()])
                .await?
        } else {
            HashMap::new()
        };
        let ctx = MatchContext {
            airing_ids: &airing_ids,
            series_runtimes: &series_runtimes,
            today: Utc::now().date_naive(),
        };

        let mut matched_ids = Vec::new();
        for coll in self.collections.all_active().await? {
            let Some(emby_collection_id) = coll.emby_collection_id.clone() else {
                continue;
            };
            let matches = match coll.kind {
                CollectionKind::Filter => {
                    if !coll.definition.target_library_ids.is_empty() {
                        let Some(library_id) = library_id else { continue };
                        if !coll
                            .definition
                            .target_library_ids
                            .iter()
                            .any(|id| id == library_id)
                        {
                            continue;
                        }
                    }
                    if !coll.definition.item_type.is_empty()
                        && !coll.definition.item_type.contains(&meta.item_type)
                    {
                        continue;
                    }
                    FilterEngine::item_matches(
                        meta,
                        &coll.definition.rules,
                        coll.definition.logic,
                        &ctx,
                    )
                }
                CollectionKind::List => coll
                    .generated_media_info
                    .iter()
                    .any(|g| g.tmdb_id == meta.tmdb_id && g.item_type == meta.item_type),
                _ => false,
            };
            if !matches {
                continue;
            }

            tracing::info!(collection = %coll.name, item = %item_name, "新入库项目匹配到合集");
            if let Err(e) = self
                .emby
                .add_to_collection(&emby_collection_id, &[emby_item_id.to_string()])
                .await
            {
                tracing::warn!(collection = %coll.name, error = %e, "emby collection append failed");
                continue;
            }
            self.collections
                .append_generated_item(
                    coll.id,
                    &GeneratedItem {
                        tmdb_id: meta.tmdb_id.clone(),
                        item_type: meta.item_type,
                        emby_item_id: Some(emby_item_id.to_string()),
                        season: None,
                        title: Some(item_name.to_string()),
                        release_date: meta.release_date.map(|d| d.to_string()),
                    },
                )
                .await?;

            // The cover reflects membership; refresh it with the new entry.
            if let Ok(Some(updated)) = self.collections.get(coll.id).await {
                self.generate_cover(&updated, &updated.generated_media_info)
                    .await;
            }
            matched_ids.push(coll.id);
        }
        Ok(matched_ids)
    }

    /// Create the Library Server boxset on first sync, then keep its
    /// membership aligned.
    async fn ensure_emby_collection(
        &self,
        coll: &CustomCollection,
        item_ids: &[String],
    ) -> Result<()> {
        match &coll.emby_collection_id {
            Some(id) => {
                self.emby.add_to_collection(id, item_ids).await?;
            }
            None => {
                if item_ids.is_empty() {
                    return Ok(());
                }
                let id = self.emby.create_collection(&coll.name, item_ids).await?;
                self.collections.set_emby_collection_id(coll.id, &id).await?;
            }
        }
        Ok(())
    }

    async fn generate_cover(&self, coll: &CustomCollection, items: &[GeneratedItem]) {
        let Some(cover) = &self.cover else { return };
        if let Err(e) = cover.generate_for_collection(coll, items).await {
            tracing::warn!(collection = %coll.name, error = %e, "cover generation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PersonRef;

    fn meta(title: &str) -> MediaMetadata {
        let mut m = MediaMetadata::new("100", ItemType::Movie, title);
        m.genres = vec!["科幻".into(), "冒险".into()];
        m.countries = vec!["CN".into()];
        m.tags = vec![];
        m.release_year = Some(2023);
        m.rating = Some(7.9);
        m.runtime_minutes = Some(125);
        m.release_date = NaiveDate::from_ymd_opt(2023, 1, 22);
        m.unified_rating = Some("13".into());
        m.actors = vec![
            PersonRef {
                tmdb_id: Some(500),
                name: "吴京".into(),
            },
            PersonRef {
                tmdb_id: Some(501),
                name: "刘德华".into(),
            },
            PersonRef {
                tmdb_id: Some(502),
                name: "李雪健".into(),
            },
            PersonRef {
                tmdb_id: Some(503),
                name: "沙溢".into(),
            },
        ];
        m.directors = vec![PersonRef {
            tmdb_id: Some(900),
            name: "郭帆".into(),
        }];
        m
    }

    fn rule(field: &str, operator: &str, value: Value) -> Rule {
        Rule {
            field: field.into(),
            operator: operator.into(),
            value,
        }
    }

    fn empty_ctx(today: NaiveDate) -> (HashSet<String>, HashMap<String, f64>, NaiveDate) {
        (HashSet::new(), HashMap::new(), today)
    }

    fn ctx_ref<'a>(
        airing: &'a HashSet<String>,
        runtimes: &'a HashMap<String, f64>,
        today: NaiveDate,
    ) -> MatchContext<'a> {
        MatchContext {
            airing_ids: airing,
            series_runtimes: runtimes,
            today,
        }
    }

    #[test]
    fn test_genre_operators() {
        let m = meta("流浪地球2");
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        let (a, r, t) = empty_ctx(today);
        let ctx = ctx_ref(&a, &r, t);

        assert!(FilterEngine::item_matches(
            &m,
            &[rule("genres", "contains", serde_json::json!("科幻"))],
            RuleLogic::And,
            &ctx
        ));
        assert!(FilterEngine::item_matches(
            &m,
            &[rule("genres", "is_one_of", serde_json::json!(["动作", "冒险"]))],
            RuleLogic::And,
            &ctx
        ));
        assert!(!FilterEngine::item_matches(
            &m,
            &[rule("genres", "is_none_of", serde_json::json!(["科幻"]))],
            RuleLogic::And,
            &ctx
        ));
    }

    #[test]
    fn test_actor_primary_rule() {
        let m = meta("流浪地球2");
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        let (a, r, t) = empty_ctx(today);
        let ctx = ctx_ref(&a, &r, t);

        // 502 is billed third: within the primary window.
        assert!(FilterEngine::item_matches(
            &m,
            &[rule("actors", "is_primary", serde_json::json!([{"id": 502}]))],
            RuleLogic::And,
            &ctx
        ));
        // 503 is billed fourth: outside it.
        assert!(!FilterEngine::item_matches(
            &m,
            &[rule("actors", "is_primary", serde_json::json!([{"id": 503}]))],
            RuleLogic::And,
            &ctx
        ));
        // Name fallback when no IDs are given.
        assert!(FilterEngine::item_matches(
            &m,
            &[rule("actors", "contains", serde_json::json!(["刘德华"]))],
            RuleLogic::And,
            &ctx
        ));
    }

    #[test]
    fn test_director_primary_slot_is_one() {
        let m = meta("流浪地球2");
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        let (a, r, t) = empty_ctx(today);
        let ctx = ctx_ref(&a, &r, t);
        assert!(FilterEngine::item_matches(
            &m,
            &[rule("directors", "is_primary", serde_json::json!([{"id": 900}]))],
            RuleLogic::And,
            &ctx
        ));
    }

    #[test]
    fn test_date_window_inclusive_today() {
        let mut m = meta("新片");
        let today = NaiveDate::from_ymd_opt(2026, 1, 10).expect("date");
        m.release_date = Some(today);
        let (a, r, t) = empty_ctx(today);
        let ctx = ctx_ref(&a, &r, t);
        assert!(FilterEngine::item_matches(
            &m,
            &[rule("release_date", "in_last_days", serde_json::json!(7))],
            RuleLogic::And,
            &ctx
        ));

        m.release_date = NaiveDate::from_ymd_opt(2025, 12, 1);
        assert!(FilterEngine::item_matches(
            &m,
            &[rule("release_date", "not_in_last_days", serde_json::json!(7))],
            RuleLogic::And,
            &ctx
        ));
    }

    #[test]
    fn test_series_runtime_uses_average() {
        let mut m = meta("长剧");
        m.item_type = ItemType::Series;
        m.runtime_minutes = None;
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        let airing = HashSet::new();
        let mut runtimes = HashMap::new();
        runtimes.insert("100".to_string(), 45.0);
        let ctx = ctx_ref(&airing, &runtimes, today);

        assert!(FilterEngine::item_matches(
            &m,
            &[rule("runtime", "gte", serde_json::json!(40))],
            RuleLogic::And,
            &ctx
        ));
        assert!(!FilterEngine::item_matches(
            &m,
            &[rule("runtime", "gte", serde_json::json!(60))],
            RuleLogic::And,
            &ctx
        ));
    }

    #[test]
    fn test_runtime_lte_excludes_unknown_but_rating_lte_does_not() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        let (a, r, t) = empty_ctx(today);
        let ctx = ctx_ref(&a, &r, t);

        // Unknown runtime (0) never satisfies an upper bound.
        let mut unknown = meta("未知时长");
        unknown.runtime_minutes = None;
        assert!(!FilterEngine::item_matches(
            &unknown,
            &[rule("runtime", "lte", serde_json::json!(60))],
            RuleLogic::And,
            &ctx
        ));

        // The positivity guard is runtime-specific: a zero rating is a
        // legitimate value and matches its upper bound.
        let mut unrated = meta("零分片");
        unrated.rating = Some(0.0);
        assert!(FilterEngine::item_matches(
            &unrated,
            &[rule("rating", "lte", serde_json::json!(5.0))],
            RuleLogic::And,
            &ctx
        ));
    }

    #[test]
    fn test_is_in_progress_rule() {
        let mut m = meta("连载剧");
        m.item_type = ItemType::Series;
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        let mut airing = HashSet::new();
        airing.insert("100".to_string());
        let runtimes = HashMap::new();
        let ctx = ctx_ref(&airing, &runtimes, today);

        assert!(FilterEngine::item_matches(
            &m,
            &[rule("is_in_progress", "is", serde_json::json!(true))],
            RuleLogic::And,
            &ctx
        ));
    }

    #[test]
    fn test_title_operators_case_insensitive() {
        let m = meta("The Long Season");
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        let (a, r, t) = empty_ctx(today);
        let ctx = ctx_ref(&a, &r, t);
        for (op, v, expect) in [
            ("contains", "long", true),
            ("does_not_contain", "short", true),
            ("starts_with", "the", true),
            ("ends_with", "SEASON", true),
            ("starts_with", "season", false),
        ] {
            assert_eq!(
                FilterEngine::item_matches(
                    &m,
                    &[rule("title", op, serde_json::json!(v))],
                    RuleLogic::And,
                    &ctx
                ),
                expect,
                "{op} {v}"
            );
        }
    }

    #[test]
    fn test_or_logic() {
        let m = meta("流浪地球2");
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        let (a, r, t) = empty_ctx(today);
        let ctx = ctx_ref(&a, &r, t);
        let rules = [
            rule("genres", "contains", serde_json::json!("不存在")),
            rule("release_year", "eq", serde_json::json!(2023)),
        ];
        assert!(!FilterEngine::item_matches(&m, &rules, RuleLogic::And, &ctx));
        assert!(FilterEngine::item_matches(&m, &rules, RuleLogic::Or, &ctx));
    }

    #[test]
    fn test_empty_rules_match_everything() {
        let m = meta("任意");
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        let (a, r, t) = empty_ctx(today);
        let ctx = ctx_ref(&a, &r, t);
        assert!(FilterEngine::item_matches(&m, &[], RuleLogic::And, &ctx));
    }
}
