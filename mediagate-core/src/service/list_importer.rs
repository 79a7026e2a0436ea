//! List importer
//!
//! Turns external list sources into resolved metadata IDs: RSS feeds with
//! IMDb GUIDs, metadata-provider lists and discover queries, remote
//! cultural lists, and platform rankings fetched by an out-of-process
//! helper. Titles without IDs go through the search matcher, including
//! Chinese season-marker parsing and season validation.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde_json::json;
use tokio::process::Command;

use mediagate_providers::ai::AiClient;
use mediagate_providers::douban::DoubanClient;
use mediagate_providers::tmdb::TmdbClient;

use crate::models::{CollectionDefinition, GeneratedItem, ItemType};
use crate::service::cast::normalize_name;
use crate::task::TaskContext;
use crate::{Error, Result};

/// Wall-clock limit for the out-of-process platform fetcher.
const FETCHER_TIMEOUT: Duration = Duration::from_secs(600);

/// How many candidates get a season-validation lookup.
const SEASON_VALIDATION_CANDIDATES: usize = 5;

static SEASON_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(.*?)\s*[（(]?\s*第?([一二三四五六七八九十]+)\s*季\s*[)）]?\s*$")
        .expect("static regex")
});
static TRAILING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*\S)\s+(\d{1,3})$").expect("static regex"));
static IMDB_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"tt\d{7,8}").expect("static regex"));
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("static regex"));
static DATE_MACRO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{today([+-]\d+)?\}").expect("static regex"));

/// A raw entry pulled from a source, before resolution.
#[derive(Debug, Clone, Default)]
pub struct RawListItem {
    pub title: String,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub item_type: Option<ItemType>,
    pub year: Option<i32>,
    pub season: Option<i64>,
    pub release_date: Option<String>,
}

pub struct ListImporter {
    tmdb: Arc<TmdbClient>,
    douban: Option<Arc<DoubanClient>>,
    ai: Option<Arc<AiClient>>,
    http: reqwest::Client,
    resolve_concurrency: usize,
}

impl ListImporter {
    pub fn new(
        tmdb: Arc<TmdbClient>,
        douban: Option<Arc<DoubanClient>>,
        ai: Option<Arc<AiClient>>,
        resolve_concurrency: usize,
    ) -> Result<Self> {
        Ok(Self {
            tmdb,
            douban,
            ai,
            http: mediagate_providers::http::build_client(Duration::from_secs(30))
                .map_err(|e| Error::Internal(format!("importer http client: {e}")))?,
            resolve_concurrency: resolve_concurrency.max(1),
        })
    }

    /// Import all sources of a definition, resolve, dedupe, cap, and
    /// optionally run the LLM secondary filter.
    pub async fn process(
        &self,
        ctx: &TaskContext,
        definition: &CollectionDefinition,
    ) -> Result<Vec<GeneratedItem>> {
        let mut raw = Vec::new();
        for url in &definition.urls {
            ctx.check_stop()?;
            match self.fetch_source(url, definition).await {
                Ok(mut items) => raw.append(&mut items),
                Err(e) => {
                    tracing::error!(url, error = %e, "list source failed, continuing");
                }
            }
        }

        let default_type = definition
            .item_type
            .first()
            .copied()
            .unwrap_or(ItemType::Movie);
        let resolved = self.resolve_items(ctx, raw, default_type).await;

        let mut deduped = dedup_items(resolved);
        if let Some(limit) = definition.limit {
            deduped.truncate(limit);
        }

        if let Some(prompt) = definition
            .ai_filter_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            deduped = self.ai_secondary_filter(deduped, prompt).await;
        }

        Ok(deduped)
    }

    async fn fetch_source(
        &self,
        url: &str,
        definition: &CollectionDefinition,
    ) -> Result<Vec<RawListItem>> {
        if url.starts_with("maoyan://") {
            return self.fetch_platform_ranking(url, definition.limit.unwrap_or(50)).await;
        }
        if url.contains("/list/") && url.contains("themoviedb") {
            return self.fetch_tmdb_list(url).await;
        }
        if url.contains("/discover/") {
            return self.fetch_discover(url).await;
        }
        if url.contains("douban.com/doulist") {
            return self.fetch_cultural_list(url).await;
        }
        self.fetch_rss(url).await
    }

    // ---- RSS ----

    async fn fetch_rss(&self, url: &str) -> Result<Vec<RawListItem>> {
        tracing::info!(url, "fetching RSS list source");
        let body = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("rss fetch failed: {e}")))?
            .text()
            .await
            .map_err(|e| Error::Internal(format!("rss body read failed: {e}")))?;
        Ok(parse_rss_items(&body))
    }

    // ---- Metadata provider list / discover ----

    async fn fetch_tmdb_list(&self, url: &str) -> Result<Vec<RawListItem>> {
        let list_id = url
            .split('/')
            .next_back()
            .and_then(|tail| tail.split('?').next())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidInput(format!("bad list url {url}")))?;

        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let response = self.tmdb.list_page(list_id, page).await?;
            for result in &response.items {
                items.push(RawListItem {
                    title: result.display_title().to_string(),
                    tmdb_id: Some(result.id.to_string()),
                    item_type: Some(match result.media_type.as_deref() {
                        Some("tv") => ItemType::Series,
                        _ => ItemType::Movie,
                    }),
                    year: result.year(),
                    release_date: result.date().map(str::to_string),
                    ..Default::default()
                });
            }
            if page >= response.total_pages || page >= 20 {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    async fn fetch_discover(&self, url: &str) -> Result<Vec<RawListItem>> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::InvalidInput(format!("bad discover url {url}: {e}")))?;
        let kind = if parsed.path().contains("/tv") {
            "tv"
        } else {
            "movie"
        };
        let item_type = if kind == "tv" {
            ItemType::Series
        } else {
            ItemType::Movie
        };

        let today = Utc::now().date_naive();
        let params: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.to_string(), expand_date_macros(&v, today)))
            .collect();

        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let response = self.tmdb.discover_page(kind, &params, page).await?;
            for result in &response.results {
                items.push(RawListItem {
                    title: result.display_title().to_string(),
                    tmdb_id: Some(result.id.to_string()),
                    item_type: Some(item_type),
                    year: result.year(),
                    release_date: result.date().map(str::to_string),
                    ..Default::default()
                });
            }
            if page >= response.total_pages || page >= 10 {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    // ---- Cultural list ----

    async fn fetch_cultural_list(&self, url: &str) -> Result<Vec<RawListItem>> {
        let Some(douban) = &self.douban else {
            return Err(Error::InvalidInput(
                "cultural provider not configured for doulist source".to_string(),
            ));
        };
        let mut items = Vec::new();
        let mut start = 0;
        loop {
            let page = douban.list_items(url, start).await?;
            let Some(entries) = page.get("items").and_then(|v| v.as_array()) else {
                break;
            };
            if entries.is_empty() {
                break;
            }
            for entry in entries {
                let Some(title) = entry.get("title").and_then(|v| v.as_str()) else {
                    continue;
                };
                items.push(RawListItem {
                    title: title.to_string(),
                    imdb_id: entry
                        .get("imdb_id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    year: entry
                        .get("year")
                        .and_then(|v| v.as_str())
                        .and_then(|y| y.parse().ok()),
                    ..Default::default()
                });
            }
            start += entries.len() as i64;
            if items.len() >= 500 {
                break;
            }
        }
        Ok(items)
    }

    // ---- Platform ranking subprocess ----

    /// `maoyan://<types>[-<platform>]` is served by an external fetcher
    /// process writing JSON to a temp file. The argv is validated before
    /// spawning and the process is killed at the timeout.
    async fn fetch_platform_ranking(
        &self,
        url: &str,
        limit: usize,
    ) -> Result<Vec<RawListItem>> {
        let spec = url.trim_start_matches("maoyan://");
        let (types_part, platform) = split_platform(spec);
        if !argv_token_ok(&types_part) || !argv_token_ok(&platform) {
            return Err(Error::InvalidInput(format!(
                "rejected platform source spec '{spec}'"
            )));
        }

        let output_path = std::env::temp_dir().join(format!(
            "mediagate_ranking_{}.json",
            normalize_name(spec)
        ));

        let mut command = Command::new("maoyan-fetcher");
        command
            .arg("--output-file")
            .arg(&output_path)
            .arg("--num")
            .arg(limit.to_string())
            .arg("--platform")
            .arg(&platform)
            .arg("--types")
            .arg(&types_part)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = async {
            let output = command
                .output()
                .await
                .map_err(|e| Error::Internal(format!("fetcher spawn failed: {e}")))?;
            if !output.status.success() {
                return Err(Error::Internal(format!(
                    "fetcher exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                )));
            }
            Ok(())
        };
        let result = tokio::time::timeout(FETCHER_TIMEOUT, run).await;

        let parsed = match result {
            Err(_) => Err(Error::Internal(
                "platform fetcher timed out after 600s".to_string(),
            )),
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => {
                let data = tokio::fs::read(&output_path)
                    .await
                    .map_err(|e| Error::Internal(format!("fetcher output unreadable: {e}")))?;
                let entries: Vec<serde_json::Value> = serde_json::from_slice(&data)?;
                Ok(entries
                    .iter()
                    .filter_map(|entry| {
                        let title = entry.get("title")?.as_str()?.to_string();
                        Some(RawListItem {
                            title,
                            tmdb_id: entry
                                .get("tmdb_id")
                                .and_then(|v| v.as_str())
                                .map(str::to_string),
                            item_type: entry
                                .get("type")
                                .and_then(|v| v.as_str())
                                .and_then(ItemType::parse),
                            ..Default::default()
                        })
                    })
                    .collect())
            }
        };
        let _ = tokio::fs::remove_file(&output_path).await;
        parsed
    }

    // ---- Resolution ----

    /// Resolve titles without IDs through the search matcher, preserving
    /// source order under bounded concurrency.
    async fn resolve_items(
        &self,
        ctx: &TaskContext,
        raw: Vec<RawListItem>,
        default_type: ItemType,
    ) -> Vec<GeneratedItem> {
        let stop = ctx.stop.clone();
        stream::iter(raw.into_iter().map(|item| {
            let stop = stop.clone();
            async move {
                if stop.is_stop_requested() {
                    return None;
                }
                self.resolve_item(item, default_type).await
            }
        }))
        .buffered(self.resolve_concurrency)
        .filter_map(futures::future::ready)
        .collect()
        .await
    }

    async fn resolve_item(
        &self,
        item: RawListItem,
        default_type: ItemType,
    ) -> Option<GeneratedItem> {
        let item_type = item.item_type.unwrap_or(default_type);

        if let Some(tmdb_id) = &item.tmdb_id {
            return Some(GeneratedItem {
                tmdb_id: tmdb_id.clone(),
                item_type,
                emby_item_id: None,
                season: item.season,
                title: Some(item.title),
                release_date: item.release_date,
            });
        }

        if let Some(imdb_id) = &item.imdb_id {
            if let Ok(found) = self.tmdb.find_by_imdb(imdb_id).await {
                if let Some((id, found_type)) = first_find_result(&found) {
                    return Some(GeneratedItem {
                        tmdb_id: id,
                        item_type: found_type,
                        emby_item_id: None,
                        season: item.season,
                        title: Some(item.title),
                        release_date: item.release_date,
                    });
                }
            }
        }

        match self
            .match_title(&item.title, item_type, item.year)
            .await
        {
            Some((tmdb_id, matched_type, season)) => Some(GeneratedItem {
                tmdb_id,
                item_type: matched_type,
                emby_item_id: None,
                season: season.or(item.season),
                title: Some(item.title),
                release_date: item.release_date,
            }),
            None => {
                tracing::warn!(title = %item.title, "title resolution failed");
                None
            }
        }
    }

    /// Title → metadata ID. Movies try exact then substring normalization
    /// and finally fall back to the top search result. Series parse the
    /// season marker, validate candidate season lists, retry without the
    /// year, and fall back to the original title.
    pub async fn match_title(
        &self,
        title: &str,
        item_type: ItemType,
        year: Option<i32>,
    ) -> Option<(String, ItemType, Option<i64>)> {
        match item_type {
            ItemType::Movie => self.match_movie_title(title, year).await,
            _ => self.match_series_title(title, year).await,
        }
    }

    async fn match_movie_title(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Option<(String, ItemType, Option<i64>)> {
        let results = self.tmdb.search("movie", title.trim(), year).await.ok()?;
        if results.is_empty() {
            tracing::warn!(title, "movie search found nothing");
            return None;
        }

        let wanted = normalize_name(title);
        for result in &results {
            if normalize_name(result.display_title()) == wanted
                || normalize_name(result.original()) == wanted
            {
                return Some((result.id.to_string(), ItemType::Movie, None));
            }
        }
        for result in &results {
            let norm_title = normalize_name(result.display_title());
            let norm_original = normalize_name(result.original());
            if norm_title.contains(&wanted) || norm_original.contains(&wanted) {
                return Some((result.id.to_string(), ItemType::Movie, None));
            }
        }
        // Best effort: the most relevant result.
        tracing::warn!(title, "movie exact matching failed, using top result");
        Some((results[0].id.to_string(), ItemType::Movie, None))
    }

    async fn match_series_title(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Option<(String, ItemType, Option<i64>)> {
        let (base_name, season) = parse_series_title(title);

        let mut results = self
            .tmdb
            .search("tv", &base_name, year)
            .await
            .unwrap_or_default();
        if results.is_empty() && year.is_some() {
            results = self
                .tmdb
                .search("tv", &base_name, None)
                .await
                .unwrap_or_default();
        }

        let Some(season) = season else {
            if results.is_empty() {
                return None;
            }
            let wanted = normalize_name(&base_name);
            let exact = results
                .iter()
                .find(|r| normalize_name(r.display_title()) == wanted);
            let chosen = exact.unwrap_or(&results[0]);
            return Some((chosen.id.to_string(), ItemType::Series, None));
        };

        // Candidates sorted exact-name-first, then validated against their
        // season lists.
        let wanted = normalize_name(&base_name);
        results.sort_by_key(|r| usize::from(normalize_name(r.display_title()) != wanted));

        let mut checked = HashSet::new();
        for candidate in results.iter().take(SEASON_VALIDATION_CANDIDATES) {
            checked.insert(candidate.id);
            if self.candidate_has_season(candidate.id, season).await {
                return Some((candidate.id.to_string(), ItemType::Series, Some(season)));
            }
        }

        // Year-free retry over fresh candidates.
        if year.is_some() {
            let retry = self
                .tmdb
                .search("tv", &base_name, None)
                .await
                .unwrap_or_default();
            for candidate in retry
                .iter()
                .filter(|r| !checked.contains(&r.id))
                .take(SEASON_VALIDATION_CANDIDATES)
            {
                if self.candidate_has_season(candidate.id, season).await {
                    return Some((candidate.id.to_string(), ItemType::Series, Some(season)));
                }
            }
        }

        // The parse may have eaten part of the real name ("Love 101"):
        // search once more with the untouched title.
        if base_name != title {
            let fallback = self
                .tmdb
                .search("tv", title, None)
                .await
                .unwrap_or_default();
            if let Some(best) = fallback.first() {
                tracing::info!(title, id = best.id, "season validation failed, original-title fallback matched");
                return Some((best.id.to_string(), ItemType::Series, None));
            }
        }

        tracing::warn!(title, season, "no candidate carries the parsed season");
        None
    }

    async fn candidate_has_season(&self, tv_id: i64, season: i64) -> bool {
        match self.tmdb.tv_details(tv_id, None).await {
            Ok(details) => details.seasons.iter().any(|s| s.season_number == season),
            Err(_) => false,
        }
    }

    // ---- LLM secondary filter ----

    /// Keep only entries the model returns; any failure keeps the
    /// unfiltered list.
    async fn ai_secondary_filter(
        &self,
        items: Vec<GeneratedItem>,
        instruction: &str,
    ) -> Vec<GeneratedItem> {
        let Some(ai) = &self.ai else { return items };

        let payload = json!(items
            .iter()
            .map(|i| {
                json!({
                    "id": i.tmdb_id,
                    "title": i.title,
                    "type": i.item_type.as_str(),
                    "year": i.release_date.as_deref().and_then(|d| d.get(..4)),
                    "release_date": i.release_date,
                })
            })
            .collect::<Vec<_>>());

        match ai.filter_items(&payload, instruction).await {
            Ok(keep) => {
                let keep: HashSet<String> = keep.into_iter().collect();
                let filtered: Vec<GeneratedItem> = items
                    .iter()
                    .filter(|i| keep.contains(&i.tmdb_id))
                    .cloned()
                    .collect();
                if filtered.is_empty() {
                    tracing::warn!("secondary filter kept nothing; keeping unfiltered list");
                    items
                } else {
                    filtered
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "secondary filter failed; keeping unfiltered list");
                items
            }
        }
    }
}

/// Deduplicate by `(type, id, season)` keeping first occurrence; entries
/// without IDs never reach here (unresolved titles are dropped earlier).
fn dedup_items(items: Vec<GeneratedItem>) -> Vec<GeneratedItem> {
    let mut seen = HashSet::new();
    let mut seen_titles = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            if item.tmdb_id.is_empty() {
                return item
                    .title
                    .as_deref()
                    .is_some_and(|t| seen_titles.insert(normalize_name(t)));
            }
            seen.insert((item.item_type, item.tmdb_id.clone(), item.season))
        })
        .collect()
}

/// Parse a trailing season marker: Chinese numerals `一`..`二十` with an
/// optional `第` prefix, or a trailing bare number.
#[must_use]
pub fn parse_series_title(title: &str) -> (String, Option<i64>) {
    let trimmed = title.trim();

    if let Some(caps) = SEASON_MARKER_RE.captures(trimmed) {
        let base = caps.get(1).map_or("", |m| m.as_str()).trim();
        if let Some(season) = chinese_numeral(caps.get(2).map_or("", |m| m.as_str())) {
            if !base.is_empty() {
                return (base.to_string(), Some(season));
            }
        }
    }

    if let Some(caps) = TRAILING_NUMBER_RE.captures(trimmed) {
        let base = caps.get(1).map_or("", |m| m.as_str()).trim();
        if let Some(season) = caps.get(2).and_then(|m| m.as_str().parse::<i64>().ok()) {
            if season >= 2 && !base.is_empty() {
                return (base.to_string(), Some(season));
            }
        }
    }

    (trimmed.to_string(), None)
}

/// Chinese numerals 一..二十.
fn chinese_numeral(text: &str) -> Option<i64> {
    const DIGITS: [(&str, i64); 10] = [
        ("一", 1),
        ("二", 2),
        ("三", 3),
        ("四", 4),
        ("五", 5),
        ("六", 6),
        ("七", 7),
        ("八", 8),
        ("九", 9),
        ("十", 10),
    ];
    if text.is_empty() {
        return None;
    }
    if text == "十" {
        return Some(10);
    }
    if let Some(rest) = text.strip_prefix("十") {
        // 十一..十九
        return DIGITS
            .iter()
            .find(|(c, _)| *c == rest)
            .map(|(_, v)| 10 + v);
    }
    if let Some(rest) = text.strip_suffix("十") {
        // 二十
        return DIGITS
            .iter()
            .find(|(c, _)| *c == rest)
            .map(|(_, v)| v * 10);
    }
    DIGITS.iter().find(|(c, _)| *c == text).map(|(_, v)| *v)
}

/// Expand `{today}` / `{today±N}` macros in discover parameter values.
fn expand_date_macros(value: &str, today: chrono::NaiveDate) -> String {
    DATE_MACRO_RE
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let offset: i64 = caps
                .get(1)
                .map_or(0, |m| m.as_str().parse().unwrap_or(0));
            (today + ChronoDuration::days(offset)).to_string()
        })
        .into_owned()
}

fn split_platform(spec: &str) -> (String, String) {
    const PLATFORMS: [&str; 4] = ["tencent", "iqiyi", "youku", "mango"];
    if let Some((head, tail)) = spec.rsplit_once('-') {
        if PLATFORMS.contains(&tail) {
            return (head.to_string(), tail.to_string());
        }
    }
    (spec.to_string(), "all".to_string())
}

/// Argv tokens for the external fetcher: lowercase words joined by commas
/// or dashes, nothing else.
fn argv_token_ok(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ',' || c == '-' || c == '_')
}

fn first_find_result(found: &serde_json::Value) -> Option<(String, ItemType)> {
    for (key, item_type) in [
        ("movie_results", ItemType::Movie),
        ("tv_results", ItemType::Series),
    ] {
        if let Some(first) = found.get(key).and_then(|v| v.as_array()).and_then(|a| a.first())
        {
            if let Some(id) = first.get("id").and_then(serde_json::Value::as_i64) {
                return Some((id.to_string(), item_type));
            }
        }
    }
    None
}

/// Parse an RSS document into raw items: titles plus IMDb IDs carried on
/// guid/link and years scraped from descriptions.
fn parse_rss_items(xml: &str) -> Vec<RawListItem> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut in_item = false;
    let mut field: Option<String> = None;
    let mut title = String::new();
    let mut guid = String::new();
    let mut link = String::new();
    let mut description = String::new();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "item" {
                    in_item = true;
                    title.clear();
                    guid.clear();
                    link.clear();
                    description.clear();
                } else if in_item {
                    field = Some(name);
                }
            }
            Ok(Event::Text(e)) => {
                if in_item {
                    let text = e.decode().unwrap_or_default().into_owned();
                    match field.as_deref() {
                        Some("title") => title.push_str(&text),
                        Some("guid") => guid.push_str(&text),
                        Some("link") => link.push_str(&text),
                        Some("description") => description.push_str(&text),
                        _ => {}
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if in_item {
                    let text = String::from_utf8_lossy(&e).into_owned();
                    match field.as_deref() {
                        Some("title") => title.push_str(&text),
                        Some("description") => description.push_str(&text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "item" {
                    in_item = false;
                    if !title.trim().is_empty() {
                        let imdb_id = IMDB_ID_RE
                            .find(&guid)
                            .or_else(|| IMDB_ID_RE.find(&link))
                            .map(|m| m.as_str().to_string());
                        let year = YEAR_RE
                            .find(&description)
                            .and_then(|m| m.as_str().parse().ok());
                        items.push(RawListItem {
                            title: title.trim().to_string(),
                            imdb_id,
                            year,
                            ..Default::default()
                        });
                    }
                } else {
                    field = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!(error = %e, "rss parse aborted");
                break;
            }
            _ => {}
        }
        buf.clear();
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_series_title_chinese_marker() {
        assert_eq!(
            parse_series_title("漫长的季节 第二季"),
            ("漫长的季节".to_string(), Some(2))
        );
        assert_eq!(
            parse_series_title("风骚律师 第六季"),
            ("风骚律师".to_string(), Some(6))
        );
        assert_eq!(
            parse_series_title("某剧 十二季"),
            ("某剧".to_string(), Some(12))
        );
        assert_eq!(
            parse_series_title("某剧（第三季）"),
            ("某剧".to_string(), Some(3))
        );
    }

    #[test]
    fn test_parse_series_title_trailing_number() {
        assert_eq!(parse_series_title("Love 101"), ("Love".to_string(), Some(101)));
        // A trailing "1" is almost always part of the name, not a season.
        assert_eq!(parse_series_title("Se7en 1"), ("Se7en 1".to_string(), None));
    }

    #[test]
    fn test_parse_series_title_plain() {
        assert_eq!(parse_series_title("漫长的季节"), ("漫长的季节".to_string(), None));
    }

    #[test]
    fn test_chinese_numerals() {
        assert_eq!(chinese_numeral("一"), Some(1));
        assert_eq!(chinese_numeral("九"), Some(9));
        assert_eq!(chinese_numeral("十"), Some(10));
        assert_eq!(chinese_numeral("十一"), Some(11));
        assert_eq!(chinese_numeral("十九"), Some(19));
        assert_eq!(chinese_numeral("二十"), Some(20));
        assert_eq!(chinese_numeral("廿"), None);
    }

    #[test]
    fn test_expand_date_macros() {
        let today = chrono::NaiveDate::from_ymd_opt(2026, 8, 1).expect("date");
        assert_eq!(expand_date_macros("{today}", today), "2026-08-01");
        assert_eq!(expand_date_macros("{today-7}", today), "2026-07-25");
        assert_eq!(expand_date_macros("{today+30}", today), "2026-08-31");
        assert_eq!(expand_date_macros("2020-01-01", today), "2020-01-01");
    }

    #[test]
    fn test_split_platform() {
        assert_eq!(
            split_platform("hot-tencent"),
            ("hot".to_string(), "tencent".to_string())
        );
        assert_eq!(
            split_platform("hot,tv"),
            ("hot,tv".to_string(), "all".to_string())
        );
    }

    #[test]
    fn test_argv_token_validation() {
        assert!(argv_token_ok("hot,tv"));
        assert!(argv_token_ok("tencent"));
        assert!(!argv_token_ok("hot; rm -rf /"));
        assert!(!argv_token_ok(""));
        assert!(!argv_token_ok("a b"));
    }

    #[test]
    fn test_dedup_items_by_id_and_season() {
        let item = |id: &str, season: Option<i64>| GeneratedItem {
            tmdb_id: id.to_string(),
            item_type: ItemType::Series,
            emby_item_id: None,
            season,
            title: Some("t".into()),
            release_date: None,
        };
        let deduped = dedup_items(vec![
            item("1", Some(1)),
            item("1", Some(1)),
            item("1", Some(2)),
            item("2", None),
        ]);
        assert_eq!(deduped.len(), 3);
    }

    #[test]
    fn test_parse_rss_items() {
        let xml = r#"<?xml version="1.0"?>
        <rss><channel>
            <item>
                <title>沙丘2</title>
                <guid>https://www.imdb.com/title/tt15239678/</guid>
                <description>2024年科幻片</description>
            </item>
            <item>
                <title><![CDATA[奥本海默]]></title>
                <link>https://example.com/tt15398776</link>
                <description><![CDATA[Christopher Nolan, 2023]]></description>
            </item>
            <item><title></title></item>
        </channel></rss>"#;
        let items = parse_rss_items(xml);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "沙丘2");
        assert_eq!(items[0].imdb_id.as_deref(), Some("tt15239678"));
        assert_eq!(items[0].year, Some(2024));
        assert_eq!(items[1].imdb_id.as_deref(), Some("tt15398776"));
        assert_eq!(items[1].year, Some(2023));
    }
}
