//! AI recommendation engine
//!
//! Two strategies feed one list: the LLM proposes titles resolved through a
//! four-attempt search matrix, and vector similarity over persisted
//! overview embeddings fills the remainder. LLM results keep their order;
//! the union is capped at the collection's limit.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use mediagate_providers::ai::AiClient;

use crate::models::{CollectionDefinition, GeneratedItem, ItemType, MediaMetadata};
use crate::repository::MediaRepository;
use crate::service::cast::contains_cjk;
use crate::service::list_importer::ListImporter;
use crate::task::TaskContext;
use crate::{Error, Result};

/// Cosine score window: below the floor is noise, at the ceiling it is the
/// item itself.
const SCORE_FLOOR: f32 = 0.45;
const SCORE_CEILING: f32 = 0.999;

struct EmbeddingMatrix {
    ids: Vec<String>,
    titles: Vec<String>,
    types: Vec<ItemType>,
    /// L2-normalized row vectors.
    vectors: Vec<Vec<f32>>,
}

pub struct RecommendationEngine {
    media: MediaRepository,
    ai: Option<Arc<AiClient>>,
    importer: Arc<ListImporter>,
    /// In-memory embedding matrix, refreshed after library mutations.
    cache: RwLock<Option<Arc<EmbeddingMatrix>>>,
}

impl RecommendationEngine {
    #[must_use]
    pub fn new(
        media: MediaRepository,
        ai: Option<Arc<AiClient>>,
        importer: Arc<ListImporter>,
    ) -> Self {
        Self {
            media,
            ai,
            importer,
            cache: RwLock::new(None),
        }
    }

    /// Drop the cached matrix so the next query reloads it; called after
    /// items land in or leave the library.
    pub fn invalidate_cache(&self) {
        *self.cache.write() = None;
    }

    /// Generate for a global AI collection definition.
    pub async fn generate(&self, definition: &CollectionDefinition) -> Result<Vec<GeneratedItem>> {
        let Some(user_id) = definition.target_user_id.as_deref() else {
            return Err(Error::InvalidInput(
                "recommendation collection has no target user".to_string(),
            ));
        };
        let limit = definition.limit.unwrap_or(20);
        self.generate_for_user(user_id, limit, definition.ai_prompt.as_deref(), &definition.item_type)
            .await
    }

    /// The per-user entry point the proxy calls at request time.
    pub async fn generate_for_user(
        &self,
        user_id: &str,
        limit: usize,
        prompt: Option<&str>,
        allowed_types: &[ItemType],
    ) -> Result<Vec<GeneratedItem>> {
        let history = self.media.user_positive_history(user_id, 20).await?;
        if history.is_empty() {
            tracing::info!(user_id, "no viewing history, recommendations empty");
            return Ok(Vec::new());
        }

        let mut merged: Vec<GeneratedItem> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

        // Strategy A: LLM knowledge.
        for item in self.llm_strategy(&history, limit, prompt).await {
            if allowed_type(&item.item_type, allowed_types) && seen.insert(item.tmdb_id.clone()) {
                merged.push(item);
            }
        }

        // Strategy B: vector similarity fills up to the limit.
        if merged.len() < limit {
            for item in self.vector_strategy(&history, limit - merged.len() + 5).await? {
                if allowed_type(&item.item_type, allowed_types) && seen.insert(item.tmdb_id.clone())
                {
                    merged.push(item);
                }
            }
        }

        merged.truncate(limit);
        Ok(merged)
    }

    async fn llm_strategy(
        &self,
        history: &[MediaMetadata],
        limit: usize,
        prompt: Option<&str>,
    ) -> Vec<GeneratedItem> {
        let Some(ai) = &self.ai else { return Vec::new() };

        let history_titles: Vec<String> = history
            .iter()
            .map(|m| match m.release_year {
                Some(year) => format!("{} ({year})", m.title),
                None => m.title.clone(),
            })
            .collect();
        let request_count = (limit * 3 / 2).clamp(10, 50);
        let instruction = format!(
            "{} (Please recommend at least {request_count} items)",
            prompt.unwrap_or_default()
        );

        let recommendations = match ai.recommendations(&history_titles, &instruction).await {
            Ok(recs) => recs,
            Err(e) => {
                tracing::error!(error = %e, "LLM recommendation call failed");
                return Vec::new();
            }
        };

        let mut resolved = Vec::new();
        for rec in recommendations {
            if rec.title.is_empty() {
                continue;
            }
            let primary = match rec.media_type.as_deref() {
                Some("Series" | "tv") => ItemType::Series,
                _ => ItemType::Movie,
            };
            let secondary = if primary == ItemType::Movie {
                ItemType::Series
            } else {
                ItemType::Movie
            };

            // Chinese titles search best in Chinese; otherwise prefer the
            // original spelling.
            let primary_query = if contains_cjk(&rec.title) {
                rec.title.clone()
            } else {
                rec.original_title.clone().unwrap_or_else(|| rec.title.clone())
            };

            // Four-attempt matrix: primary/secondary type × primary/Chinese
            // query.
            let mut matched = self
                .importer
                .match_title(&primary_query, primary, rec.year)
                .await;
            if matched.is_none() {
                matched = self
                    .importer
                    .match_title(&primary_query, secondary, rec.year)
                    .await;
            }
            if matched.is_none() && primary_query != rec.title {
                matched = self.importer.match_title(&rec.title, primary, rec.year).await;
            }
            if matched.is_none() && primary_query != rec.title {
                matched = self
                    .importer
                    .match_title(&rec.title, secondary, rec.year)
                    .await;
            }

            match matched {
                Some((tmdb_id, item_type, season)) => resolved.push(GeneratedItem {
                    tmdb_id,
                    item_type,
                    emby_item_id: None,
                    season,
                    title: Some(rec.title),
                    release_date: None,
                }),
                None => {
                    tracing::debug!(title = %rec.title, "LLM recommendation did not resolve");
                }
            }
        }
        resolved
    }

    async fn vector_strategy(
        &self,
        history: &[MediaMetadata],
        limit: usize,
    ) -> Result<Vec<GeneratedItem>> {
        let matrix = self.load_matrix().await?;
        if matrix.ids.is_empty() {
            return Ok(Vec::new());
        }

        let history_ids: std::collections::HashSet<&str> =
            history.iter().map(|m| m.tmdb_id.as_str()).collect();
        let history_titles: Vec<&str> = history.iter().map(|m| m.title.as_str()).collect();

        // User profile: mean of the embeddings matched by ID, titles as
        // fallback.
        let mut profile = vec![0.0f32; matrix.vectors.first().map_or(0, Vec::len)];
        let mut matched = 0usize;
        for (idx, id) in matrix.ids.iter().enumerate() {
            let is_match = history_ids.contains(id.as_str())
                || history_titles
                    .iter()
                    .any(|t| !t.is_empty() && matrix.titles[idx].contains(*t));
            if is_match {
                for (p, v) in profile.iter_mut().zip(&matrix.vectors[idx]) {
                    *p += v;
                }
                matched += 1;
            }
        }
        if matched == 0 {
            tracing::info!("history has no embedding coverage, vector strategy empty");
            return Ok(Vec::new());
        }
        normalize(&mut profile);

        let mut scored: Vec<(usize, f32)> = matrix
            .vectors
            .iter()
            .enumerate()
            .map(|(idx, v)| (idx, dot(&profile, v)))
            .filter(|(idx, score)| {
                *score >= SCORE_FLOOR
                    && *score < SCORE_CEILING
                    && !history_ids.contains(matrix.ids[*idx].as_str())
                    && !history_titles
                        .iter()
                        .any(|t| !t.is_empty() && matrix.titles[*idx].contains(*t))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(idx, _)| GeneratedItem {
                tmdb_id: matrix.ids[idx].clone(),
                item_type: matrix.types[idx],
                emby_item_id: None,
                season: None,
                title: Some(matrix.titles[idx].clone()),
                release_date: None,
            })
            .collect())
    }

    async fn load_matrix(&self) -> Result<Arc<EmbeddingMatrix>> {
        if let Some(matrix) = self.cache.read().clone() {
            return Ok(matrix);
        }

        let rows = self.media.all_embeddings().await?;
        let mut ids = Vec::with_capacity(rows.len());
        let mut titles = Vec::with_capacity(rows.len());
        let mut types = Vec::with_capacity(rows.len());
        let mut vectors = Vec::with_capacity(rows.len());
        let dimension = rows.first().map_or(0, |(_, _, _, v)| v.len());
        for (id, title, item_type, mut vector) in rows {
            if vector.len() != dimension {
                continue;
            }
            normalize(&mut vector);
            ids.push(id);
            titles.push(title);
            types.push(item_type);
            vectors.push(vector);
        }
        let matrix = Arc::new(EmbeddingMatrix {
            ids,
            titles,
            types,
            vectors,
        });
        *self.cache.write() = Some(matrix.clone());
        tracing::debug!(rows = matrix.ids.len(), "embedding matrix loaded");
        Ok(matrix)
    }

    /// Batch task: embed overviews that have none yet.
    pub async fn generate_missing_embeddings(&self, ctx: &TaskContext) -> Result<()> {
        let Some(ai) = &self.ai else {
            return Ok(());
        };

        loop {
            ctx.check_stop()?;
            let rows = self.media.rows_missing_embedding(100).await?;
            if rows.is_empty() {
                break;
            }
            let inputs: Vec<String> = rows
                .iter()
                .map(|m| m.overview.clone().unwrap_or_default())
                .collect();
            let embeddings = ai.embeddings(inputs).await?;
            for (meta, embedding) in rows.iter().zip(embeddings) {
                if embedding.is_empty() {
                    continue;
                }
                self.media
                    .save_embedding(&meta.tmdb_id, meta.item_type, &embedding)
                    .await?;
            }
            ctx.update(-1, &format!("已生成 {} 条媒体向量", rows.len()));
        }
        self.invalidate_cache();
        Ok(())
    }
}

fn allowed_type(item_type: &ItemType, allowed: &[ItemType]) -> bool {
    allowed.is_empty() || allowed.contains(item_type)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_of(vectors: &[Vec<f32>]) -> Vec<f32> {
        let Some(first) = vectors.first() else {
            return Vec::new();
        };
        let mut profile = vec![0.0f32; first.len()];
        for v in vectors {
            for (p, x) in profile.iter_mut().zip(v) {
                *p += x;
            }
        }
        normalize(&mut profile);
        profile
    }

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((dot(&v, &v) - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_is_safe() {
        let mut v = vec![0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_window_bounds() {
        // Identical vectors score ~1.0 and fall outside the ceiling,
        // excluding the item itself.
        let a = vec![0.6, 0.8];
        assert!(dot(&a, &a) >= SCORE_CEILING);

        // Orthogonal vectors fall below the floor.
        let b = vec![1.0, 0.0];
        let c = vec![0.0, 1.0];
        assert!(dot(&b, &c) < SCORE_FLOOR);
    }

    #[test]
    fn test_profile_is_mean_direction() {
        let profile = profile_of(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!((profile[0] - profile[1]).abs() < 1e-6);
        assert!((dot(&profile, &profile) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_allowed_type() {
        assert!(allowed_type(&ItemType::Movie, &[]));
        assert!(allowed_type(&ItemType::Movie, &[ItemType::Movie]));
        assert!(!allowed_type(&ItemType::Movie, &[ItemType::Series]));
    }
}
