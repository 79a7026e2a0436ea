//! Cache-first translation
//!
//! The persistent cache is consulted before any online call; a cached null
//! is a poison record that suppresses retries for the phrase until cleared.

use std::sync::Arc;

use mediagate_providers::ai::{AiClient, TranslateMode};

use crate::repository::PersonRepository;
use crate::service::cast::contains_cjk;
use crate::Result;

pub struct Translator {
    persons: PersonRepository,
    ai: Option<Arc<AiClient>>,
}

impl Translator {
    #[must_use]
    pub fn new(persons: PersonRepository, ai: Option<Arc<AiClient>>) -> Self {
        Self { persons, ai }
    }

    /// Translate a name or role field.
    ///
    /// Returns `None` when the input needs no translation (already CJK,
    /// empty, short all-uppercase token) or when translation is impossible;
    /// callers keep the original text in that case.
    pub async fn translate_field(&self, text: &str) -> Result<Option<String>> {
        let trimmed = text.trim();
        if trimmed.is_empty() || contains_cjk(trimmed) {
            return Ok(None);
        }
        // Short all-uppercase tokens are initialisms, not names.
        if trimmed.chars().count() <= 2 && trimmed.chars().all(|c| c.is_ascii_uppercase()) {
            return Ok(None);
        }

        if let Some(entry) = self.persons.get_translation(trimmed).await? {
            return match entry.translated_text {
                Some(cached) => {
                    tracing::debug!(source = trimmed, target = %cached, "translation cache hit");
                    Ok(Some(cached))
                }
                None => {
                    tracing::debug!(source = trimmed, "translation cache hit (poison record)");
                    Ok(None)
                }
            };
        }

        let Some(ai) = &self.ai else {
            return Ok(None);
        };

        match ai.translate(trimmed).await {
            Ok(Some(translated))
                if !translated.trim().is_empty()
                    && !translated.trim().eq_ignore_ascii_case(trimmed) =>
            {
                let translated = translated.trim().to_string();
                tracing::info!(source = trimmed, target = %translated, "online translation");
                self.persons
                    .save_translation(trimmed, Some(&translated), "ai")
                    .await?;
                Ok(Some(translated))
            }
            Ok(_) => {
                // The engine declined or echoed the input; poison the phrase.
                self.persons
                    .save_translation(trimmed, None, "failed_or_same_via_ai")
                    .await?;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(source = trimmed, error = %e, "online translation failed");
                self.persons
                    .save_translation(trimmed, None, "failed_or_same_via_ai")
                    .await?;
                Ok(None)
            }
        }
    }

    /// Batch translation with cache pre-pass. Only phrases with no cache
    /// entry at all go online; the result map covers every input that now
    /// has a translation.
    pub async fn translate_batch(
        &self,
        texts: &[String],
        mode: TranslateMode,
        title: Option<&str>,
        year: Option<i32>,
    ) -> Result<std::collections::HashMap<String, String>> {
        let mut resolved = std::collections::HashMap::new();
        let mut pending = Vec::new();

        for text in texts {
            let trimmed = text.trim();
            if trimmed.is_empty() || contains_cjk(trimmed) {
                continue;
            }
            match self.persons.get_translation(trimmed).await? {
                Some(entry) => {
                    if let Some(cached) = entry.translated_text {
                        resolved.insert(text.clone(), cached);
                    }
                }
                None => pending.push(trimmed.to_string()),
            }
        }

        if pending.is_empty() {
            return Ok(resolved);
        }
        let Some(ai) = &self.ai else {
            return Ok(resolved);
        };

        match ai.translate_batch(&pending, mode, title, year).await {
            Ok(map) => {
                for phrase in &pending {
                    match map.get(phrase) {
                        Some(t) if !t.trim().is_empty() && t.trim() != phrase => {
                            let t = t.trim().to_string();
                            self.persons
                                .save_translation(phrase, Some(&t), "ai")
                                .await?;
                            resolved.insert(phrase.clone(), t);
                        }
                        _ => {
                            self.persons
                                .save_translation(phrase, None, "failed_or_same_via_ai")
                                .await?;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, count = pending.len(), "batch translation failed");
            }
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    // The cache-vs-online interplay is covered by database-backed
    // integration tests; the pure gating rules live here.

    use crate::service::cast::contains_cjk;

    fn needs_translation(text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() || contains_cjk(trimmed) {
            return false;
        }
        !(trimmed.chars().count() <= 2 && trimmed.chars().all(|c| c.is_ascii_uppercase()))
    }

    #[test]
    fn test_translation_gating() {
        assert!(needs_translation("Tony Leung"));
        assert!(!needs_translation("梁朝伟"));
        assert!(!needs_translation(""));
        assert!(!needs_translation("  "));
        // Short all-uppercase tokens are never translated.
        assert!(!needs_translation("AI"));
        assert!(!needs_translation("Q"));
        // Three letters is past the initialism cutoff.
        assert!(needs_translation("DJ X"));
        assert!(needs_translation("Bob"));
    }
}
