use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the four-ID identity map.
///
/// Each external-ID column is globally unique when non-null; at least one
/// must be non-null for the row to exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonIdentity {
    pub map_id: i64,
    pub emby_person_id: Option<String>,
    pub tmdb_person_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub douban_celebrity_id: Option<String>,
    pub primary_name: String,
    pub aliases: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl PersonIdentity {
    /// Whether any external ID remains; an all-null row is an orphan the
    /// merge algorithm must never leave behind.
    #[must_use]
    pub const fn has_external_id(&self) -> bool {
        self.emby_person_id.is_some()
            || self.tmdb_person_id.is_some()
            || self.imdb_id.is_some()
            || self.douban_celebrity_id.is_some()
    }
}

/// Cached translation. A null `translated_text` is a poison record: the
/// phrase failed before and must not be retried online until cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationEntry {
    pub source_text: String,
    pub translated_text: Option<String>,
    pub engine: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_external_id() {
        let mut row = PersonIdentity {
            map_id: 1,
            emby_person_id: None,
            tmdb_person_id: Some(500),
            imdb_id: None,
            douban_celebrity_id: None,
            primary_name: "Tom".into(),
            aliases: vec![],
            updated_at: Utc::now(),
        };
        assert!(row.has_external_id());
        row.tmdb_person_id = None;
        assert!(!row.has_external_id());
    }
}
