use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::media::ItemType;

/// How a collection's contents are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Rule evaluator over the metadata cache.
    Filter,
    /// Imported from external list sources.
    List,
    /// Per-user AI recommendations, computed at request time.
    AiRecommendation,
    /// Precomputed AI recommendations shared by all users.
    AiRecommendationGlobal,
}

impl CollectionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::List => "list",
            Self::AiRecommendation => "ai_recommendation",
            Self::AiRecommendationGlobal => "ai_recommendation_global",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "filter" => Some(Self::Filter),
            "list" => Some(Self::List),
            "ai_recommendation" => Some(Self::AiRecommendation),
            "ai_recommendation_global" => Some(Self::AiRecommendationGlobal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleLogic {
    #[default]
    And,
    Or,
}

/// One typed rule: `{field, operator, value}`. The value's shape depends on
/// the field group (strings, lists, person refs, day counts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub field: String,
    pub operator: String,
    pub value: Value,
}

/// The JSON definition column of a collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionDefinition {
    /// Declared item types; drives the synthetic view's CollectionType.
    pub item_type: Vec<ItemType>,
    pub rules: Vec<Rule>,
    pub logic: RuleLogic,
    /// List sources (RSS, provider lists, discover queries, maoyan://).
    pub urls: Vec<String>,
    /// Hard cap applied after dedup and filtering.
    pub limit: Option<usize>,
    /// Restrict matching to these library roots.
    pub target_library_ids: Vec<String>,
    /// LLM secondary-filter instruction for list imports.
    pub ai_filter_prompt: Option<String>,
    /// Prompt and target user for AI recommendation collections.
    pub ai_prompt: Option<String>,
    pub target_user_id: Option<String>,
    /// Whether the collection participates in the global latest view.
    pub show_in_latest: bool,
}

impl CollectionDefinition {
    /// The synthetic view type shown to clients: a single declared type maps
    /// to movies/tvshows, anything else is mixed.
    #[must_use]
    pub fn collection_type(&self) -> &'static str {
        match self.item_type.as_slice() {
            [ItemType::Series] => "tvshows",
            [_] => "movies",
            _ => "mixed",
        }
    }
}

/// One resolved entry of a list/AI collection's generated contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedItem {
    pub tmdb_id: String,
    pub item_type: ItemType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emby_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomCollection {
    pub id: i64,
    pub name: String,
    pub kind: CollectionKind,
    pub definition: CollectionDefinition,
    pub status: String,
    pub sort_order: i32,
    pub allowed_user_ids: Option<Vec<String>>,
    /// The concrete boxset created on the Library Server.
    pub emby_collection_id: Option<String>,
    pub in_library_count: i64,
    pub generated_media_info: Vec<GeneratedItem>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl CustomCollection {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    /// Visibility check against `allowed_user_ids`; unset means everyone.
    #[must_use]
    pub fn visible_to(&self, user_id: &str) -> bool {
        match &self.allowed_user_ids {
            Some(allowed) if !allowed.is_empty() => allowed.iter().any(|u| u == user_id),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_type_mapping() {
        let movie_only = CollectionDefinition {
            item_type: vec![ItemType::Movie],
            ..Default::default()
        };
        assert_eq!(movie_only.collection_type(), "movies");

        let series_only = CollectionDefinition {
            item_type: vec![ItemType::Series],
            ..Default::default()
        };
        assert_eq!(series_only.collection_type(), "tvshows");

        let mixed = CollectionDefinition {
            item_type: vec![ItemType::Movie, ItemType::Series],
            ..Default::default()
        };
        assert_eq!(mixed.collection_type(), "mixed");

        // An empty declaration is also mixed.
        assert_eq!(CollectionDefinition::default().collection_type(), "mixed");
    }

    #[test]
    fn test_visibility() {
        let mut coll = CustomCollection {
            id: 1,
            name: "n".into(),
            kind: CollectionKind::Filter,
            definition: CollectionDefinition::default(),
            status: "active".into(),
            sort_order: 0,
            allowed_user_ids: None,
            emby_collection_id: None,
            in_library_count: 0,
            generated_media_info: vec![],
            last_synced_at: None,
        };
        assert!(coll.visible_to("u1"));
        coll.allowed_user_ids = Some(vec!["u1".into(), "u2".into()]);
        assert!(coll.visible_to("u1"));
        assert!(!coll.visible_to("u3"));
        // Explicit empty list behaves like unset.
        coll.allowed_user_ids = Some(vec![]);
        assert!(coll.visible_to("u3"));
    }

    #[test]
    fn test_kind_roundtrip() {
        for k in [
            CollectionKind::Filter,
            CollectionKind::List,
            CollectionKind::AiRecommendation,
            CollectionKind::AiRecommendationGlobal,
        ] {
            assert_eq!(CollectionKind::parse(k.as_str()), Some(k));
        }
    }

    #[test]
    fn test_definition_tolerates_minimal_json() {
        let def: CollectionDefinition =
            serde_json::from_str(r#"{"item_type": ["Movie"], "logic": "OR"}"#).expect("valid");
        assert_eq!(def.logic, RuleLogic::Or);
        assert!(def.rules.is_empty());
        assert!(!def.show_in_latest);
    }
}
