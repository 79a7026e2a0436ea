use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The four catalog item types the orchestrator tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    Movie,
    Series,
    Season,
    Episode,
}

impl ItemType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "Movie",
            Self::Series => "Series",
            Self::Season => "Season",
            Self::Episode => "Episode",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Movie" => Some(Self::Movie),
            "Series" => Some(Self::Series),
            "Season" => Some(Self::Season),
            "Episode" => Some(Self::Episode),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription lifecycle of a metadata row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    #[default]
    None,
    Wanted,
    PendingRelease,
    Subscribed,
    Ignored,
    Paused,
}

impl SubscriptionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Wanted => "WANTED",
            Self::PendingRelease => "PENDING_RELEASE",
            Self::Subscribed => "SUBSCRIBED",
            Self::Ignored => "IGNORED",
            Self::Paused => "PAUSED",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Self::None),
            "WANTED" => Some(Self::Wanted),
            "PENDING_RELEASE" => Some(Self::PendingRelease),
            "SUBSCRIBED" => Some(Self::Subscribed),
            "IGNORED" => Some(Self::Ignored),
            "PAUSED" => Some(Self::Paused),
            _ => None,
        }
    }
}

/// Where a subscription came from. Removing the last source returns the row
/// to `SubscriptionStatus::None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub id: String,
    pub name: String,
}

impl SubscriptionSource {
    #[must_use]
    pub fn collection(id: i64, name: &str) -> Self {
        Self {
            source_type: "collection".to_string(),
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn actor(subscription_id: i64, name: &str) -> Self {
        Self {
            source_type: "actor".to_string(),
            id: subscription_id.to_string(),
            name: name.to_string(),
        }
    }
}

/// A person reference stored on a metadata row's cast list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonRef {
    pub tmdb_id: Option<i64>,
    pub name: String,
}

/// One library asset backing a metadata row: the concrete item plus the
/// library it came from and its ancestor chain, used by the permission
/// predicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetDetail {
    pub emby_item_id: String,
    pub source_library_id: Option<String>,
    pub ancestor_ids: Vec<String>,
    pub runtime_minutes: Option<i64>,
}

/// The cached metadata row. One row may back multiple library items (for
/// example two cuts of the same movie).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub tmdb_id: String,
    pub item_type: ItemType,
    pub title: String,
    pub original_title: Option<String>,
    pub release_year: Option<i32>,
    pub release_date: Option<NaiveDate>,
    pub unified_rating: Option<String>,
    pub runtime_minutes: Option<i64>,
    pub rating: Option<f64>,
    pub overview: Option<String>,
    pub overview_embedding: Option<Vec<f32>>,
    pub genres: Vec<String>,
    pub countries: Vec<String>,
    pub studios: Vec<String>,
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
    pub actors: Vec<PersonRef>,
    pub directors: Vec<PersonRef>,
    pub emby_item_ids: Vec<String>,
    pub asset_details: Vec<AssetDetail>,
    pub parent_series_tmdb_id: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub in_library: bool,
    pub subscription_status: SubscriptionStatus,
    pub subscription_sources: Vec<SubscriptionSource>,
    pub date_added: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl MediaMetadata {
    #[must_use]
    pub fn new(tmdb_id: impl Into<String>, item_type: ItemType, title: impl Into<String>) -> Self {
        Self {
            tmdb_id: tmdb_id.into(),
            item_type,
            title: title.into(),
            original_title: None,
            release_year: None,
            release_date: None,
            unified_rating: None,
            runtime_minutes: None,
            rating: None,
            overview: None,
            overview_embedding: None,
            genres: Vec::new(),
            countries: Vec::new(),
            studios: Vec::new(),
            tags: Vec::new(),
            keywords: Vec::new(),
            actors: Vec::new(),
            directors: Vec::new(),
            emby_item_ids: Vec::new(),
            asset_details: Vec::new(),
            parent_series_tmdb_id: None,
            season_number: None,
            episode_number: None,
            in_library: false,
            subscription_status: SubscriptionStatus::None,
            subscription_sources: Vec::new(),
            date_added: None,
            last_synced_at: None,
        }
    }

    #[must_use]
    pub fn primary_emby_id(&self) -> Option<&str> {
        self.emby_item_ids.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_type_roundtrip() {
        for t in [
            ItemType::Movie,
            ItemType::Series,
            ItemType::Season,
            ItemType::Episode,
        ] {
            assert_eq!(ItemType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ItemType::parse("Album"), None);
    }

    #[test]
    fn test_subscription_status_roundtrip() {
        for s in [
            SubscriptionStatus::None,
            SubscriptionStatus::Wanted,
            SubscriptionStatus::PendingRelease,
            SubscriptionStatus::Subscribed,
            SubscriptionStatus::Ignored,
            SubscriptionStatus::Paused,
        ] {
            assert_eq!(SubscriptionStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_subscription_source_serde_uses_type_key() {
        let src = SubscriptionSource::collection(7, "热映榜");
        let v = serde_json::to_value(&src).expect("serialize");
        assert_eq!(v["type"], "collection");
        assert_eq!(v["id"], "7");
    }
}
