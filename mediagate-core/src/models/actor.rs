use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::media::ItemType;

/// Library status of one tracked filmography entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackedStatus {
    InLibrary,
    PendingRelease,
    Missing,
    Ignored,
}

impl TrackedStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InLibrary => "IN_LIBRARY",
            Self::PendingRelease => "PENDING_RELEASE",
            Self::Missing => "MISSING",
            Self::Ignored => "IGNORED",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_LIBRARY" => Some(Self::InLibrary),
            "PENDING_RELEASE" => Some(Self::PendingRelease),
            "MISSING" => Some(Self::Missing),
            "IGNORED" => Some(Self::Ignored),
            _ => None,
        }
    }
}

/// The per-subscription filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionFilter {
    pub start_year: i32,
    pub media_types: Vec<ItemType>,
    pub genres_include: Vec<i64>,
    pub genres_exclude: Vec<i64>,
    /// 0 disables the rating floor.
    pub min_rating: f64,
    /// Works with fewer votes than this are exempt from the rating floor.
    pub min_vote_count: i64,
    /// Keep only works where the actor is billed in the top three.
    pub main_role_only: bool,
    /// Require a Chinese title.
    pub chinese_title_only: bool,
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        Self {
            start_year: 0,
            media_types: vec![ItemType::Movie, ItemType::Series],
            genres_include: Vec::new(),
            genres_exclude: Vec::new(),
            min_rating: 0.0,
            min_vote_count: 10,
            main_role_only: false,
            chinese_title_only: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorSubscription {
    pub id: i64,
    pub tmdb_person_id: i64,
    pub actor_name: String,
    pub enabled: bool,
    pub filter: SubscriptionFilter,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// A filmography entry under an actor subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedMedia {
    pub subscription_id: i64,
    pub tmdb_id: String,
    pub item_type: ItemType,
    pub title: String,
    pub release_date: Option<String>,
    pub season_number: Option<i64>,
    pub status: TrackedStatus,
    pub ignore_reason: Option<String>,
    pub emby_item_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_status_roundtrip() {
        for s in [
            TrackedStatus::InLibrary,
            TrackedStatus::PendingRelease,
            TrackedStatus::Missing,
            TrackedStatus::Ignored,
        ] {
            assert_eq!(TrackedStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_filter_defaults() {
        let f = SubscriptionFilter::default();
        assert_eq!(f.min_vote_count, 10);
        assert!(f.chinese_title_only);
        assert!(!f.main_role_only);
    }
}
