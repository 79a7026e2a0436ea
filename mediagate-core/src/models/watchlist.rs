use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchlistStatus {
    Watching,
    Paused,
    Completed,
    /// Manually ended; immune to episode-count reopening but still revived
    /// by a brand-new season.
    ForceEnded,
}

impl WatchlistStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Watching => "Watching",
            Self::Paused => "Paused",
            Self::Completed => "Completed",
            Self::ForceEnded => "ForceEnded",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Watching" => Some(Self::Watching),
            "Paused" => Some(Self::Paused),
            "Completed" => Some(Self::Completed),
            "ForceEnded" => Some(Self::ForceEnded),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_ended(self) -> bool {
        matches!(self, Self::Completed | Self::ForceEnded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextEpisode {
    pub season_number: i64,
    pub episode_number: i64,
    pub air_date: Option<NaiveDate>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub emby_series_id: String,
    pub tmdb_id: String,
    pub title: String,
    pub status: WatchlistStatus,
    pub next_episode_to_air: Option<NextEpisode>,
    /// Season numbers announced upstream but absent from the library.
    pub missing_seasons: Vec<i64>,
    /// Highest season number seen on any previous scan; a newly announced
    /// season above this revives an ended entry.
    pub last_known_season: i64,
    pub is_airing: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in [
            WatchlistStatus::Watching,
            WatchlistStatus::Paused,
            WatchlistStatus::Completed,
            WatchlistStatus::ForceEnded,
        ] {
            assert_eq!(WatchlistStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_ended_states() {
        assert!(WatchlistStatus::Completed.is_ended());
        assert!(WatchlistStatus::ForceEnded.is_ended());
        assert!(!WatchlistStatus::Watching.is_ended());
    }
}
