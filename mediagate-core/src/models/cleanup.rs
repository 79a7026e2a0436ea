use serde::{Deserialize, Serialize};

use super::media::ItemType;

/// One concrete library item among colocated duplicates of the same
/// metadata row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaVersion {
    pub emby_item_id: String,
    pub path: Option<String>,
    pub container: Option<String>,
    pub width: Option<i64>,
    pub bitrate: Option<i64>,
    pub size_bytes: Option<i64>,
}

impl MediaVersion {
    /// Ranking key for picking the version to keep: resolution first, then
    /// bitrate, then file size.
    #[must_use]
    pub fn quality_key(&self) -> (i64, i64, i64) {
        (
            self.width.unwrap_or(0),
            self.bitrate.unwrap_or(0),
            self.size_bytes.unwrap_or(0),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupTask {
    pub id: i64,
    pub tmdb_id: String,
    pub item_type: ItemType,
    pub title: String,
    pub versions: Vec<MediaVersion>,
    pub best_version_id: Option<String>,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_key_orders_by_resolution_first() {
        let hd = MediaVersion {
            emby_item_id: "a".into(),
            path: None,
            container: None,
            width: Some(1920),
            bitrate: Some(4_000),
            size_bytes: Some(1),
        };
        let uhd_low_bitrate = MediaVersion {
            emby_item_id: "b".into(),
            path: None,
            container: None,
            width: Some(3840),
            bitrate: Some(2_000),
            size_bytes: Some(1),
        };
        assert!(uhd_low_bitrate.quality_key() > hd.quality_key());
    }
}
