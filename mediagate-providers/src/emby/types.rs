//! Library Server wire types
//!
//! The Library Server speaks an Emby-compatible API: PascalCase JSON with
//! most fields optional. Only the fields the orchestrator consumes are
//! modeled; unknown fields are ignored on read and policy/configuration
//! documents are carried opaquely so force-pushes round-trip unmodified.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub user: UserDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub policy: Option<UserPolicy>,
    #[serde(default)]
    pub configuration: Option<serde_json::Value>,
}

/// The permission-relevant subset of a user policy.
///
/// Unrecognized fields are preserved in `extra` so a snapshot taken from one
/// user can be force-applied to another without losing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UserPolicy {
    pub is_administrator: bool,
    pub is_disabled: bool,
    pub enable_all_folders: bool,
    pub enabled_folders: Vec<String>,
    pub excluded_sub_folders: Vec<String>,
    pub blocked_tags: Vec<String>,
    pub max_parental_rating: Option<i32>,
    pub block_unrated_items: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub item_type: String,
    pub server_id: Option<String>,
    pub parent_id: Option<String>,
    pub series_id: Option<String>,
    pub series_name: Option<String>,
    pub season_id: Option<String>,
    pub index_number: Option<i32>,
    pub parent_index_number: Option<i32>,
    pub overview: Option<String>,
    pub production_year: Option<i32>,
    pub premiere_date: Option<String>,
    pub date_created: Option<String>,
    pub official_rating: Option<String>,
    pub community_rating: Option<f64>,
    pub run_time_ticks: Option<i64>,
    pub collection_type: Option<String>,
    pub is_folder: bool,
    pub child_count: Option<i64>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    #[serde(rename = "ProviderIds")]
    pub provider_ids: HashMap<String, String>,
    pub people: Vec<PersonEntry>,
    pub studios: Vec<NamedRef>,
    pub production_locations: Vec<String>,
    pub media_sources: Vec<MediaSource>,
    pub image_tags: HashMap<String, String>,
    pub path: Option<String>,
    pub user_data: Option<ItemUserData>,
    /// Fields we read-modify-write (cast updates) but never interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MediaItem {
    /// Provider ID lookup, tolerant of key casing (`Tmdb` vs `tmdb`).
    #[must_use]
    pub fn provider_id(&self, key: &str) -> Option<&str> {
        self.provider_ids
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NamedRef {
    pub name: String,
    pub id: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PersonEntry {
    pub name: String,
    pub id: Option<String>,
    pub role: Option<String>,
    #[serde(rename = "Type")]
    pub person_type: Option<String>,
    #[serde(rename = "ProviderIds")]
    pub provider_ids: HashMap<String, String>,
}

impl PersonEntry {
    #[must_use]
    pub fn provider_id(&self, key: &str) -> Option<&str> {
        self.provider_ids
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaSource {
    pub id: String,
    pub path: Option<String>,
    pub container: Option<String>,
    pub size: Option<i64>,
    pub bitrate: Option<i64>,
    pub media_streams: Vec<MediaStream>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaStream {
    pub codec: Option<String>,
    #[serde(rename = "Type")]
    pub stream_type: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub display_title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ItemUserData {
    pub is_favorite: bool,
    pub played: bool,
    pub playback_position_ticks: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ItemsResponse {
    pub items: Vec<MediaItem>,
    pub total_record_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_response_deserialize() {
        let json = r#"{
            "Items": [
                {"Id": "1", "Name": "Movie 1", "Type": "Movie", "IsFolder": false},
                {"Id": "2", "Name": "Show", "Type": "Series", "IsFolder": true}
            ],
            "TotalRecordCount": 2
        }"#;
        let resp: ItemsResponse = serde_json::from_str(json).expect("valid payload");
        assert_eq!(resp.total_record_count, 2);
        assert_eq!(resp.items[0].name, "Movie 1");
        assert!(resp.items[1].is_folder);
    }

    #[test]
    fn test_provider_id_case_insensitive() {
        let json = r#"{"Id": "1", "Name": "X", "Type": "Movie", "ProviderIds": {"Tmdb": "603", "Imdb": "tt0133093"}}"#;
        let item: MediaItem = serde_json::from_str(json).expect("valid payload");
        assert_eq!(item.provider_id("tmdb"), Some("603"));
        assert_eq!(item.provider_id("IMDB"), Some("tt0133093"));
        assert_eq!(item.provider_id("tvdb"), None);
    }

    #[test]
    fn test_policy_roundtrip_preserves_unknown_fields() {
        let json = r#"{
            "IsAdministrator": false,
            "EnableAllFolders": false,
            "EnabledFolders": ["f1"],
            "BlockedTags": ["NSFW"],
            "MaxParentalRating": 15,
            "EnableRemoteAccess": true
        }"#;
        let policy: UserPolicy = serde_json::from_str(json).expect("valid policy");
        assert_eq!(policy.enabled_folders, vec!["f1".to_string()]);
        assert_eq!(policy.max_parental_rating, Some(15));

        let out = serde_json::to_value(&policy).expect("serialize");
        assert_eq!(out["EnableRemoteAccess"], serde_json::json!(true));
    }

    #[test]
    fn test_media_stream_video_detection_fields() {
        let json = r#"{
            "Id": "v1", "Name": "V", "Type": "Movie",
            "MediaSources": [{"Id": "s1", "MediaStreams": [
                {"Type": "Video", "Codec": "h264", "Width": 1920},
                {"Type": "Audio", "Codec": "aac"}
            ]}]
        }"#;
        let item: MediaItem = serde_json::from_str(json).expect("valid payload");
        let streams = &item.media_sources[0].media_streams;
        assert_eq!(streams[0].stream_type.as_deref(), Some("Video"));
        assert_eq!(streams[0].width, Some(1920));
    }
}
