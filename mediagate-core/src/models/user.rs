use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A Library Server user with the policy snapshot the permission predicates
/// read. The policy is kept as the raw document so force-pushes round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryUser {
    pub id: String,
    pub name: String,
    pub policy: Value,
    pub updated_at: DateTime<Utc>,
}

/// Per-user playback state, keyed by `(user_id, item_id)` where episode IDs
/// have already been normalized to their owning series.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMediaState {
    pub user_id: String,
    pub item_id: String,
    pub is_favorite: Option<bool>,
    pub played: Option<bool>,
    pub playback_position_ticks: Option<i64>,
    pub last_played_at: Option<DateTime<Utc>>,
}

/// Playback heartbeat; rows older than 15 minutes are GC'd.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub user_id: String,
    pub item_id: Option<String>,
    pub client: Option<String>,
    pub last_updated_at: DateTime<Utc>,
}
