//! Library users, per-user media state, and playback sessions

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::{ActiveSession, LibraryUser, UserMediaState};
use crate::Result;

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Snapshot a user's policy from the Library Server. The permission
    /// predicates in `repository::query` read this column.
    pub async fn upsert_user(&self, id: &str, name: &str, policy: &serde_json::Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO emby_users (id, name, policy, updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                policy = EXCLUDED.policy,
                updated_at = NOW()",
        )
        .bind(id)
        .bind(name)
        .bind(policy)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<LibraryUser>> {
        let row = sqlx::query("SELECT id, name, policy, updated_at FROM emby_users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(Self::row_to_user(&row)?),
            None => None,
        })
    }

    pub async fn all_users(&self) -> Result<Vec<LibraryUser>> {
        let rows = sqlx::query("SELECT id, name, policy, updated_at FROM emby_users")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_user).collect()
    }

    fn row_to_user(row: &PgRow) -> Result<LibraryUser> {
        Ok(LibraryUser {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            policy: row.try_get("policy")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub async fn delete_user(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM emby_users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- Per-user media state ----

    /// Partial upsert: only the fields the webhook carried overwrite.
    pub async fn upsert_media_state(&self, state: &UserMediaState) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_media_state
                (user_id, item_id, is_favorite, played, playback_position_ticks, last_played_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (user_id, item_id) DO UPDATE SET
                is_favorite = COALESCE(EXCLUDED.is_favorite, user_media_state.is_favorite),
                played = COALESCE(EXCLUDED.played, user_media_state.played),
                playback_position_ticks = COALESCE(EXCLUDED.playback_position_ticks,
                                                   user_media_state.playback_position_ticks),
                last_played_at = COALESCE(EXCLUDED.last_played_at,
                                          user_media_state.last_played_at)",
        )
        .bind(&state.user_id)
        .bind(&state.item_id)
        .bind(state.is_favorite)
        .bind(state.played)
        .bind(state.playback_position_ticks)
        .bind(state.last_played_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_media_state(
        &self,
        user_id: &str,
        item_id: &str,
    ) -> Result<Option<UserMediaState>> {
        let row = sqlx::query(
            "SELECT user_id, item_id, is_favorite, played, playback_position_ticks, last_played_at
             FROM user_media_state WHERE user_id = $1 AND item_id = $2",
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => Some(UserMediaState {
                user_id: row.try_get("user_id")?,
                item_id: row.try_get("item_id")?,
                is_favorite: row.try_get("is_favorite")?,
                played: row.try_get("played")?,
                playback_position_ticks: row.try_get("playback_position_ticks")?,
                last_played_at: row.try_get("last_played_at")?,
            }),
            None => None,
        })
    }

    // ---- Playback sessions ----

    pub async fn heartbeat_session(
        &self,
        user_id: &str,
        item_id: Option<&str>,
        client: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO active_sessions (user_id, item_id, client, last_updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (user_id) DO UPDATE SET
                item_id = EXCLUDED.item_id,
                client = EXCLUDED.client,
                last_updated_at = NOW()",
        )
        .bind(user_id)
        .bind(item_id)
        .bind(client)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn active_sessions(&self) -> Result<Vec<ActiveSession>> {
        let rows = sqlx::query(
            "SELECT user_id, item_id, client, last_updated_at FROM active_sessions",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(ActiveSession {
                    user_id: row.try_get("user_id")?,
                    item_id: row.try_get("item_id")?,
                    client: row.try_get("client")?,
                    last_updated_at: row.try_get("last_updated_at")?,
                })
            })
            .collect()
    }

    /// GC sessions older than the horizon (15 minutes by contract).
    pub async fn gc_stale_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - Duration::minutes(15);
        let result = sqlx::query("DELETE FROM active_sessions WHERE last_updated_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_media_state_partial_update_keeps_other_fields() {
        // Integration test placeholder
    }
}
