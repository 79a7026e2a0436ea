//! Watchlist repository

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::{NextEpisode, WatchlistEntry, WatchlistStatus};
use crate::{Error, Result};

#[derive(Clone)]
pub struct WatchlistRepository {
    pool: PgPool,
}

const SELECT_COLUMNS: &str = "emby_series_id, tmdb_id, title, status, next_episode_to_air, \
                              missing_seasons, last_known_season, is_airing, last_checked_at";

impl WatchlistRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &PgRow) -> Result<WatchlistEntry> {
        let status: String = row.try_get("status")?;
        Ok(WatchlistEntry {
            emby_series_id: row.try_get("emby_series_id")?,
            tmdb_id: row.try_get("tmdb_id")?,
            title: row.try_get("title")?,
            status: WatchlistStatus::parse(&status)
                .ok_or_else(|| Error::Internal(format!("unknown watchlist status {status}")))?,
            next_episode_to_air: row
                .try_get::<Option<serde_json::Value>, _>("next_episode_to_air")?
                .and_then(|v| serde_json::from_value::<NextEpisode>(v).ok()),
            missing_seasons: row
                .try_get::<serde_json::Value, _>("missing_seasons")
                .ok()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            last_known_season: row.try_get("last_known_season")?,
            is_airing: row.try_get("is_airing")?,
            last_checked_at: row.try_get("last_checked_at")?,
        })
    }

    pub async fn get(&self, emby_series_id: &str) -> Result<Option<WatchlistEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM watchlist WHERE emby_series_id = $1"
        ))
        .bind(emby_series_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    pub async fn get_by_tmdb_id(&self, tmdb_id: &str) -> Result<Option<WatchlistEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM watchlist WHERE tmdb_id = $1 LIMIT 1"
        ))
        .bind(tmdb_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    pub async fn all(&self) -> Result<Vec<WatchlistEntry>> {
        let rows = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM watchlist"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Entries the periodic scan should touch: everything not force-ended,
    /// plus force-ended entries when `include_ended` (the weekly revival
    /// check) is set.
    pub async fn scannable(&self, include_ended: bool) -> Result<Vec<WatchlistEntry>> {
        let rows = if include_ended {
            sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM watchlist"))
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM watchlist WHERE status IN ('Watching', 'Paused')"
            ))
            .fetch_all(&self.pool)
            .await?
        };
        rows.iter().map(Self::row_to_entry).collect()
    }

    pub async fn upsert(&self, entry: &WatchlistEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO watchlist (emby_series_id, tmdb_id, title, status,
                next_episode_to_air, missing_seasons, last_known_season, is_airing,
                last_checked_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (emby_series_id) DO UPDATE SET
                tmdb_id = EXCLUDED.tmdb_id,
                title = EXCLUDED.title,
                status = EXCLUDED.status,
                next_episode_to_air = EXCLUDED.next_episode_to_air,
                missing_seasons = EXCLUDED.missing_seasons,
                last_known_season = EXCLUDED.last_known_season,
                is_airing = EXCLUDED.is_airing,
                last_checked_at = EXCLUDED.last_checked_at",
        )
        .bind(&entry.emby_series_id)
        .bind(&entry.tmdb_id)
        .bind(&entry.title)
        .bind(entry.status.as_str())
        .bind(
            entry
                .next_episode_to_air
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(serde_json::to_value(&entry.missing_seasons)?)
        .bind(entry.last_known_season)
        .bind(entry.is_airing)
        .bind(entry.last_checked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_status(&self, emby_series_id: &str, status: WatchlistStatus) -> Result<()> {
        sqlx::query("UPDATE watchlist SET status = $2 WHERE emby_series_id = $1")
            .bind(emby_series_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, emby_series_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM watchlist WHERE emby_series_id = $1")
            .bind(emby_series_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// TMDb IDs of series currently airing; feeds the `is_in_progress`
    /// rule field.
    pub async fn airing_tmdb_ids(&self) -> Result<std::collections::HashSet<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT tmdb_id FROM watchlist WHERE is_airing = TRUE")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_upsert_roundtrip() {
        // Integration test placeholder
    }
}
