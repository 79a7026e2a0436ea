//! Duplicate-version cleanup tasks

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::{CleanupTask, ItemType, MediaVersion};
use crate::{Error, Result};

#[derive(Clone)]
pub struct CleanupRepository {
    pool: PgPool,
}

const SELECT_COLUMNS: &str = "id, tmdb_id, item_type, title, versions, best_version_id, status";

impl CleanupRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &PgRow) -> Result<CleanupTask> {
        let item_type: String = row.try_get("item_type")?;
        Ok(CleanupTask {
            id: row.try_get("id")?,
            tmdb_id: row.try_get("tmdb_id")?,
            item_type: ItemType::parse(&item_type)
                .ok_or_else(|| Error::Internal(format!("unknown item type {item_type}")))?,
            title: row.try_get("title")?,
            versions: row
                .try_get::<serde_json::Value, _>("versions")
                .ok()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            best_version_id: row.try_get("best_version_id")?,
            status: row.try_get("status")?,
        })
    }

    pub async fn upsert(
        &self,
        tmdb_id: &str,
        item_type: ItemType,
        title: &str,
        versions: &[MediaVersion],
        best_version_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO cleanup_tasks (tmdb_id, item_type, title, versions, best_version_id, status)
             VALUES ($1, $2, $3, $4, $5, 'pending')
             ON CONFLICT (tmdb_id, item_type) DO UPDATE SET
                title = EXCLUDED.title,
                versions = EXCLUDED.versions,
                best_version_id = EXCLUDED.best_version_id,
                status = 'pending'",
        )
        .bind(tmdb_id)
        .bind(item_type.as_str())
        .bind(title)
        .bind(serde_json::to_value(versions)?)
        .bind(best_version_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<CleanupTask>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM cleanup_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    pub async fn pending(&self) -> Result<Vec<CleanupTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM cleanup_tasks WHERE status = 'pending' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    pub async fn set_status(&self, id: i64, status: &str) -> Result<()> {
        sqlx::query("UPDATE cleanup_tasks SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop tasks whose duplicates no longer exist.
    pub async fn remove(&self, tmdb_id: &str, item_type: ItemType) -> Result<()> {
        sqlx::query("DELETE FROM cleanup_tasks WHERE tmdb_id = $1 AND item_type = $2")
            .bind(tmdb_id)
            .bind(item_type.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cleanup_tasks")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
