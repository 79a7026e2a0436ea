//! Review queue and processing log

use sqlx::{PgPool, Row};

use crate::Result;

#[derive(Debug, Clone)]
pub struct ReviewEntry {
    pub item_id: String,
    pub item_name: String,
    pub reason: String,
    pub score: Option<f64>,
}

#[derive(Clone)]
pub struct LogRepository {
    pool: PgPool,
}

impl LogRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Park an item for manual review (quality gate).
    pub async fn queue_for_review(
        &self,
        item_id: &str,
        item_name: &str,
        reason: &str,
        score: Option<f64>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO review_queue (item_id, item_name, reason, score, queued_at)
             VALUES ($1, $2, $3, $4, NOW())
             ON CONFLICT (item_id) DO UPDATE SET
                item_name = EXCLUDED.item_name,
                reason = EXCLUDED.reason,
                score = EXCLUDED.score,
                queued_at = NOW()",
        )
        .bind(item_id)
        .bind(item_name)
        .bind(reason)
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn review_queue(&self) -> Result<Vec<ReviewEntry>> {
        let rows = sqlx::query(
            "SELECT item_id, item_name, reason, score FROM review_queue ORDER BY queued_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(ReviewEntry {
                    item_id: row.try_get("item_id")?,
                    item_name: row.try_get("item_name")?,
                    reason: row.try_get("reason")?,
                    score: row.try_get("score")?,
                })
            })
            .collect()
    }

    pub async fn remove_from_review(&self, item_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM review_queue WHERE item_id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear_review_queue(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM review_queue")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Record an item-level outcome; failures carry the error text.
    pub async fn log_outcome(
        &self,
        item_id: &str,
        item_name: &str,
        outcome: &str,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO processing_log (item_id, item_name, outcome, error)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(item_id)
        .bind(item_name)
        .bind(outcome)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The most recent log lines for the status endpoint.
    pub async fn tail(&self, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT item_name, outcome, error, logged_at FROM processing_log
             ORDER BY logged_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let name: String = row.try_get("item_name").unwrap_or_default();
                let outcome: String = row.try_get("outcome").unwrap_or_default();
                let error: Option<String> = row.try_get("error").unwrap_or_default();
                let at: chrono::DateTime<chrono::Utc> =
                    row.try_get("logged_at").unwrap_or_default();
                match error {
                    Some(err) => format!("{} {} {} ({err})", at.to_rfc3339(), name, outcome),
                    None => format!("{} {} {}", at.to_rfc3339(), name, outcome),
                }
            })
            .collect())
    }
}
