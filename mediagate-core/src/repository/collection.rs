//! Custom collection repository

use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::{CollectionDefinition, CollectionKind, CustomCollection, GeneratedItem};
use crate::{Error, Result};

#[derive(Clone)]
pub struct CollectionRepository {
    pool: PgPool,
}

const SELECT_COLUMNS: &str = "id, name, kind, definition, status, sort_order, \
    allowed_user_ids, emby_collection_id, in_library_count, generated_media_info, \
    last_synced_at";

impl CollectionRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_collection(row: &PgRow) -> Result<CustomCollection> {
        let kind: String = row.try_get("kind")?;
        let definition: serde_json::Value = row.try_get("definition")?;
        Ok(CustomCollection {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            kind: CollectionKind::parse(&kind)
                .ok_or_else(|| Error::Internal(format!("unknown collection kind {kind}")))?,
            definition: serde_json::from_value(definition)
                .map_err(|e| Error::Internal(format!("bad collection definition: {e}")))?,
            status: row.try_get("status")?,
            sort_order: row.try_get("sort_order")?,
            allowed_user_ids: row
                .try_get::<Option<serde_json::Value>, _>("allowed_user_ids")?
                .and_then(|v| serde_json::from_value(v).ok()),
            emby_collection_id: row.try_get("emby_collection_id")?,
            in_library_count: row.try_get("in_library_count")?,
            generated_media_info: row
                .try_get::<serde_json::Value, _>("generated_media_info")
                .ok()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            last_synced_at: row.try_get("last_synced_at")?,
        })
    }

    pub async fn create(
        &self,
        name: &str,
        kind: CollectionKind,
        definition: &CollectionDefinition,
        allowed_user_ids: Option<&[String]>,
    ) -> Result<CustomCollection> {
        let row = sqlx::query(&format!(
            "INSERT INTO custom_collections (name, kind, definition, allowed_user_ids)
             VALUES ($1, $2, $3, $4)
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(name)
        .bind(kind.as_str())
        .bind(serde_json::to_value(definition)?)
        .bind(allowed_user_ids.map(serde_json::to_value).transpose()?)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_collection(&row)
    }

    pub async fn get(&self, id: i64) -> Result<Option<CustomCollection>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM custom_collections WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_collection).transpose()
    }

    pub async fn all(&self) -> Result<Vec<CustomCollection>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM custom_collections ORDER BY sort_order, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_collection).collect()
    }

    pub async fn all_active(&self) -> Result<Vec<CustomCollection>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM custom_collections
             WHERE status = 'active' ORDER BY sort_order, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_collection).collect()
    }

    pub async fn update_definition(
        &self,
        id: i64,
        name: &str,
        definition: &CollectionDefinition,
        allowed_user_ids: Option<&[String]>,
        sort_order: i32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE custom_collections
             SET name = $2, definition = $3, allowed_user_ids = $4, sort_order = $5
             WHERE id = $1",
        )
        .bind(id)
        .bind(name)
        .bind(serde_json::to_value(definition)?)
        .bind(allowed_user_ids.map(serde_json::to_value).transpose()?)
        .bind(sort_order)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_status(&self, id: i64, status: &str) -> Result<()> {
        sqlx::query("UPDATE custom_collections SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_emby_collection_id(&self, id: i64, emby_collection_id: &str) -> Result<()> {
        sqlx::query("UPDATE custom_collections SET emby_collection_id = $2 WHERE id = $1")
            .bind(id)
            .bind(emby_collection_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Write a sync's outcome: generated contents and in-library count.
    pub async fn save_sync_result(
        &self,
        id: i64,
        generated: &[GeneratedItem],
        in_library_count: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE custom_collections
             SET generated_media_info = $2, in_library_count = $3, last_synced_at = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(serde_json::to_value(generated)?)
        .bind(in_library_count)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Swap the metadata binding of one generated entry (media-match
    /// correction from the API), optionally setting a season.
    pub async fn correct_generated_item(
        &self,
        id: i64,
        old_tmdb_id: &str,
        new_tmdb_id: &str,
        season: Option<i64>,
    ) -> Result<bool> {
        let Some(mut coll) = self.get(id).await? else {
            return Ok(false);
        };
        let mut changed = false;
        for item in &mut coll.generated_media_info {
            if item.tmdb_id == old_tmdb_id {
                item.tmdb_id = new_tmdb_id.to_string();
                item.season = season;
                changed = true;
            }
        }
        if changed {
            sqlx::query(
                "UPDATE custom_collections SET generated_media_info = $2 WHERE id = $1",
            )
            .bind(id)
            .bind(serde_json::to_value(&coll.generated_media_info)?)
            .execute(&self.pool)
            .await?;
        }
        Ok(changed)
    }

    /// Append a newly landed library item to a filter collection's cache.
    pub async fn append_generated_item(&self, id: i64, item: &GeneratedItem) -> Result<()> {
        let Some(mut coll) = self.get(id).await? else {
            return Ok(());
        };
        if coll
            .generated_media_info
            .iter()
            .any(|g| g.tmdb_id == item.tmdb_id && g.item_type == item.item_type)
        {
            return Ok(());
        }
        coll.generated_media_info.push(item.clone());
        let count = coll.in_library_count + 1;
        sqlx::query(
            "UPDATE custom_collections
             SET generated_media_info = $2, in_library_count = $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(serde_json::to_value(&coll.generated_media_info)?)
        .bind(count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM custom_collections WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_create_and_sync_roundtrip() {
        // Integration test placeholder
    }
}
