//! Maintenance endpoints: review queue, database export/import

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;

use crate::http::{AppError, AppResult};
use crate::AppState;

/// Tables covered by export/import, explicitly listed.
const EXPORTABLE_TABLES: [&str; 8] = [
    "person_identity_map",
    "translation_cache",
    "media_metadata",
    "watchlist",
    "custom_collections",
    "actor_subscriptions",
    "tracked_media",
    "user_media_state",
];

pub async fn review_queue(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let entries = state.log_repo.review_queue().await?;
    let entries: Vec<Value> = entries
        .into_iter()
        .map(|e| {
            json!({
                "item_id": e.item_id,
                "item_name": e.item_name,
                "reason": e.reason,
                "score": e.score,
            })
        })
        .collect();
    Ok(Json(json!({ "review_queue": entries })))
}

/// Re-run a parked item with a forced full update and drop it from the
/// queue.
pub async fn reprocess_review_item(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<String>,
) -> AppResult<Json<Value>> {
    if !state.log_repo.remove_from_review(&item_id).await? {
        return Err(AppError::not_found("该项目不在手动处理列表中"));
    }
    let metadata = state.metadata.clone();
    let id = item_id.clone();
    state.queue.submit(
        format!("重新处理: {item_id}"),
        mediagate_core::task::ProcessorKind::Media,
        move |ctx| {
            Box::pin(async move {
                metadata.process(&ctx, &id, true).await?;
                Ok(())
            })
        },
    );
    Ok(Json(json!({"status": "reprocess_submitted"})))
}

pub async fn clear_review_queue(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let removed = state.log_repo.clear_review_queue().await?;
    Ok(Json(json!({"status": "cleared", "removed": removed})))
}

/// Dump the exportable tables as one JSON document, stamped with this
/// server's identity.
pub async fn export_tables(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let pool = state.media_repo.pool();
    let mut tables = serde_json::Map::new();
    for table in EXPORTABLE_TABLES {
        let rows = sqlx::query(&format!("SELECT to_jsonb(t) AS row FROM {table} t"))
            .fetch_all(pool)
            .await
            .map_err(|e| AppError::internal(format!("导出 {table} 失败: {e}")))?;
        let values: Vec<Value> = rows
            .into_iter()
            .filter_map(|r| r.try_get::<Value, _>("row").ok())
            .collect();
        tables.insert(table.to_string(), Value::Array(values));
    }
    Ok(Json(json!({
        "server_id": state.server_id,
        "tables": tables,
    })))
}

/// Truncate one exportable table.
pub async fn clear_table(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
) -> AppResult<Json<Value>> {
    if !EXPORTABLE_TABLES.contains(&table.as_str()) {
        return Err(AppError::bad_request(format!("不允许清空表 {table}")));
    }
    sqlx::query(&format!("TRUNCATE TABLE {table} CASCADE"))
        .execute(state.media_repo.pool())
        .await
        .map_err(|e| AppError::internal(format!("清空 {table} 失败: {e}")))?;
    Ok(Json(json!({"status": "cleared", "table": table})))
}

/// Re-align BIGSERIAL sequences with their tables' current maxima; needed
/// after an overwrite import carried explicit IDs.
pub async fn correct_sequences(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let pool = state.media_repo.pool();
    let mut corrected = Vec::new();
    for (table, column) in [
        ("person_identity_map", "map_id"),
        ("media_metadata", "id"),
        ("custom_collections", "id"),
        ("actor_subscriptions", "id"),
        ("cleanup_tasks", "id"),
        ("user_templates", "id"),
        ("processing_log", "id"),
    ] {
        let sql = format!(
            "SELECT setval(pg_get_serial_sequence('{table}', '{column}'), \
             COALESCE((SELECT MAX({column}) FROM {table}), 1))"
        );
        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => corrected.push(table),
            Err(e) => tracing::warn!(table, error = %e, "sequence correction failed"),
        }
    }
    Ok(Json(json!({"status": "corrected", "tables": corrected})))
}

#[derive(Deserialize)]
pub struct ImportPayload {
    pub server_id: String,
    pub tables: serde_json::Map<String, Value>,
}

/// Import a previous export. A matching `server_id` means the data
/// describes this library and rows may overwrite; a foreign ID restricts
/// the import to shareable tables (identity map and translation cache).
pub async fn import_tables(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ImportPayload>,
) -> AppResult<Json<Value>> {
    let overwrite = payload.server_id == state.server_id;
    let allowed: &[&str] = if overwrite {
        &EXPORTABLE_TABLES
    } else {
        &["person_identity_map", "translation_cache"]
    };

    let pool = state.media_repo.pool();
    let mut imported = 0usize;
    for (table, rows) in &payload.tables {
        if !allowed.contains(&table.as_str()) {
            tracing::warn!(table, overwrite, "import skipped table");
            continue;
        }
        let Some(rows) = rows.as_array() else { continue };
        for row in rows {
            // Generic JSON insert: uses jsonb_populate_record against the
            // live table shape, skipping conflicts.
            let sql = format!(
                "INSERT INTO {table} SELECT * FROM jsonb_populate_record(NULL::{table}, $1) \
                 ON CONFLICT DO NOTHING"
            );
            match sqlx::query(&sql).bind(row).execute(pool).await {
                Ok(_) => imported += 1,
                Err(e) => {
                    tracing::warn!(table, error = %e, "import row skipped");
                }
            }
        }
    }
    Ok(Json(json!({
        "status": "imported",
        "mode": if overwrite { "overwrite" } else { "share" },
        "rows": imported,
    })))
}
