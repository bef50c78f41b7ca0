//! Incremental sync-state repository

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use calbridge_core::models::SyncState;

use crate::retry::retry_db_busy;

/// Fetch the sync state of one (source, calendar) pair
pub async fn get_sync_state(
    pool: &SqlitePool,
    source_id: Uuid,
    calendar_path: &str,
) -> Result<Option<SyncState>, sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query_as::<_, SyncState>(
            "SELECT * FROM sync_state WHERE source_id = ? AND calendar_path = ?",
        )
        .bind(source_id)
        .bind(calendar_path)
        .fetch_optional(pool)
        .await
    })
    .await
}

/// Upsert the sync token and ctag after a successful incremental sync
pub async fn upsert_sync_state(
    pool: &SqlitePool,
    source_id: Uuid,
    calendar_path: &str,
    sync_token: &str,
    ctag: &str,
) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query(
            r#"
            INSERT INTO sync_state (source_id, calendar_path, sync_token, ctag, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (source_id, calendar_path)
            DO UPDATE SET sync_token = excluded.sync_token,
                          ctag = excluded.ctag,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(source_id)
        .bind(calendar_path)
        .bind(sync_token)
        .bind(ctag)
        .bind(Utc::now())
        .execute(pool)
        .await
        .map(|_| ())
    })
    .await
}
