//! Sync-log repository

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use calbridge_core::models::SyncLog;

use crate::retry::retry_db_busy;

/// Append one sync-log row
pub async fn create_sync_log(pool: &SqlitePool, log: &SyncLog) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query(
            r#"
            INSERT INTO sync_logs (
                id, source_id, status, message, details,
                events_created, events_updated, events_deleted, events_skipped,
                duplicates_removed, calendars_synced, events_processed,
                duration_ms, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.id)
        .bind(log.source_id)
        .bind(log.status)
        .bind(&log.message)
        .bind(&log.details)
        .bind(log.events_created)
        .bind(log.events_updated)
        .bind(log.events_deleted)
        .bind(log.events_skipped)
        .bind(log.duplicates_removed)
        .bind(log.calendars_synced)
        .bind(log.events_processed)
        .bind(log.duration_ms)
        .bind(log.created_at)
        .execute(pool)
        .await
        .map(|_| ())
    })
    .await
}

/// Most recent logs for a source
pub async fn list_sync_logs(
    pool: &SqlitePool,
    source_id: Uuid,
    limit: i64,
) -> Result<Vec<SyncLog>, sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query_as::<_, SyncLog>(
            "SELECT * FROM sync_logs WHERE source_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(source_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    })
    .await
}

/// Drop logs older than the cutoff; returns the number removed
pub async fn delete_sync_logs_older_than(
    pool: &SqlitePool,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query("DELETE FROM sync_logs WHERE created_at < ?")
            .bind(cutoff)
            .execute(pool)
            .await
            .map(|r| r.rows_affected())
    })
    .await
}
