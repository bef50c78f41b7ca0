//! Synced-event memory repository
//!
//! These rows are the engine's memory of what it has successfully mirrored.
//! The deletion phase reasons about them, so writes happen only for UIDs
//! observed and reconciled in the current pass.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use calbridge_core::models::SyncedEvent;

use crate::retry::retry_db_busy;

/// All memory rows for one (source, calendar) pair
pub async fn list_synced_events(
    pool: &SqlitePool,
    source_id: Uuid,
    calendar_path: &str,
) -> Result<Vec<SyncedEvent>, sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query_as::<_, SyncedEvent>(
            "SELECT * FROM synced_events WHERE source_id = ? AND calendar_path = ?",
        )
        .bind(source_id)
        .bind(calendar_path)
        .fetch_all(pool)
        .await
    })
    .await
}

/// Upsert one memory row
pub async fn upsert_synced_event(
    pool: &SqlitePool,
    source_id: Uuid,
    calendar_path: &str,
    event_uid: &str,
    source_etag: &str,
    dest_etag: &str,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    retry_db_busy(async || {
        sqlx::query(
            r#"
            INSERT INTO synced_events (
                source_id, calendar_path, event_uid,
                source_etag, dest_etag, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (source_id, calendar_path, event_uid)
            DO UPDATE SET source_etag = excluded.source_etag,
                          dest_etag = excluded.dest_etag,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(source_id)
        .bind(calendar_path)
        .bind(event_uid)
        .bind(source_etag)
        .bind(dest_etag)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map(|_| ())
    })
    .await
}

/// Forget one UID
pub async fn delete_synced_event(
    pool: &SqlitePool,
    source_id: Uuid,
    calendar_path: &str,
    event_uid: &str,
) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query(
            "DELETE FROM synced_events WHERE source_id = ? AND calendar_path = ? AND event_uid = ?",
        )
        .bind(source_id)
        .bind(calendar_path)
        .bind(event_uid)
        .execute(pool)
        .await
        .map(|_| ())
    })
    .await
}

/// Forget everything mirrored for a source
pub async fn delete_synced_events_for_source(
    pool: &SqlitePool,
    source_id: Uuid,
) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query("DELETE FROM synced_events WHERE source_id = ?")
            .bind(source_id)
            .execute(pool)
            .await
            .map(|_| ())
    })
    .await
}
