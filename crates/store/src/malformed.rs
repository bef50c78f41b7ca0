//! Malformed-event repository
//!
//! Operator-facing records of remote objects whose iCalendar body failed to
//! parse. Cleared and rebuilt per sync pass for a fresh snapshot.

use sqlx::SqlitePool;
use uuid::Uuid;

use calbridge_core::models::{MalformedEvent, MalformedEventWithSource};

use crate::retry::retry_db_busy;

/// Save one malformed-event record
pub async fn save_malformed_event(
    pool: &SqlitePool,
    record: &MalformedEvent,
) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query(
            r#"
            INSERT INTO malformed_events (id, source_id, event_path, error_message, discovered_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id)
        .bind(record.source_id)
        .bind(&record.event_path)
        .bind(&record.error_message)
        .bind(record.discovered_at)
        .execute(pool)
        .await
        .map(|_| ())
    })
    .await
}

/// All malformed events across a user's sources, with source names
pub async fn list_malformed_events_for_user(
    pool: &SqlitePool,
    user_id: Uuid,
) -> Result<Vec<MalformedEventWithSource>, sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query_as::<_, MalformedEventWithSource>(
            r#"
            SELECT m.id, m.source_id, s.name AS source_name,
                   m.event_path, m.error_message, m.discovered_at
            FROM malformed_events m
            JOIN sources s ON s.id = m.source_id
            WHERE s.user_id = ?
            ORDER BY m.discovered_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    })
    .await
}

/// Delete one record by id
pub async fn delete_malformed_event(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query("DELETE FROM malformed_events WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map(|_| ())
    })
    .await
}

/// Clear the snapshot for one source (start of each full reconciliation)
pub async fn delete_malformed_events_for_source(
    pool: &SqlitePool,
    source_id: Uuid,
) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query("DELETE FROM malformed_events WHERE source_id = ?")
            .bind(source_id)
            .execute(pool)
            .await
            .map(|_| ())
    })
    .await
}

/// Clear everything recorded for a user's sources
pub async fn delete_malformed_events_for_user(
    pool: &SqlitePool,
    user_id: Uuid,
) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query(
            r#"
            DELETE FROM malformed_events
            WHERE source_id IN (SELECT id FROM sources WHERE user_id = ?)
            "#,
        )
        .bind(user_id)
        .execute(pool)
        .await
        .map(|_| ())
    })
    .await
}
