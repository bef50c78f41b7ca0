//! Source repository

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use calbridge_core::models::{Source, SyncStatus};

use crate::retry::retry_db_busy;

/// Create a new source
pub async fn create_source(pool: &SqlitePool, source: &Source) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query(
            r#"
            INSERT INTO sources (
                id, user_id, name,
                source_url, source_username, source_password_enc,
                dest_url, dest_username, dest_password_enc,
                sync_interval_secs, sync_direction, conflict_strategy,
                selected_calendars, enabled,
                last_sync_at, last_sync_status, last_sync_message,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(source.id)
        .bind(source.user_id)
        .bind(&source.name)
        .bind(&source.source_url)
        .bind(&source.source_username)
        .bind(&source.source_password_enc)
        .bind(&source.dest_url)
        .bind(&source.dest_username)
        .bind(&source.dest_password_enc)
        .bind(source.sync_interval_secs)
        .bind(source.sync_direction)
        .bind(source.conflict_strategy)
        .bind(serde_json::to_string(&source.selected_calendars).unwrap_or_else(|_| "[]".into()))
        .bind(source.enabled)
        .bind(source.last_sync_at)
        .bind(source.last_sync_status)
        .bind(&source.last_sync_message)
        .bind(source.created_at)
        .bind(source.updated_at)
        .execute(pool)
        .await
        .map(|_| ())
    })
    .await
}

/// Fetch a source by id
pub async fn get_source(pool: &SqlitePool, id: Uuid) -> Result<Option<Source>, sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    })
    .await
}

/// Fetch a source by id, checked against its owning user
pub async fn get_source_for_user(
    pool: &SqlitePool,
    id: Uuid,
    user_id: Uuid,
) -> Result<Option<Source>, sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    })
    .await
}

/// All sources currently enabled, in creation order
pub async fn list_enabled_sources(pool: &SqlitePool) -> Result<Vec<Source>, sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE enabled = 1 ORDER BY created_at")
            .fetch_all(pool)
            .await
    })
    .await
}

/// All sources of one user
pub async fn list_sources_for_user(
    pool: &SqlitePool,
    user_id: Uuid,
) -> Result<Vec<Source>, sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query_as::<_, Source>(
            "SELECT * FROM sources WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    })
    .await
}

/// Update the mutable configuration of a source
pub async fn update_source(pool: &SqlitePool, source: &Source) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query(
            r#"
            UPDATE sources
            SET name = ?,
                source_url = ?, source_username = ?, source_password_enc = ?,
                dest_url = ?, dest_username = ?, dest_password_enc = ?,
                sync_interval_secs = ?, sync_direction = ?, conflict_strategy = ?,
                selected_calendars = ?, enabled = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&source.name)
        .bind(&source.source_url)
        .bind(&source.source_username)
        .bind(&source.source_password_enc)
        .bind(&source.dest_url)
        .bind(&source.dest_username)
        .bind(&source.dest_password_enc)
        .bind(source.sync_interval_secs)
        .bind(source.sync_direction)
        .bind(source.conflict_strategy)
        .bind(serde_json::to_string(&source.selected_calendars).unwrap_or_else(|_| "[]".into()))
        .bind(source.enabled)
        .bind(Utc::now())
        .bind(source.id)
        .execute(pool)
        .await
        .map(|_| ())
    })
    .await
}

/// Delete a source; dependent rows cascade
pub async fn delete_source(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map(|_| ())
    })
    .await
}

/// Mark a source as running
pub async fn mark_source_running(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query("UPDATE sources SET last_sync_status = ?, updated_at = ? WHERE id = ?")
            .bind(SyncStatus::Running)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await
            .map(|_| ())
    })
    .await
}

/// Record the terminal status of a sync pass
///
/// The last-sync timestamp only advances for passes that produced a usable
/// mirror (success or partial); stale detection keys off it.
pub async fn finish_source_sync(
    pool: &SqlitePool,
    id: Uuid,
    status: SyncStatus,
    message: &str,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    let synced_at = matches!(status, SyncStatus::Success | SyncStatus::Partial).then_some(now);

    retry_db_busy(async || {
        sqlx::query(
            r#"
            UPDATE sources
            SET last_sync_status = ?,
                last_sync_message = ?,
                last_sync_at = COALESCE(?, last_sync_at),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(message)
        .bind(synced_at)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map(|_| ())
    })
    .await
}
