//! Core domain models for CalBridge
//!
//! These models represent the core business entities and map to database tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User entity
///
/// Only the fields the sync side needs: alerts are addressed to the owning
/// user's mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// A configured sync source: one pair of CalDAV endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct Source {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub source_url: String,
    pub source_username: String,
    pub source_password_enc: String, // encrypted, never plaintext at rest
    pub dest_url: String,
    pub dest_username: String,
    pub dest_password_enc: String,
    pub sync_interval_secs: i64,
    pub sync_direction: SyncDirection,
    pub conflict_strategy: ConflictStrategy,
    #[sqlx(json)]
    pub selected_calendars: Vec<String>, // empty = all discovered
    pub enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: SyncStatus,
    pub last_sync_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sync direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    OneWay,
    TwoWay,
}

/// Conflict resolution strategy (coarse: one side wins wholesale)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    SourceWins,
    DestWins,
    LatestWins,
}

/// Status of the most recent sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Running,
    Success,
    Partial,
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Incremental sync state per (source, calendar)
///
/// Holds the opaque RFC 6578 sync token and the collection ctag. Upserted
/// only after a successful incremental sync of that calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct SyncState {
    pub source_id: Uuid,
    pub calendar_path: String,
    pub sync_token: String,
    pub ctag: String,
    pub updated_at: DateTime<Utc>,
}

/// Memory of a previously mirrored event
///
/// Presence means "this UID existed in the mirrored set as of updated_at";
/// absence means never seen or deliberately forgotten.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct SyncedEvent {
    pub source_id: Uuid,
    pub calendar_path: String,
    pub event_uid: String,
    pub source_etag: String,
    pub dest_etag: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one sync pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct SyncLog {
    pub id: Uuid,
    pub source_id: Uuid,
    pub status: SyncStatus,
    pub message: String,
    pub details: Option<String>, // sanitized and size-capped before persistence
    pub events_created: i64,
    pub events_updated: i64,
    pub events_deleted: i64,
    pub events_skipped: i64,
    pub duplicates_removed: i64,
    pub calendars_synced: i64,
    pub events_processed: i64,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// A remote calendar object whose iCalendar body failed to parse
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct MalformedEvent {
    pub id: Uuid,
    pub source_id: Uuid,
    pub event_path: String,
    pub error_message: String,
    pub discovered_at: DateTime<Utc>,
}

/// Malformed event joined with its source's display name, for operator views
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct MalformedEventWithSource {
    pub id: Uuid,
    pub source_id: Uuid,
    pub source_name: String,
    pub event_path: String,
    pub error_message: String,
    pub discovered_at: DateTime<Utc>,
}

/// Per-user alert routing overrides; None inherits the global default
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct UserAlertPreferences {
    pub user_id: Uuid,
    pub email_enabled: Option<bool>,
    pub webhook_enabled: Option<bool>,
    pub webhook_url: Option<String>,
    pub cooldown_minutes: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_display() {
        assert_eq!(SyncStatus::Pending.to_string(), "pending");
        assert_eq!(SyncStatus::Partial.to_string(), "partial");
        assert_eq!(SyncStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_direction_serde_wire_form() {
        let json = serde_json::to_string(&SyncDirection::TwoWay).unwrap();
        assert_eq!(json, "\"two_way\"");
        let parsed: ConflictStrategy = serde_json::from_str("\"source_wins\"").unwrap();
        assert_eq!(parsed, ConflictStrategy::SourceWins);
    }
}
