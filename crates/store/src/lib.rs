//! CalBridge Store - persistence adapter
//!
//! Repository functions over the shared SQLite pool. Every entry point
//! routes through the busy-retry helper so transient lock contention never
//! surfaces to callers.

pub mod alert_prefs;
pub mod malformed;
pub mod retry;
pub mod sources;
pub mod sync_logs;
pub mod sync_state;
pub mod synced_events;
pub mod users;

pub use retry::retry_db_busy;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Open the SQLite pool used by all repositories
///
/// Creates the database file when missing and sets a busy timeout so the
/// driver itself absorbs short lock waits before our retry layer sees them.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    tracing::info!(
        "Database pool established (max_connections: {})",
        max_connections
    );

    Ok(pool)
}

/// Run the workspace migrations
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}
