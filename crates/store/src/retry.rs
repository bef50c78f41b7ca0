//! Busy-retry for contended database writes
//!
//! SQLite signals contention as "database is locked" / "database is busy".
//! Those are transient; everything else propagates untouched.

use std::time::Duration;

use tracing::warn;

/// First backoff delay; doubles per attempt
const INITIAL_DELAY: Duration = Duration::from_millis(100);
/// Backoff ceiling
const MAX_DELAY: Duration = Duration::from_secs(5);
/// Total attempts before the error propagates
const MAX_ATTEMPTS: u32 = 5;

/// Run a database operation, retrying on transient busy/locked errors
pub async fn retry_db_busy<T, F>(mut op: F) -> Result<T, sqlx::Error>
where
    F: AsyncFnMut() -> Result<T, sqlx::Error>,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt = 1;

    loop {
        match op().await {
            Err(e) if attempt < MAX_ATTEMPTS && is_busy(&e) => {
                warn!(
                    "Database busy (attempt {}/{}), retrying in {:?}: {}",
                    attempt, MAX_ATTEMPTS, delay, e
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn is_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            let message = db.message().to_lowercase();
            message.contains("locked") || message.contains("busy")
        }
        _ => false,
    }
}
