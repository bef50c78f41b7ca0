//! Sync engine: one full pass over a source
//!
//! A pass is: decrypt credentials, connect both endpoints, discover and
//! filter calendars, reconcile each calendar, then persist the outcome.
//! Structural failures end the pass with an error result; per-event
//! failures accumulate as warnings and downgrade the result to partial.
//! Whatever happens, exactly one sync log row is written.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use calbridge_caldav::CalDavClient;
use calbridge_core::{
    CredentialCipher, sanitize_log_details,
    models::{Source, SyncLog, SyncStatus},
};
use calbridge_store::{malformed, sources, sync_logs};

use crate::activity::{ActivityTracker, SyncPhase};
use crate::reconcile::{CalendarOutcome, ReconcileContext, reconcile_calendar};

/// Event counters accumulated over one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub duplicates_removed: u64,
    pub calendars_synced: u64,
    pub events_processed: u64,
}

impl SyncCounts {
    pub fn merge(&mut self, other: &SyncCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.duplicates_removed += other.duplicates_removed;
        self.calendars_synced += other.calendars_synced;
        self.events_processed += other.events_processed;
    }
}

/// Terminal result of one pass
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub status: SyncStatus,
    pub message: String,
    pub counts: SyncCounts,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duration_ms: i64,
}

impl SyncOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, SyncStatus::Success | SyncStatus::Partial)
    }
}

/// The sync engine; cheap to clone, shared by all scheduler jobs
#[derive(Clone)]
pub struct SyncEngine {
    pool: SqlitePool,
    cipher: Arc<dyn CredentialCipher>,
    activity: ActivityTracker,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine").finish()
    }
}

impl SyncEngine {
    pub fn new(
        pool: SqlitePool,
        cipher: Arc<dyn CredentialCipher>,
        activity: ActivityTracker,
    ) -> Self {
        Self {
            pool,
            cipher,
            activity,
        }
    }

    pub fn activity(&self) -> &ActivityTracker {
        &self.activity
    }

    /// Execute one sync pass for a source
    ///
    /// Always returns an outcome and always leaves a sync log behind; the
    /// caller decides what to do with the result (alerts, scheduling).
    pub async fn sync_source(&self, source: &Source) -> SyncOutcome {
        let started = Instant::now();
        info!("Starting sync pass for source {} ({})", source.name, source.id);

        self.activity.begin(source.id);
        if let Err(e) = sources::mark_source_running(&self.pool, source.id).await {
            warn!("Could not mark source {} running: {}", source.id, e);
        }

        let outcome = self.run_pass(source, started).await;

        self.persist_outcome(source.id, &outcome).await;
        self.activity.finish(source.id);

        info!(
            "Sync pass for {} finished: {} ({} created, {} updated, {} deleted, {} skipped, {} duplicates removed, {} calendars, {}ms)",
            source.name,
            outcome.status,
            outcome.counts.created,
            outcome.counts.updated,
            outcome.counts.deleted,
            outcome.counts.skipped,
            outcome.counts.duplicates_removed,
            outcome.counts.calendars_synced,
            outcome.duration_ms,
        );

        outcome
    }

    async fn run_pass(&self, source: &Source, started: Instant) -> SyncOutcome {
        // Credentials never outlive this stack frame
        let source_password = match self.cipher.decrypt(&source.source_password_enc) {
            Ok(p) => p,
            Err(e) => return error_outcome(started, format!("source credential decryption failed: {e}")),
        };
        let dest_password = match self.cipher.decrypt(&source.dest_password_enc) {
            Ok(p) => p,
            Err(e) => return error_outcome(started, format!("destination credential decryption failed: {e}")),
        };

        let source_client =
            match CalDavClient::new(&source.source_url, &source.source_username, &source_password) {
                Ok(c) => c,
                Err(e) => return error_outcome(started, format!("source endpoint: {e}")),
            };
        let dest_client =
            match CalDavClient::new(&source.dest_url, &source.dest_username, &dest_password) {
                Ok(c) => c,
                Err(e) => return error_outcome(started, format!("destination endpoint: {e}")),
            };

        if let Err(e) = source_client.test_connection().await {
            return error_outcome(started, format!("source connection test failed: {e}"));
        }
        if let Err(e) = dest_client.test_connection().await {
            return error_outcome(started, format!("destination connection test failed: {e}"));
        }

        self.activity
            .set_phase(source.id, SyncPhase::DiscoveringCalendars);
        let discovered = match source_client.find_calendars().await {
            Ok(calendars) => calendars,
            Err(e) => return error_outcome(started, format!("calendar discovery failed: {e}")),
        };

        let calendars: Vec<_> = if source.selected_calendars.is_empty() {
            discovered
        } else {
            discovered
                .into_iter()
                .filter(|c| source.selected_calendars.iter().any(|s| s == &c.path))
                .collect()
        };

        // Fresh malformed snapshot for this pass
        if let Err(e) = malformed::delete_malformed_events_for_source(&self.pool, source.id).await {
            warn!("Could not clear malformed events for {}: {}", source.id, e);
        }

        let mut total = CalendarOutcome::default();
        let ctx = ReconcileContext {
            pool: &self.pool,
            source,
            source_client: &source_client,
            dest_client: &dest_client,
            activity: &self.activity,
        };

        for calendar in &calendars {
            self.activity.set_calendar(source.id, &calendar.path);
            let outcome = reconcile_calendar(&ctx, calendar).await;
            total.counts.merge(&outcome.counts);
            total.warnings.extend(outcome.warnings);
            total.errors.extend(outcome.errors);
        }

        let status = if !total.errors.is_empty() {
            SyncStatus::Error
        } else if !total.warnings.is_empty() {
            SyncStatus::Partial
        } else {
            SyncStatus::Success
        };

        let message = compose_message(status, &total, calendars.len());

        SyncOutcome {
            status,
            message,
            counts: total.counts,
            errors: total.errors,
            warnings: total.warnings,
            duration_ms: started.elapsed().as_millis() as i64,
        }
    }

    /// Persist the sync log and the source's terminal status
    async fn persist_outcome(&self, source_id: Uuid, outcome: &SyncOutcome) {
        let details = {
            let mut lines: Vec<String> = Vec::new();
            lines.extend(outcome.errors.iter().map(|e| format!("error: {e}")));
            lines.extend(outcome.warnings.iter().map(|w| format!("warning: {w}")));
            if lines.is_empty() {
                None
            } else {
                Some(sanitize_log_details(&lines.join("\n")))
            }
        };

        let log = SyncLog {
            id: Uuid::new_v4(),
            source_id,
            status: outcome.status,
            message: outcome.message.clone(),
            details,
            events_created: outcome.counts.created as i64,
            events_updated: outcome.counts.updated as i64,
            events_deleted: outcome.counts.deleted as i64,
            events_skipped: outcome.counts.skipped as i64,
            duplicates_removed: outcome.counts.duplicates_removed as i64,
            calendars_synced: outcome.counts.calendars_synced as i64,
            events_processed: outcome.counts.events_processed as i64,
            duration_ms: outcome.duration_ms,
            created_at: Utc::now(),
        };

        if let Err(e) = sync_logs::create_sync_log(&self.pool, &log).await {
            warn!("Could not persist sync log for {}: {}", source_id, e);
        }

        if let Err(e) =
            sources::finish_source_sync(&self.pool, source_id, outcome.status, &outcome.message)
                .await
        {
            warn!("Could not update source {} status: {}", source_id, e);
        }
    }
}

fn error_outcome(started: Instant, message: String) -> SyncOutcome {
    SyncOutcome {
        status: SyncStatus::Error,
        message: message.clone(),
        counts: SyncCounts::default(),
        errors: vec![message],
        warnings: Vec::new(),
        duration_ms: started.elapsed().as_millis() as i64,
    }
}

fn compose_message(status: SyncStatus, total: &CalendarOutcome, calendar_count: usize) -> String {
    match status {
        SyncStatus::Error => total
            .errors
            .first()
            .cloned()
            .unwrap_or_else(|| "sync failed".to_string()),
        _ => {
            let mut message = format!(
                "Synced {} of {} calendars: {} created, {} updated, {} deleted, {} skipped",
                total.counts.calendars_synced,
                calendar_count,
                total.counts.created,
                total.counts.updated,
                total.counts.deleted,
                total.counts.skipped,
            );
            if total.counts.duplicates_removed > 0 {
                message.push_str(&format!(
                    ", {} duplicates removed",
                    total.counts.duplicates_removed
                ));
            }
            if !total.warnings.is_empty() {
                message.push_str(&format!(" ({} warnings)", total.warnings.len()));
            }
            message
        }
    }
}
