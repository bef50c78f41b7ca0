//! Per-source sync scheduling
//!
//! One background job per enabled source, plus three process-wide
//! activities: sync-log retention, a health heartbeat, and stale detection.
//! A per-source try-lock guarantees at most one pass in flight per source;
//! concurrent triggers coalesce by dropping, never queueing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use calbridge_core::models::{SyncLog, SyncStatus};
use calbridge_store::{alert_prefs, sources, sync_logs, users};

use crate::engine::SyncEngine;
use crate::notifier::Notifier;

/// Hard ceiling on one sync pass
const SYNC_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Sync-log retention sweep cadence and horizon
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const LOG_RETENTION_DAYS: i64 = 30;
/// Health heartbeat cadence
const HEALTH_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Stale-detection scan cadence
const STALE_SCAN_INTERVAL: Duration = Duration::from_secs(60);

struct Job {
    interval_secs: i64,
    stop: CancellationToken,
    next_sync_at: Arc<std::sync::RwLock<DateTime<Utc>>>,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    pool: SqlitePool,
    engine: SyncEngine,
    notifier: Notifier,
    jobs: RwLock<HashMap<Uuid, Job>>,
    /// Per-source execution gates; entries die with their job
    locks: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// The process-wide scheduler; clones share state
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish()
    }
}

impl Scheduler {
    pub fn new(pool: SqlitePool, engine: SyncEngine, notifier: Notifier) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                pool,
                engine,
                notifier,
                jobs: RwLock::new(HashMap::new()),
                locks: RwLock::new(HashMap::new()),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// Load enabled sources, start their jobs and the background activities
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let enabled = sources::list_enabled_sources(&self.inner.pool).await?;
        let count = enabled.len();
        for source in enabled {
            self.add_job(source.id, source.sync_interval_secs).await;
        }

        let mut background = self.inner.background.lock().await;
        background.push(tokio::spawn(Self::run_cleanup(Arc::clone(&self.inner))));
        background.push(tokio::spawn(Self::run_health_log(Arc::clone(&self.inner))));
        background.push(tokio::spawn(Self::run_stale_detection(Arc::clone(
            &self.inner,
        ))));
        drop(background);

        info!("Scheduler started with {} jobs", count);
        Ok(())
    }

    /// Stop everything; idempotent
    ///
    /// Cancels the shared token, closes every job, and waits for in-flight
    /// work to drain.
    pub async fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }

        self.inner.shutdown.cancel();

        let jobs: Vec<Job> = {
            let mut map = self.inner.jobs.write().await;
            map.drain().map(|(_, job)| job).collect()
        };
        for job in jobs {
            job.stop.cancel();
            if let Err(e) = job.handle.await {
                warn!("Job task join failed: {}", e);
            }
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut background = self.inner.background.lock().await;
            background.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Background task join failed: {}", e);
            }
        }

        info!("Scheduler stopped");
    }

    /// Create (or replace) the job of a source; syncs immediately, then on
    /// every interval tick
    pub async fn add_job(&self, source_id: Uuid, interval_secs: i64) {
        self.spawn_job(source_id, interval_secs, true).await;
    }

    /// Drop a source's job, its execution gate, and its stale state
    pub async fn remove_job(&self, source_id: Uuid) {
        if let Some(job) = self.inner.jobs.write().await.remove(&source_id) {
            job.stop.cancel();
        }
        self.inner.locks.write().await.remove(&source_id);
        self.inner.notifier.clear_stale_state(source_id);
        info!("Removed job for source {}", source_id);
    }

    /// Replace a job's interval without an immediate run
    pub async fn update_job_interval(&self, source_id: Uuid, interval_secs: i64) {
        self.spawn_job(source_id, interval_secs, false).await;
    }

    /// Run one pass now, independent of the ticker but still gated
    pub fn trigger_sync(&self, source_id: Uuid) {
        let inner = Arc::clone(&self.inner);
        let fut: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
            Box::pin(async move {
                Self::execute_sync(inner, source_id).await;
            });
        tokio::spawn(fut);
    }

    pub async fn job_count(&self) -> usize {
        self.inner.jobs.read().await.len()
    }

    /// Projection of the next scheduled run for a source
    pub async fn next_sync_at(&self, source_id: Uuid) -> Option<DateTime<Utc>> {
        let jobs = self.inner.jobs.read().await;
        let job = jobs.get(&source_id)?;
        job.next_sync_at.read().ok().map(|at| *at)
    }

    /// Configured interval of a source's job
    pub async fn job_interval_secs(&self, source_id: Uuid) -> Option<i64> {
        self.inner
            .jobs
            .read()
            .await
            .get(&source_id)
            .map(|job| job.interval_secs)
    }

    async fn spawn_job(&self, source_id: Uuid, interval_secs: i64, immediate: bool) {
        let interval_secs = interval_secs.max(1);
        let stop = CancellationToken::new();
        let initial = if immediate {
            Utc::now()
        } else {
            Utc::now() + ChronoDuration::seconds(interval_secs)
        };
        let next_sync_at = Arc::new(std::sync::RwLock::new(initial));

        let handle = tokio::spawn(Box::pin(Self::run_job(
            Arc::clone(&self.inner),
            source_id,
            interval_secs,
            stop.clone(),
            Arc::clone(&next_sync_at),
            immediate,
        )));

        let job = Job {
            interval_secs,
            stop,
            next_sync_at,
            handle,
        };

        let replaced = self.inner.jobs.write().await.insert(source_id, job);
        if let Some(old) = replaced {
            old.stop.cancel();
        }

        info!(
            "Scheduled source {} every {}s (immediate: {})",
            source_id, interval_secs, immediate
        );
    }

    async fn run_job(
        inner: Arc<SchedulerInner>,
        source_id: Uuid,
        interval_secs: i64,
        stop: CancellationToken,
        next_sync_at: Arc<std::sync::RwLock<DateTime<Utc>>>,
        immediate: bool,
    ) {
        let period = Duration::from_secs(interval_secs as u64);

        let advance = |next: &Arc<std::sync::RwLock<DateTime<Utc>>>| {
            if let Ok(mut at) = next.write() {
                *at = Utc::now() + ChronoDuration::seconds(interval_secs);
            }
        };

        if immediate {
            Self::execute_sync(Arc::clone(&inner), source_id).await;
            advance(&next_sync_at);
        }

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    Self::execute_sync(Arc::clone(&inner), source_id).await;
                    advance(&next_sync_at);
                }
            }
        }
    }

    /// One gated sync execution
    async fn execute_sync(inner: Arc<SchedulerInner>, source_id: Uuid) {
        let gate = {
            let mut locks = inner.locks.write().await;
            Arc::clone(
                locks
                    .entry(source_id)
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let Ok(_guard) = gate.try_lock() else {
            info!(
                "Skipping sync for source {}: another sync is in progress",
                source_id
            );
            return;
        };

        let source = match sources::get_source(&inner.pool, source_id).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                info!("Source {} no longer exists, skipping sync", source_id);
                return;
            }
            Err(e) => {
                warn!("Could not load source {}: {}", source_id, e);
                return;
            }
        };
        if !source.enabled {
            return;
        }

        tokio::select! {
            result = tokio::time::timeout(SYNC_TIMEOUT, inner.engine.sync_source(&source)) => {
                match result {
                    Ok(outcome) => {
                        if outcome.succeeded() {
                            let prefs = alert_prefs::get_alert_preferences(&inner.pool, source.user_id)
                                .await
                                .ok()
                                .flatten();
                            let email = users::get_user_email(&inner.pool, source.user_id)
                                .await
                                .ok()
                                .flatten();
                            inner.notifier.send_recovery_alert(
                                source.id,
                                &source.name,
                                email,
                                prefs.as_ref(),
                            );
                        }
                        // Failures are left to stale detection
                    }
                    Err(_) => {
                        warn!("Sync for source {} timed out", source_id);
                        Self::record_timeout(Arc::clone(&inner), source_id).await;
                    }
                }
            }
            _ = inner.shutdown.cancelled() => {
                info!("Sync for source {} abandoned during shutdown", source_id);
            }
        }
    }

    /// The engine died mid-pass; leave an honest record behind
    async fn record_timeout(inner: Arc<SchedulerInner>, source_id: Uuid) {
        let message = format!(
            "sync timed out after {} minutes",
            SYNC_TIMEOUT.as_secs() / 60
        );
        let log = SyncLog {
            id: Uuid::new_v4(),
            source_id,
            status: SyncStatus::Error,
            message: message.clone(),
            details: None,
            events_created: 0,
            events_updated: 0,
            events_deleted: 0,
            events_skipped: 0,
            duplicates_removed: 0,
            calendars_synced: 0,
            events_processed: 0,
            duration_ms: SYNC_TIMEOUT.as_millis() as i64,
            created_at: Utc::now(),
        };
        if let Err(e) = sync_logs::create_sync_log(&inner.pool, &log).await {
            warn!("Could not persist timeout log for {}: {}", source_id, e);
        }
        if let Err(e) =
            sources::finish_source_sync(&inner.pool, source_id, SyncStatus::Error, &message).await
        {
            warn!("Could not update source {} after timeout: {}", source_id, e);
        }
    }

    /// Daily sweep of old sync logs
    async fn run_cleanup(inner: Arc<SchedulerInner>) {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let cutoff = Utc::now() - ChronoDuration::days(LOG_RETENTION_DAYS);
                    match sync_logs::delete_sync_logs_older_than(&inner.pool, cutoff).await {
                        Ok(0) => {}
                        Ok(removed) => info!("Log retention removed {} sync logs", removed),
                        Err(e) => warn!("Log retention sweep failed: {}", e),
                    }
                }
            }
        }
    }

    /// Periodic heartbeat with the job count
    async fn run_health_log(inner: Arc<SchedulerInner>) {
        let mut ticker = tokio::time::interval(HEALTH_INTERVAL);
        loop {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let count = inner.jobs.read().await.len();
                    info!("Scheduler health: {} jobs active", count);
                }
            }
        }
    }

    /// Scan all jobs for sources that stopped syncing
    async fn run_stale_detection(inner: Arc<SchedulerInner>) {
        let mut ticker = tokio::time::interval(STALE_SCAN_INTERVAL);
        loop {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    Self::stale_scan(&inner).await;
                }
            }
        }
    }

    async fn stale_scan(inner: &Arc<SchedulerInner>) {
        let ids: Vec<Uuid> = inner.jobs.read().await.keys().copied().collect();

        for source_id in ids {
            let source = match sources::get_source(&inner.pool, source_id).await {
                Ok(Some(source)) if source.enabled => source,
                _ => continue,
            };

            let Some((elapsed, threshold_secs)) = staleness(&source, Utc::now()) else {
                continue;
            };

            let prefs = alert_prefs::get_alert_preferences(&inner.pool, source.user_id)
                .await
                .ok()
                .flatten();
            let email = users::get_user_email(&inner.pool, source.user_id)
                .await
                .ok()
                .flatten();

            inner.notifier.send_stale_alert(
                source_id,
                &source.name,
                email,
                elapsed,
                threshold_secs,
                prefs.as_ref(),
            );
        }
    }
}

/// How overdue a source is, if it is stale at all
///
/// Stale means no successful sync within twice the interval; sources that
/// never synced count from their creation time.
fn staleness(
    source: &calbridge_core::models::Source,
    now: DateTime<Utc>,
) -> Option<(ChronoDuration, i64)> {
    let threshold_secs = source.sync_interval_secs.saturating_mul(2);
    let anchor = source.last_sync_at.unwrap_or(source.created_at);
    let elapsed = now - anchor;
    (elapsed.num_seconds() > threshold_secs).then_some((elapsed, threshold_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use calbridge_core::models::{ConflictStrategy, Source, SyncDirection, SyncStatus};

    fn source_with(
        interval_secs: i64,
        last_sync_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Source {
        Source {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "s".to_string(),
            source_url: String::new(),
            source_username: String::new(),
            source_password_enc: String::new(),
            dest_url: String::new(),
            dest_username: String::new(),
            dest_password_enc: String::new(),
            sync_interval_secs: interval_secs,
            sync_direction: SyncDirection::OneWay,
            conflict_strategy: ConflictStrategy::SourceWins,
            selected_calendars: Vec::new(),
            enabled: true,
            last_sync_at,
            last_sync_status: SyncStatus::Pending,
            last_sync_message: String::new(),
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn test_staleness_uses_double_interval() {
        let now = Utc::now();

        // Synced 25 minutes ago with a 15-minute interval: within 2x
        let fresh = source_with(900, Some(now - ChronoDuration::minutes(25)), now);
        assert!(staleness(&fresh, now).is_none());

        // Synced 31 minutes ago: past 2x
        let stale = source_with(900, Some(now - ChronoDuration::minutes(31)), now);
        let (elapsed, threshold) = staleness(&stale, now).expect("stale");
        assert_eq!(threshold, 1800);
        assert_eq!(elapsed.num_minutes(), 31);
    }

    #[test]
    fn test_staleness_never_synced_counts_from_creation() {
        let now = Utc::now();

        let young = source_with(900, None, now - ChronoDuration::minutes(10));
        assert!(staleness(&young, now).is_none());

        let old = source_with(900, None, now - ChronoDuration::hours(2));
        assert!(staleness(&old, now).is_some());
    }
}
