//! In-memory sync activity tracker
//!
//! Live per-source progress for the API collaborator to read. State lives
//! only for the process lifetime; the durable record is the sync log.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Phase of an in-flight sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Connecting,
    DiscoveringCalendars,
    SyncingCalendar,
    CleaningDuplicates,
    Finished,
}

/// Progress snapshot of one source's pass
#[derive(Debug, Clone)]
pub struct SyncActivity {
    pub phase: SyncPhase,
    pub calendar: Option<String>,
    pub events_processed: u64,
    pub started_at: DateTime<Utc>,
}

/// Shared tracker; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct ActivityTracker {
    inner: Arc<RwLock<HashMap<Uuid, SyncActivity>>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a pass
    pub fn begin(&self, source_id: Uuid) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(
                source_id,
                SyncActivity {
                    phase: SyncPhase::Connecting,
                    calendar: None,
                    events_processed: 0,
                    started_at: Utc::now(),
                },
            );
        }
    }

    pub fn set_phase(&self, source_id: Uuid, phase: SyncPhase) {
        if let Ok(mut map) = self.inner.write() {
            if let Some(activity) = map.get_mut(&source_id) {
                activity.phase = phase;
            }
        }
    }

    pub fn set_calendar(&self, source_id: Uuid, calendar: &str) {
        if let Ok(mut map) = self.inner.write() {
            if let Some(activity) = map.get_mut(&source_id) {
                activity.phase = SyncPhase::SyncingCalendar;
                activity.calendar = Some(calendar.to_string());
            }
        }
    }

    pub fn add_events(&self, source_id: Uuid, count: u64) {
        if let Ok(mut map) = self.inner.write() {
            if let Some(activity) = map.get_mut(&source_id) {
                activity.events_processed += count;
            }
        }
    }

    /// Mark the pass finished; the entry stays readable until the next begin
    pub fn finish(&self, source_id: Uuid) {
        self.set_phase(source_id, SyncPhase::Finished);
    }

    pub fn get(&self, source_id: Uuid) -> Option<SyncActivity> {
        self.inner.read().ok()?.get(&source_id).cloned()
    }

    pub fn snapshot(&self) -> HashMap<Uuid, SyncActivity> {
        self.inner.read().map(|m| m.clone()).unwrap_or_default()
    }
}
