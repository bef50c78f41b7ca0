//! Per-calendar reconciliation
//!
//! The fast path replays RFC 6578 sync-collection deltas. The slow path is
//! the full three-way comparison between the source calendar, the
//! destination calendar, and the persisted memory of what was previously
//! mirrored. The memory is what lets deletion be distinguished from
//! never-seen, and its safety gates are what keep a flaky destination
//! query from cascading into deletions on the source.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use calbridge_caldav::{
    CalDavClient, CalDavError, CalendarInfo, EMPTY_DEDUPE_KEY, MalformedCollector, RemoteEvent,
    parse_identity,
};
use calbridge_core::models::{ConflictStrategy, MalformedEvent, Source, SyncDirection, SyncedEvent};
use calbridge_store::{malformed, sync_state, synced_events};

use crate::activity::ActivityTracker;
use crate::engine::SyncCounts;

/// Everything a per-calendar reconciliation needs
pub(crate) struct ReconcileContext<'a> {
    pub pool: &'a SqlitePool,
    pub source: &'a Source,
    pub source_client: &'a CalDavClient,
    pub dest_client: &'a CalDavClient,
    pub activity: &'a ActivityTracker,
}

/// Partial result of one calendar
#[derive(Debug, Default)]
pub(crate) struct CalendarOutcome {
    pub counts: SyncCounts,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Reconcile one calendar, incrementally when possible
pub(crate) async fn reconcile_calendar<'a>(
    ctx: &ReconcileContext<'a>,
    calendar: &CalendarInfo,
) -> CalendarOutcome {
    if let Some(outcome) = try_incremental(ctx, calendar).await {
        return outcome;
    }
    full_reconcile(ctx, calendar).await
}

/// Fast path: replay sync-collection deltas onto the destination
///
/// Requires server support and a previously stored sync token; anything
/// unexpected falls through to full reconciliation.
async fn try_incremental<'a>(
    ctx: &ReconcileContext<'a>,
    calendar: &CalendarInfo,
) -> Option<CalendarOutcome> {
    if !ctx.source_client.supports_webdav_sync(&calendar.path).await {
        return None;
    }

    let state = sync_state::get_sync_state(ctx.pool, ctx.source.id, &calendar.path)
        .await
        .ok()
        .flatten()?;
    if state.sync_token.is_empty() {
        return None;
    }

    let report = match ctx
        .source_client
        .sync_collection(&calendar.path, Some(&state.sync_token))
        .await
    {
        Ok(report) => report,
        Err(CalDavError::NotSupported) => {
            debug!("{}: sync-collection not supported, using full sync", calendar.path);
            return None;
        }
        Err(e) => {
            debug!("{}: sync-collection failed ({}), using full sync", calendar.path, e);
            return None;
        }
    };

    let dest_path = ctx.dest_client.base_path();
    let mut outcome = CalendarOutcome::default();

    for change in &report.changed {
        if change.data.trim().is_empty() {
            continue;
        }
        outcome.counts.events_processed += 1;
        ctx.activity.add_events(ctx.source.id, 1);

        let identity = parse_identity(&change.data).ok();
        let event = RemoteEvent {
            path: change.path.clone(),
            etag: change.etag.clone(),
            data: change.data.clone(),
            uid: identity.as_ref().map(|i| i.uid.clone()).unwrap_or_default(),
            summary: identity
                .as_ref()
                .map(|i| i.summary.clone())
                .unwrap_or_default(),
            dtstart_utc: identity
                .as_ref()
                .map(|i| i.dtstart_utc.clone())
                .unwrap_or_default(),
        };

        match ctx.dest_client.put_event(&dest_path, &event).await {
            Ok(Some(dest_etag)) => {
                outcome.counts.updated += 1;
                if !event.uid.is_empty() {
                    remember(ctx, &calendar.path, &event.uid, &event.etag, &dest_etag).await;
                }
            }
            Ok(None) => {}
            Err(e) => {
                outcome
                    .warnings
                    .push(format!("incremental write of {} failed: {}", change.path, e));
            }
        }
    }

    for deleted in &report.deleted {
        let target = format!(
            "{}/{}",
            dest_path.trim_end_matches('/'),
            last_segment(deleted)
        );
        if let Err(e) = ctx.dest_client.delete_event(&target).await {
            // Deletion misses on the fast path are logged, not counted
            warn!("incremental delete of {} failed: {}", target, e);
        } else {
            outcome.counts.deleted += 1;
        }
    }

    if let Err(e) = sync_state::upsert_sync_state(
        ctx.pool,
        ctx.source.id,
        &calendar.path,
        &report.sync_token,
        "",
    )
    .await
    {
        warn!("sync-state upsert for {} failed: {}", calendar.path, e);
    }

    outcome.counts.calendars_synced += 1;
    info!(
        "{}: incremental sync applied {} changes, {} deletions",
        calendar.path,
        report.changed.len(),
        report.deleted.len()
    );
    Some(outcome)
}

/// Slow path: full three-way reconciliation
async fn full_reconcile<'a>(ctx: &ReconcileContext<'a>, calendar: &CalendarInfo) -> CalendarOutcome {
    let mut outcome = CalendarOutcome::default();
    let source_id = ctx.source.id;

    // Enumerate source, collecting malformed objects
    let mut collector = MalformedCollector::new();
    let source_events = match ctx
        .source_client
        .get_events(&calendar.path, Some(&mut collector))
        .await
    {
        Ok(events) => events,
        Err(e) => {
            outcome
                .errors
                .push(format!("{}: source enumeration failed: {}", calendar.path, e));
            return outcome;
        }
    };
    persist_malformed(ctx, &collector).await;

    // Resolve the destination calendar
    let dest_path = match ctx.dest_client.find_calendars().await {
        Ok(calendars) if !calendars.is_empty() => {
            if calendars.len() > 1 {
                warn!(
                    "Destination exposes {} calendars; using the first ({})",
                    calendars.len(),
                    calendars[0].path
                );
            }
            calendars[0].path.clone()
        }
        Ok(_) | Err(_) => ctx.dest_client.base_path(),
    };

    // Enumerate destination; a failed query degrades to an empty set and
    // the deletion safety gate below keeps that harmless
    let dest_events = match ctx.dest_client.get_events(&dest_path, None).await {
        Ok(events) => events,
        Err(e) => {
            warn!(
                "{}: destination enumeration failed ({}), treating as empty",
                dest_path, e
            );
            Vec::new()
        }
    };

    // Load memory
    let memory_rows = match synced_events::list_synced_events(ctx.pool, source_id, &calendar.path)
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            outcome
                .errors
                .push(format!("{}: loading synced-event memory failed: {}", calendar.path, e));
            return outcome;
        }
    };
    let mut memory: HashMap<String, SyncedEvent> = memory_rows
        .into_iter()
        .map(|row| (row.event_uid.clone(), row))
        .collect();

    // Indexes
    let source_by_uid: HashMap<String, &RemoteEvent> = source_events
        .iter()
        .filter(|e| !e.uid.is_empty())
        .map(|e| (e.uid.clone(), e))
        .collect();
    let mut dest_by_uid: HashMap<String, RemoteEvent> = dest_events
        .iter()
        .filter(|e| !e.uid.is_empty())
        .map(|e| (e.uid.clone(), e.clone()))
        .collect();
    let mut dest_dedupe: HashSet<String> = dest_events
        .iter()
        .map(RemoteEvent::dedupe_key)
        .filter(|k| k != EMPTY_DEDUPE_KEY)
        .collect();

    // UIDs reconciled in this pass, with the etags to remember them under
    let mut current: HashMap<String, (String, String)> = HashMap::new();
    let mut deleted_uids: HashSet<String> = HashSet::new();

    // Deletion phase (two-way only)
    if ctx.source.sync_direction == SyncDirection::TwoWay {
        if dest_by_uid.is_empty() && !memory.is_empty() {
            // Safety gate: an empty destination with non-empty memory looks
            // like a transient query failure, not a mass deletion
            warn!(
                "{}: destination empty but memory holds {} events; skipping deletion phase",
                calendar.path,
                memory.len()
            );
        } else {
            let safety_threshold =
                Utc::now() - Duration::seconds(ctx.source.sync_interval_secs.max(0));
            let remembered_uids: Vec<String> = memory.keys().cloned().collect();

            for uid in remembered_uids {
                let on_source = source_by_uid.contains_key(&uid);
                let on_dest = dest_by_uid.contains_key(&uid);

                match (on_source, on_dest) {
                    (true, false) => {
                        let row = &memory[&uid];
                        if row.updated_at > safety_threshold {
                            // Too fresh: the event may simply not have
                            // propagated to the destination yet
                            continue;
                        }
                        let path = source_by_uid[&uid].path.clone();
                        match ctx.source_client.delete_event(&path).await {
                            Ok(()) => {
                                forget(ctx, &calendar.path, &uid).await;
                                memory.remove(&uid);
                                deleted_uids.insert(uid);
                                outcome.counts.deleted += 1;
                            }
                            Err(e) => outcome
                                .warnings
                                .push(format!("deleting {} on source failed: {}", path, e)),
                        }
                    }
                    (false, true) => {
                        let path = dest_by_uid[&uid].path.clone();
                        match ctx.dest_client.delete_event(&path).await {
                            Ok(()) => {
                                if let Some(removed) = dest_by_uid.remove(&uid) {
                                    dest_dedupe.remove(&removed.dedupe_key());
                                }
                                forget(ctx, &calendar.path, &uid).await;
                                memory.remove(&uid);
                                deleted_uids.insert(uid);
                                outcome.counts.deleted += 1;
                            }
                            Err(e) => outcome
                                .warnings
                                .push(format!("deleting {} on destination failed: {}", path, e)),
                        }
                    }
                    (false, false) => {
                        // Housekeeping: gone from both sides
                        forget(ctx, &calendar.path, &uid).await;
                        memory.remove(&uid);
                        deleted_uids.insert(uid);
                    }
                    (true, true) => {}
                }
            }
        }
    }

    // Source → destination
    for event in source_events.iter().filter(|e| !e.uid.is_empty()) {
        if deleted_uids.contains(&event.uid) {
            // Removed from the source in the deletion phase above; the
            // enumeration predates that and must not resurrect it
            continue;
        }
        outcome.counts.events_processed += 1;
        ctx.activity.add_events(source_id, 1);

        match dest_by_uid.remove(&event.uid) {
            None => {
                let key = event.dedupe_key();
                if key != EMPTY_DEDUPE_KEY && dest_dedupe.contains(&key) {
                    // Content-level duplicate under a different UID
                    outcome.counts.skipped += 1;
                    continue;
                }
                match ctx.dest_client.put_event(&dest_path, event).await {
                    Ok(Some(dest_etag)) => {
                        outcome.counts.created += 1;
                        dest_dedupe.insert(key);
                        current.insert(event.uid.clone(), (event.etag.clone(), dest_etag));
                    }
                    Ok(None) => {}
                    Err(e) => outcome
                        .warnings
                        .push(format!("writing {} to destination failed: {}", event.uid, e)),
                }
            }
            Some(dest_event) => {
                let source_changed = memory
                    .get(&event.uid)
                    .is_none_or(|m| m.source_etag != event.etag);
                if source_changed {
                    // Preserve the destination path so the PUT is an update
                    let update = RemoteEvent {
                        path: dest_event.path.clone(),
                        ..event.clone()
                    };
                    match ctx.dest_client.put_event(&dest_path, &update).await {
                        Ok(Some(dest_etag)) => {
                            outcome.counts.updated += 1;
                            current.insert(event.uid.clone(), (event.etag.clone(), dest_etag));
                        }
                        Ok(None) => {}
                        Err(e) => outcome
                            .warnings
                            .push(format!("updating {} on destination failed: {}", event.uid, e)),
                    }
                } else {
                    // Unchanged but still part of the mirrored set
                    current.insert(
                        event.uid.clone(),
                        (event.etag.clone(), dest_event.etag.clone()),
                    );
                }
            }
        }
    }

    // Destination → source (two-way only)
    if ctx.source.sync_direction == SyncDirection::TwoWay {
        for dest_event in dest_events.iter().filter(|e| !e.uid.is_empty()) {
            if deleted_uids.contains(&dest_event.uid) {
                continue;
            }
            let in_source = source_by_uid.contains_key(&dest_event.uid);
            let in_memory = memory.contains_key(&dest_event.uid);

            if !in_source && !in_memory {
                // New on the destination
                match ctx
                    .source_client
                    .put_event(&calendar.path, dest_event)
                    .await
                {
                    Ok(Some(source_etag)) => {
                        outcome.counts.created += 1;
                        current.insert(
                            dest_event.uid.clone(),
                            (source_etag, dest_event.etag.clone()),
                        );
                    }
                    Ok(None) => {}
                    Err(e) => outcome
                        .warnings
                        .push(format!("writing {} to source failed: {}", dest_event.uid, e)),
                }
            } else if in_source
                && ctx.source.conflict_strategy == ConflictStrategy::DestWins
                && memory
                    .get(&dest_event.uid)
                    .is_none_or(|m| m.dest_etag != dest_event.etag)
            {
                // Destination changed and it wins: copy back over the
                // source event's own path
                let update = RemoteEvent {
                    path: source_by_uid[&dest_event.uid].path.clone(),
                    ..dest_event.clone()
                };
                match ctx.source_client.put_event(&calendar.path, &update).await {
                    Ok(Some(source_etag)) => {
                        outcome.counts.updated += 1;
                        current.insert(
                            dest_event.uid.clone(),
                            (source_etag, dest_event.etag.clone()),
                        );
                    }
                    Ok(None) => {}
                    Err(e) => outcome
                        .warnings
                        .push(format!("updating {} on source failed: {}", dest_event.uid, e)),
                }
            }
        }
    }

    // Orphan cleanup: destination events the source no longer has
    if ctx.source.sync_direction == SyncDirection::OneWay
        && ctx.source.conflict_strategy == ConflictStrategy::SourceWins
    {
        for (uid, dest_event) in &dest_by_uid {
            match ctx.dest_client.delete_event(&dest_event.path).await {
                Ok(()) => {
                    forget(ctx, &calendar.path, uid).await;
                    outcome.counts.deleted += 1;
                }
                Err(e) => outcome
                    .warnings
                    .push(format!("removing orphan {} on destination failed: {}", uid, e)),
            }
        }
    }

    // Duplicate cleanup on the destination (best-effort)
    outcome.counts.duplicates_removed +=
        cleanup_duplicates(ctx, &dest_path, &source_by_uid).await;

    // Persist memory for everything reconciled this pass
    for (uid, (source_etag, dest_etag)) in &current {
        if let Err(e) = synced_events::upsert_synced_event(
            ctx.pool,
            source_id,
            &calendar.path,
            uid,
            source_etag,
            dest_etag,
        )
        .await
        {
            warn!("synced-event upsert for {} failed: {}", uid, e);
        }
    }

    outcome.counts.calendars_synced += 1;
    outcome
}

/// Remove content-level duplicates left on the destination
///
/// Groups the destination by dedupe key and keeps one member per group,
/// preferring the one whose UID the source knows.
async fn cleanup_duplicates<'a>(
    ctx: &ReconcileContext<'a>,
    dest_path: &str,
    source_by_uid: &HashMap<String, &RemoteEvent>,
) -> u64 {
    let events = match ctx.dest_client.get_events(dest_path, None).await {
        Ok(events) => events,
        Err(e) => {
            debug!("duplicate cleanup skipped, enumeration failed: {}", e);
            return 0;
        }
    };

    let mut groups: HashMap<String, Vec<&RemoteEvent>> = HashMap::new();
    for event in &events {
        let key = event.dedupe_key();
        if key == EMPTY_DEDUPE_KEY {
            continue;
        }
        groups.entry(key).or_default().push(event);
    }

    let mut removed = 0;
    for (key, members) in groups {
        if members.len() < 2 {
            continue;
        }
        let keeper = members
            .iter()
            .position(|m| source_by_uid.contains_key(&m.uid))
            .unwrap_or(0);

        for (index, member) in members.iter().enumerate() {
            if index == keeper {
                continue;
            }
            match ctx.dest_client.delete_event(&member.path).await {
                Ok(()) => {
                    removed += 1;
                    debug!("removed duplicate {} ({})", member.path, key);
                }
                Err(e) => {
                    warn!("removing duplicate {} failed: {}", member.path, e);
                }
            }
        }
    }

    removed
}

async fn persist_malformed<'a>(ctx: &ReconcileContext<'a>, collector: &MalformedCollector) {
    for record in collector.records() {
        let row = MalformedEvent {
            id: Uuid::new_v4(),
            source_id: ctx.source.id,
            event_path: record.path.clone(),
            error_message: record.message.clone(),
            discovered_at: Utc::now(),
        };
        if let Err(e) = malformed::save_malformed_event(ctx.pool, &row).await {
            warn!("saving malformed-event record for {} failed: {}", record.path, e);
        }
    }
}

async fn remember<'a>(
    ctx: &ReconcileContext<'a>,
    calendar_path: &str,
    uid: &str,
    source_etag: &str,
    dest_etag: &str,
) {
    if let Err(e) = synced_events::upsert_synced_event(
        ctx.pool,
        ctx.source.id,
        calendar_path,
        uid,
        source_etag,
        dest_etag,
    )
    .await
    {
        warn!("synced-event upsert for {} failed: {}", uid, e);
    }
}

async fn forget<'a>(ctx: &ReconcileContext<'a>, calendar_path: &str, uid: &str) {
    if let Err(e) =
        synced_events::delete_synced_event(ctx.pool, ctx.source.id, calendar_path, uid).await
    {
        warn!("deleting synced-event row for {} failed: {}", uid, e);
    }
}

fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}
