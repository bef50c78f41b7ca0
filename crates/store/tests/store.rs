//! Store integration tests over in-memory SQLite

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use calbridge_core::models::{
    ConflictStrategy, MalformedEvent, Source, SyncDirection, SyncLog, SyncStatus, User,
    UserAlertPreferences,
};
use calbridge_store::{
    alert_prefs, malformed, sources, sync_logs, sync_state, synced_events, users,
};

async fn test_pool() -> SqlitePool {
    // A single connection keeps every query on the same in-memory database
    let pool = calbridge_store::connect("sqlite::memory:", 1)
        .await
        .expect("connect in-memory");
    calbridge_store::migrate(&pool).await.expect("migrate");
    pool
}

fn test_user() -> User {
    User {
        id: Uuid::new_v4(),
        email: "alice@example.com".to_string(),
        created_at: Utc::now(),
    }
}

fn test_source(user_id: Uuid) -> Source {
    let now = Utc::now();
    Source {
        id: Uuid::new_v4(),
        user_id,
        name: "Work mirror".to_string(),
        source_url: "https://cal-a.example.com/dav/".to_string(),
        source_username: "alice".to_string(),
        source_password_enc: "enc-a".to_string(),
        dest_url: "https://cal-b.example.com/dav/".to_string(),
        dest_username: "alice".to_string(),
        dest_password_enc: "enc-b".to_string(),
        sync_interval_secs: 900,
        sync_direction: SyncDirection::TwoWay,
        conflict_strategy: ConflictStrategy::SourceWins,
        selected_calendars: vec!["/cal/work/".to_string()],
        enabled: true,
        last_sync_at: None,
        last_sync_status: SyncStatus::Pending,
        last_sync_message: String::new(),
        created_at: now,
        updated_at: now,
    }
}

async fn seed_source(pool: &SqlitePool) -> Source {
    let user = test_user();
    users::create_user(pool, &user).await.expect("create user");
    let source = test_source(user.id);
    sources::create_source(pool, &source)
        .await
        .expect("create source");
    source
}

#[tokio::test]
async fn test_source_round_trip() {
    let pool = test_pool().await;
    let source = seed_source(&pool).await;

    let loaded = sources::get_source(&pool, source.id)
        .await
        .expect("get")
        .expect("present");

    assert_eq!(loaded.name, "Work mirror");
    assert_eq!(loaded.sync_direction, SyncDirection::TwoWay);
    assert_eq!(loaded.conflict_strategy, ConflictStrategy::SourceWins);
    assert_eq!(loaded.selected_calendars, vec!["/cal/work/".to_string()]);
    assert_eq!(loaded.last_sync_status, SyncStatus::Pending);
    assert!(loaded.enabled);
}

#[tokio::test]
async fn test_ownership_checked_fetch() {
    let pool = test_pool().await;
    let source = seed_source(&pool).await;

    let hit = sources::get_source_for_user(&pool, source.id, source.user_id)
        .await
        .expect("query");
    assert!(hit.is_some());

    let miss = sources::get_source_for_user(&pool, source.id, Uuid::new_v4())
        .await
        .expect("query");
    assert!(miss.is_none());
}

#[tokio::test]
async fn test_enabled_enumeration_and_status_transitions() {
    let pool = test_pool().await;
    let source = seed_source(&pool).await;

    assert_eq!(
        sources::list_enabled_sources(&pool).await.expect("list").len(),
        1
    );

    sources::mark_source_running(&pool, source.id)
        .await
        .expect("running");
    let running = sources::get_source(&pool, source.id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(running.last_sync_status, SyncStatus::Running);
    assert!(running.last_sync_at.is_none());

    sources::finish_source_sync(&pool, source.id, SyncStatus::Success, "1 calendar synced")
        .await
        .expect("finish");
    let finished = sources::get_source(&pool, source.id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(finished.last_sync_status, SyncStatus::Success);
    assert_eq!(finished.last_sync_message, "1 calendar synced");
    assert!(finished.last_sync_at.is_some());

    // An error pass keeps the last successful timestamp
    let synced_at = finished.last_sync_at;
    sources::finish_source_sync(&pool, source.id, SyncStatus::Error, "connection refused")
        .await
        .expect("finish");
    let errored = sources::get_source(&pool, source.id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(errored.last_sync_status, SyncStatus::Error);
    assert_eq!(errored.last_sync_at, synced_at);
}

#[tokio::test]
async fn test_sync_state_upsert() {
    let pool = test_pool().await;
    let source = seed_source(&pool).await;

    assert!(
        sync_state::get_sync_state(&pool, source.id, "/cal/work/")
            .await
            .expect("get")
            .is_none()
    );

    sync_state::upsert_sync_state(&pool, source.id, "/cal/work/", "tok-1", "ctag-1")
        .await
        .expect("insert");
    sync_state::upsert_sync_state(&pool, source.id, "/cal/work/", "tok-2", "ctag-2")
        .await
        .expect("update");

    let state = sync_state::get_sync_state(&pool, source.id, "/cal/work/")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(state.sync_token, "tok-2");
    assert_eq!(state.ctag, "ctag-2");
}

#[tokio::test]
async fn test_synced_event_memory() {
    let pool = test_pool().await;
    let source = seed_source(&pool).await;

    synced_events::upsert_synced_event(&pool, source.id, "/cal/work/", "u1", "s1", "d1")
        .await
        .expect("upsert");
    synced_events::upsert_synced_event(&pool, source.id, "/cal/work/", "u2", "s2", "d2")
        .await
        .expect("upsert");
    synced_events::upsert_synced_event(&pool, source.id, "/cal/work/", "u1", "s1b", "d1b")
        .await
        .expect("re-upsert");

    let rows = synced_events::list_synced_events(&pool, source.id, "/cal/work/")
        .await
        .expect("list");
    assert_eq!(rows.len(), 2);
    let u1 = rows.iter().find(|r| r.event_uid == "u1").expect("u1");
    assert_eq!(u1.source_etag, "s1b");

    synced_events::delete_synced_event(&pool, source.id, "/cal/work/", "u1")
        .await
        .expect("delete");
    let rows = synced_events::list_synced_events(&pool, source.id, "/cal/work/")
        .await
        .expect("list");
    assert_eq!(rows.len(), 1);

    synced_events::delete_synced_events_for_source(&pool, source.id)
        .await
        .expect("delete all");
    assert!(
        synced_events::list_synced_events(&pool, source.id, "/cal/work/")
            .await
            .expect("list")
            .is_empty()
    );
}

#[tokio::test]
async fn test_sync_log_retention() {
    let pool = test_pool().await;
    let source = seed_source(&pool).await;

    let mut old = SyncLog {
        id: Uuid::new_v4(),
        source_id: source.id,
        status: SyncStatus::Success,
        message: "ok".to_string(),
        details: None,
        events_created: 1,
        events_updated: 0,
        events_deleted: 0,
        events_skipped: 0,
        duplicates_removed: 0,
        calendars_synced: 1,
        events_processed: 1,
        duration_ms: 1200,
        created_at: Utc::now() - Duration::days(40),
    };
    sync_logs::create_sync_log(&pool, &old).await.expect("old");

    old.id = Uuid::new_v4();
    old.created_at = Utc::now();
    sync_logs::create_sync_log(&pool, &old).await.expect("new");

    let removed = sync_logs::delete_sync_logs_older_than(&pool, Utc::now() - Duration::days(30))
        .await
        .expect("cleanup");
    assert_eq!(removed, 1);

    let remaining = sync_logs::list_sync_logs(&pool, source.id, 10)
        .await
        .expect("list");
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn test_malformed_event_lifecycle() {
    let pool = test_pool().await;
    let source = seed_source(&pool).await;

    let record = MalformedEvent {
        id: Uuid::new_v4(),
        source_id: source.id,
        event_path: "/cal/work/bad.ics".to_string(),
        error_message: "missing colon at line 5".to_string(),
        discovered_at: Utc::now(),
    };
    malformed::save_malformed_event(&pool, &record)
        .await
        .expect("save");

    let listed = malformed::list_malformed_events_for_user(&pool, source.user_id)
        .await
        .expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].source_name, "Work mirror");
    assert_eq!(listed[0].event_path, "/cal/work/bad.ics");

    malformed::delete_malformed_events_for_source(&pool, source.id)
        .await
        .expect("clear");
    assert!(
        malformed::list_malformed_events_for_user(&pool, source.user_id)
            .await
            .expect("list")
            .is_empty()
    );
}

#[tokio::test]
async fn test_alert_preferences() {
    let pool = test_pool().await;
    let source = seed_source(&pool).await;

    assert!(
        alert_prefs::get_alert_preferences(&pool, source.user_id)
            .await
            .expect("get")
            .is_none()
    );

    let prefs = UserAlertPreferences {
        user_id: source.user_id,
        email_enabled: Some(false),
        webhook_enabled: Some(true),
        webhook_url: Some("https://hooks.example.com/personal".to_string()),
        cooldown_minutes: Some(10),
    };
    alert_prefs::upsert_alert_preferences(&pool, &prefs)
        .await
        .expect("upsert");

    let loaded = alert_prefs::get_alert_preferences(&pool, source.user_id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(loaded.email_enabled, Some(false));
    assert_eq!(loaded.cooldown_minutes, Some(10));
}

#[tokio::test]
async fn test_user_email_lookup() {
    let pool = test_pool().await;
    let source = seed_source(&pool).await;

    let email = users::get_user_email(&pool, source.user_id)
        .await
        .expect("query");
    assert_eq!(email.as_deref(), Some("alice@example.com"));

    assert!(
        users::get_user_email(&pool, Uuid::new_v4())
            .await
            .expect("query")
            .is_none()
    );
}

#[tokio::test]
async fn test_source_delete_cascades() {
    let pool = test_pool().await;
    let source = seed_source(&pool).await;

    synced_events::upsert_synced_event(&pool, source.id, "/cal/work/", "u1", "s1", "d1")
        .await
        .expect("upsert");
    sync_state::upsert_sync_state(&pool, source.id, "/cal/work/", "tok", "ctag")
        .await
        .expect("state");

    sources::delete_source(&pool, source.id).await.expect("delete");

    assert!(
        synced_events::list_synced_events(&pool, source.id, "/cal/work/")
            .await
            .expect("list")
            .is_empty()
    );
    assert!(
        sync_state::get_sync_state(&pool, source.id, "/cal/work/")
            .await
            .expect("get")
            .is_none()
    );
}
