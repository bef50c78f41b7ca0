//! User alert-preference repository

use sqlx::SqlitePool;
use uuid::Uuid;

use calbridge_core::models::UserAlertPreferences;

use crate::retry::retry_db_busy;

/// Fetch a user's alert overrides; absent row means "all defaults"
pub async fn get_alert_preferences(
    pool: &SqlitePool,
    user_id: Uuid,
) -> Result<Option<UserAlertPreferences>, sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query_as::<_, UserAlertPreferences>(
            "SELECT * FROM user_alert_preferences WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    })
    .await
}

/// Upsert a user's alert overrides
pub async fn upsert_alert_preferences(
    pool: &SqlitePool,
    prefs: &UserAlertPreferences,
) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query(
            r#"
            INSERT INTO user_alert_preferences (
                user_id, email_enabled, webhook_enabled, webhook_url, cooldown_minutes
            )
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (user_id)
            DO UPDATE SET email_enabled = excluded.email_enabled,
                          webhook_enabled = excluded.webhook_enabled,
                          webhook_url = excluded.webhook_url,
                          cooldown_minutes = excluded.cooldown_minutes
            "#,
        )
        .bind(prefs.user_id)
        .bind(prefs.email_enabled)
        .bind(prefs.webhook_enabled)
        .bind(&prefs.webhook_url)
        .bind(prefs.cooldown_minutes)
        .execute(pool)
        .await
        .map(|_| ())
    })
    .await
}
