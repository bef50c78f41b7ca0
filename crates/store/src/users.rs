//! User repository

use sqlx::SqlitePool;
use uuid::Uuid;

use calbridge_core::models::User;

use crate::retry::retry_db_busy;

/// Create a user
pub async fn create_user(pool: &SqlitePool, user: &User) -> Result<(), sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query("INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)")
            .bind(user.id)
            .bind(&user.email)
            .bind(user.created_at)
            .execute(pool)
            .await
            .map(|_| ())
    })
    .await
}

/// Look up the mailbox alerts for this user are addressed to
pub async fn get_user_email(
    pool: &SqlitePool,
    user_id: Uuid,
) -> Result<Option<String>, sqlx::Error> {
    retry_db_busy(async || {
        sqlx::query_scalar::<_, String>("SELECT email FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await
    })
    .await
}
