//! Session repository. Tokens are stored as salted hash + deterministic
//! digest only.

use chrono::{DateTime, Utc};
use hush_common::models::session::Session;
use uuid::Uuid;

use super::ts;

#[allow(clippy::too_many_arguments)]
pub async fn insert_session(
    conn: &mut sqlx::AnyConnection,
    id: Uuid,
    user_id: Uuid,
    device_id: Uuid,
    token_hash: &str,
    token_digest: &str,
    expires_at: DateTime<Utc>,
) -> Result<Session, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        INSERT INTO sessions (id, user_id, device_id, token_hash, token_digest, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(device_id.to_string())
    .bind(token_hash)
    .bind(token_digest)
    .bind(ts(expires_at))
    .bind(ts(Utc::now()))
    .fetch_one(conn)
    .await
}

/// Sessions that are neither revoked nor expired.
pub async fn live_for_user(
    pool: &sqlx::AnyPool,
    user_id: Uuid,
) -> Result<Vec<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        "SELECT * FROM sessions WHERE user_id = ? AND revoked_at IS NULL AND expires_at > ?",
    )
    .bind(user_id.to_string())
    .bind(ts(Utc::now()))
    .fetch_all(pool)
    .await
}

pub async fn live_for_device(
    pool: &sqlx::AnyPool,
    device_id: Uuid,
) -> Result<Vec<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        "SELECT * FROM sessions WHERE device_id = ? AND revoked_at IS NULL AND expires_at > ?",
    )
    .bind(device_id.to_string())
    .bind(ts(Utc::now()))
    .fetch_all(pool)
    .await
}

pub async fn revoke_for_user(pool: &sqlx::AnyPool, user_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET revoked_at = ? WHERE user_id = ? AND revoked_at IS NULL")
        .bind(ts(Utc::now()))
        .bind(user_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn revoke_for_device(
    conn: &mut sqlx::AnyConnection,
    device_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET revoked_at = ? WHERE device_id = ? AND revoked_at IS NULL")
        .bind(ts(Utc::now()))
        .bind(device_id.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

/// Look up the session a presented token belongs to, by deterministic
/// digest. The salted hash is then verified by the caller.
pub async fn find_by_digest(
    pool: &sqlx::AnyPool,
    token_digest: &str,
) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token_digest = ?")
        .bind(token_digest)
        .fetch_optional(pool)
        .await
}
