//! User repository.

use chrono::Utc;
use hush_common::models::user::{User, Visibility};
use uuid::Uuid;

use super::ts;

/// Create a user. Runs inside the registration transaction.
pub async fn create_user(
    conn: &mut sqlx::AnyConnection,
    id: Uuid,
    phone_number: &str,
    username: &str,
    display_name: Option<&str>,
) -> Result<User, sqlx::Error> {
    let now = ts(Utc::now());
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, phone_number, username, display_name, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id.to_string())
    .bind(phone_number)
    .bind(username)
    .bind(display_name)
    .bind(&now)
    .bind(&now)
    .fetch_one(conn)
    .await
}

pub async fn find_by_id(pool: &sqlx::AnyPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
}

pub async fn find_by_phone(
    pool: &sqlx::AnyPool,
    phone_number: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone_number = ?")
        .bind(phone_number)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_username(
    pool: &sqlx::AnyPool,
    username: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(username) = LOWER(?)")
        .bind(username)
        .fetch_optional(pool)
        .await
}

/// Update profile fields; absent fields keep their value.
pub async fn update_profile(
    pool: &sqlx::AnyPool,
    id: Uuid,
    username: Option<&str>,
    display_name: Option<&str>,
    avatar: Option<&str>,
    show_online_status: Option<Visibility>,
    show_last_seen: Option<Visibility>,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        UPDATE users SET
            username = COALESCE(?, username),
            display_name = COALESCE(?, display_name),
            avatar = COALESCE(?, avatar),
            show_online_status = COALESCE(?, show_online_status),
            show_last_seen = COALESCE(?, show_last_seen),
            updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(username)
    .bind(display_name)
    .bind(avatar)
    .bind(show_online_status.map(|v| v.as_str()))
    .bind(show_last_seen.map(|v| v.as_str()))
    .bind(ts(Utc::now()))
    .bind(id.to_string())
    .fetch_one(pool)
    .await
}

/// Search by username prefix. Caller enforces the 3-char minimum.
pub async fn search(
    pool: &sqlx::AnyPool,
    query: &str,
    limit: i64,
) -> Result<Vec<User>, sqlx::Error> {
    let escaped = query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE username LIKE ? ESCAPE '\'
        ORDER BY username ASC
        LIMIT ?
        "#,
    )
    .bind(format!("{escaped}%"))
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn set_pin(pool: &sqlx::AnyPool, id: Uuid, pin_hash: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET pin_hash = ?, updated_at = ? WHERE id = ?")
        .bind(pin_hash)
        .bind(ts(Utc::now()))
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn clear_pin(pool: &sqlx::AnyPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET pin_hash = NULL, updated_at = ? WHERE id = ?")
        .bind(ts(Utc::now()))
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Hard-delete a user and everything attached. Runs inside the account
/// deletion transaction; the caller also purges store state (presence,
/// offline queue) and blacklists live tokens.
pub async fn delete_user_cascade(
    conn: &mut sqlx::AnyConnection,
    id: Uuid,
    phone_number: &str,
) -> Result<(), sqlx::Error> {
    let id_str = id.to_string();
    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(&id_str)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM devices WHERE user_id = ?")
        .bind(&id_str)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM approval_requests WHERE phone_number = ?")
        .bind(phone_number)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM one_time_prekeys WHERE user_id = ?")
        .bind(&id_str)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM user_prekeys WHERE user_id = ?")
        .bind(&id_str)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM verification_codes WHERE phone_number = ?")
        .bind(phone_number)
        .execute(&mut *conn)
        .await?;
    // Undelivered messages addressed to the user; sent history in other
    // people's conversations stays (they own their copy of the metadata).
    sqlx::query("DELETE FROM messages WHERE recipient_id = ? AND status = 'sent'")
        .bind(&id_str)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        r#"
        DELETE FROM messages WHERE conversation_id IN (
            SELECT conversation_id FROM conversation_members WHERE user_id = ?
        )
        "#,
    )
    .bind(&id_str)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        r#"
        DELETE FROM conversations WHERE id IN (
            SELECT conversation_id FROM conversation_members WHERE user_id = ?
        )
        "#,
    )
    .bind(&id_str)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        r#"
        DELETE FROM conversation_members WHERE conversation_id NOT IN (
            SELECT id FROM conversations
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;
    sqlx::query("DELETE FROM media_objects WHERE owner_id = ?")
        .bind(&id_str)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&id_str)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
