//! Device repository.
//!
//! The `devices_one_primary` partial unique index backs the one-primary
//! invariant; reassignment must unset the old primary before setting the
//! new one, inside one transaction.

use chrono::Utc;
use hush_common::models::device::{Device, DeviceType};
use uuid::Uuid;

use super::ts;

/// Register a device. Runs inside the register/login/approval transaction.
pub async fn insert_device(
    conn: &mut sqlx::AnyConnection,
    id: Uuid,
    user_id: Uuid,
    name: &str,
    device_type: DeviceType,
    public_key: &str,
    is_primary: bool,
) -> Result<Device, sqlx::Error> {
    sqlx::query_as::<_, Device>(
        r#"
        INSERT INTO devices (id, user_id, name, device_type, public_key, active, is_primary, created_at)
        VALUES (?, ?, ?, ?, ?, TRUE, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(name)
    .bind(device_type.as_str())
    .bind(public_key)
    .bind(is_primary)
    .bind(ts(Utc::now()))
    .fetch_one(conn)
    .await
}

pub async fn find(pool: &sqlx::AnyPool, id: Uuid) -> Result<Option<Device>, sqlx::Error> {
    sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
}

pub async fn find_for_user(
    pool: &sqlx::AnyPool,
    user_id: Uuid,
    device_id: Uuid,
) -> Result<Option<Device>, sqlx::Error> {
    sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = ? AND user_id = ?")
        .bind(device_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await
}

pub async fn list_for_user(pool: &sqlx::AnyPool, user_id: Uuid) -> Result<Vec<Device>, sqlx::Error> {
    sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE user_id = ? ORDER BY created_at ASC",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await
}

pub async fn active_devices(
    pool: &sqlx::AnyPool,
    user_id: Uuid,
) -> Result<Vec<Device>, sqlx::Error> {
    sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE user_id = ? AND active = TRUE ORDER BY created_at ASC",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await
}

pub async fn count_devices(pool: &sqlx::AnyPool, user_id: Uuid) -> Result<i64, sqlx::Error> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM devices WHERE user_id = ? AND active = TRUE")
            .bind(user_id.to_string())
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

pub async fn primary_device(
    pool: &sqlx::AnyPool,
    user_id: Uuid,
) -> Result<Option<Device>, sqlx::Error> {
    sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE user_id = ? AND is_primary = TRUE AND active = TRUE",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await
}

/// Move the primary flag. Unset-then-set ordering keeps the partial unique
/// index satisfied mid-transaction.
pub async fn reassign_primary(
    conn: &mut sqlx::AnyConnection,
    user_id: Uuid,
    new_primary: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE devices SET is_primary = FALSE WHERE user_id = ? AND is_primary = TRUE")
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await?;
    let updated = sqlx::query(
        "UPDATE devices SET is_primary = TRUE WHERE id = ? AND user_id = ? AND active = TRUE",
    )
    .bind(new_primary.to_string())
    .bind(user_id.to_string())
    .execute(&mut *conn)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

/// Soft delete: clears active and primary flags, keeps the audit trail.
pub async fn deactivate(
    conn: &mut sqlx::AnyConnection,
    device_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE devices SET active = FALSE, is_primary = FALSE WHERE id = ?")
        .bind(device_id.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn touch_last_seen(pool: &sqlx::AnyPool, device_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE devices SET last_seen_at = ? WHERE id = ?")
        .bind(ts(Utc::now()))
        .bind(device_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}
