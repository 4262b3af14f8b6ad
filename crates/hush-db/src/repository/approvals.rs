//! Approval request repository.

use chrono::{DateTime, Utc};
use hush_common::models::approval::{ApprovalRequest, ApprovalStatus};
use hush_common::models::device::DeviceType;
use uuid::Uuid;

use super::ts;

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &sqlx::AnyPool,
    id: Uuid,
    phone_number: &str,
    device_id: Uuid,
    device_name: &str,
    device_type: DeviceType,
    public_device_key: &str,
    code: &str,
    requester_ip: &str,
    requester_user_agent: &str,
    expires_at: DateTime<Utc>,
) -> Result<ApprovalRequest, sqlx::Error> {
    sqlx::query_as::<_, ApprovalRequest>(
        r#"
        INSERT INTO approval_requests
            (id, phone_number, device_id, device_name, device_type, public_device_key,
             code, status, requester_ip, requester_user_agent, created_at, expires_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id.to_string())
    .bind(phone_number)
    .bind(device_id.to_string())
    .bind(device_name)
    .bind(device_type.as_str())
    .bind(public_device_key)
    .bind(code)
    .bind(requester_ip)
    .bind(requester_user_agent)
    .bind(ts(Utc::now()))
    .bind(ts(expires_at))
    .fetch_one(pool)
    .await
}

pub async fn find(pool: &sqlx::AnyPool, id: Uuid) -> Result<Option<ApprovalRequest>, sqlx::Error> {
    sqlx::query_as::<_, ApprovalRequest>("SELECT * FROM approval_requests WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
}

/// Pending requests for a phone, oldest first.
pub async fn pending_for_phone(
    pool: &sqlx::AnyPool,
    phone_number: &str,
) -> Result<Vec<ApprovalRequest>, sqlx::Error> {
    sqlx::query_as::<_, ApprovalRequest>(
        r#"
        SELECT * FROM approval_requests
        WHERE phone_number = ? AND status = 'pending'
        ORDER BY created_at ASC
        "#,
    )
    .bind(phone_number)
    .fetch_all(pool)
    .await
}

pub async fn mark_possession_verified(
    pool: &sqlx::AnyPool,
    id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE approval_requests SET possession_verified_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(ts(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Flip a pending request to a terminal state. The `status = 'pending'`
/// guard makes concurrent decisions race safely — exactly one wins.
pub async fn decide(
    conn: &mut sqlx::AnyConnection,
    id: Uuid,
    status: ApprovalStatus,
    approver_device_id: Option<Uuid>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE approval_requests SET status = ?, approver_device_id = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(status.as_str())
    .bind(approver_device_id.map(|d| d.to_string()))
    .bind(id.to_string())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Terminal-expire a request in place (poll or decide found it stale).
pub async fn mark_expired(pool: &sqlx::AnyPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE approval_requests SET status = 'expired' WHERE id = ? AND status = 'pending'")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// An approved, unexpired request for this exact device — the login path
/// for a device that was approved but never registered.
pub async fn approved_for_device(
    pool: &sqlx::AnyPool,
    phone_number: &str,
    device_id: Uuid,
) -> Result<Option<ApprovalRequest>, sqlx::Error> {
    sqlx::query_as::<_, ApprovalRequest>(
        r#"
        SELECT * FROM approval_requests
        WHERE phone_number = ? AND device_id = ? AND status = 'approved' AND expires_at > ?
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(phone_number)
    .bind(device_id.to_string())
    .bind(ts(Utc::now()))
    .fetch_optional(pool)
    .await
}
