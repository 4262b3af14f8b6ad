//! Message repository.
//!
//! Status transitions are guarded in SQL (`WHERE status = …`), so the
//! sent → delivered → read lattice holds under concurrent receipts and
//! `read` is never persisted without a prior `delivered`.

use chrono::Utc;
use hush_common::frame::MessageKind;
use hush_common::models::message::Message;
use uuid::Uuid;

use super::ts;

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &sqlx::AnyPool,
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    sender_device_id: Uuid,
    recipient_id: Option<Uuid>,
    ciphertext: &str,
    kind: MessageKind,
    media_id: Option<Uuid>,
) -> Result<Message, sqlx::Error> {
    sqlx::query_as::<_, Message>(
        r#"
        INSERT INTO messages
            (id, conversation_id, sender_id, sender_device_id, recipient_id,
             ciphertext, kind, media_id, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'sent', ?)
        RETURNING *
        "#,
    )
    .bind(id.to_string())
    .bind(conversation_id.to_string())
    .bind(sender_id.to_string())
    .bind(sender_device_id.to_string())
    .bind(recipient_id.map(|u| u.to_string()))
    .bind(ciphertext)
    .bind(kind.as_str())
    .bind(media_id.map(|u| u.to_string()))
    .bind(ts(Utc::now()))
    .fetch_one(pool)
    .await
}

pub async fn find(pool: &sqlx::AnyPool, id: Uuid) -> Result<Option<Message>, sqlx::Error> {
    sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
}

/// Paginated history, newest first, exclusive `before` cursor on the
/// time-sortable id.
pub async fn history(
    pool: &sqlx::AnyPool,
    conversation_id: Uuid,
    before: Option<Uuid>,
    limit: i64,
) -> Result<Vec<Message>, sqlx::Error> {
    match before {
        Some(cursor) => {
            sqlx::query_as::<_, Message>(
                r#"
                SELECT * FROM messages
                WHERE conversation_id = ? AND id < ?
                ORDER BY id DESC
                LIMIT ?
                "#,
            )
            .bind(conversation_id.to_string())
            .bind(cursor.to_string())
            .bind(limit)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Message>(
                r#"
                SELECT * FROM messages
                WHERE conversation_id = ?
                ORDER BY id DESC
                LIMIT ?
                "#,
            )
            .bind(conversation_id.to_string())
            .bind(limit)
            .fetch_all(pool)
            .await
        }
    }
}

/// sent → delivered. Returns false when the message was already past
/// `sent` (idempotent under duplicate acks).
pub async fn mark_delivered(pool: &sqlx::AnyPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE messages SET status = 'delivered', delivered_at = ? WHERE id = ? AND status = 'sent'",
    )
    .bind(ts(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// delivered → read. The guard refuses the jump from `sent`; callers
/// promote to delivered first so the persisted order always shows
/// delivered before read.
pub async fn mark_read(pool: &sqlx::AnyPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE messages SET status = 'read', read_at = ? WHERE id = ? AND status = 'delivered'",
    )
    .bind(ts(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_failed(pool: &sqlx::AnyPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE messages SET status = 'failed' WHERE id = ? AND status = 'sent'")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}
