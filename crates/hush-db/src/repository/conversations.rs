//! Conversation repository.
//!
//! Direct conversations are deduplicated by a sorted `direct_key`; groups
//! have members only. "Contacts" — the presence fan-out set — are the peers
//! of a user's accepted conversations.

use chrono::Utc;
use hush_common::ids;
use hush_common::models::conversation::{Conversation, ConversationKind, ConversationStatus};
use sqlx::Row;
use uuid::Uuid;

use super::ts;

/// Canonical lookup key for the direct conversation between two users.
pub fn direct_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

pub async fn find(pool: &sqlx::AnyPool, id: Uuid) -> Result<Option<Conversation>, sqlx::Error> {
    sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
}

pub async fn find_direct(
    pool: &sqlx::AnyPool,
    a: Uuid,
    b: Uuid,
) -> Result<Option<Conversation>, sqlx::Error> {
    sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE direct_key = ?")
        .bind(direct_key(a, b))
        .fetch_optional(pool)
        .await
}

/// Create a direct conversation in the given status with both members.
pub async fn create_direct(
    pool: &sqlx::AnyPool,
    creator: Uuid,
    peer: Uuid,
    status: ConversationStatus,
) -> Result<Conversation, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let id = ids::generate_id();
    let now = ts(Utc::now());

    let conversation = sqlx::query_as::<_, Conversation>(
        r#"
        INSERT INTO conversations (id, kind, status, created_by, direct_key, created_at, updated_at)
        VALUES (?, 'direct', ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id.to_string())
    .bind(status.as_str())
    .bind(creator.to_string())
    .bind(direct_key(creator, peer))
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await?;

    for member in [creator, peer] {
        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, joined_at) VALUES (?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(member.to_string())
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(conversation)
}

/// All member user ids of a conversation.
pub async fn members(pool: &sqlx::AnyPool, conversation_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT user_id FROM conversation_members WHERE conversation_id = ? ORDER BY joined_at ASC",
    )
    .bind(conversation_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let s: String = row.try_get("user_id")?;
            Uuid::parse_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e) as _))
        })
        .collect()
}

pub async fn is_member(
    pool: &sqlx::AnyPool,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM conversation_members WHERE conversation_id = ? AND user_id = ?",
    )
    .bind(conversation_id.to_string())
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(row.0 > 0)
}

pub async fn set_status(
    pool: &sqlx::AnyPool,
    id: Uuid,
    status: ConversationStatus,
    blocked_by: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE conversations SET status = ?, blocked_by = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(blocked_by.map(|u| u.to_string()))
        .bind(ts(Utc::now()))
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Peers of this user's accepted conversations — the contact set presence
/// notifications fan out to.
pub async fn contact_ids(pool: &sqlx::AnyPool, user_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT cm.user_id AS contact_id
        FROM conversation_members cm
        INNER JOIN conversations c ON c.id = cm.conversation_id
        INNER JOIN conversation_members me ON me.conversation_id = c.id
        WHERE me.user_id = ? AND cm.user_id <> ? AND c.status = 'accepted'
        "#,
    )
    .bind(user_id.to_string())
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let s: String = row.try_get("contact_id")?;
            Uuid::parse_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e) as _))
        })
        .collect()
}

/// True when the direct conversation between the two users is blocked by
/// the target side. Messages from a blocked sender are refused.
pub async fn is_blocked_by(
    pool: &sqlx::AnyPool,
    sender: Uuid,
    target: Uuid,
) -> Result<bool, sqlx::Error> {
    let conversation = find_direct(pool, sender, target).await?;
    Ok(matches!(
        conversation,
        Some(c) if c.status == ConversationStatus::Blocked && c.blocked_by == Some(target)
    ))
}

pub async fn kind_of(
    pool: &sqlx::AnyPool,
    id: Uuid,
) -> Result<Option<ConversationKind>, sqlx::Error> {
    Ok(find(pool, id).await?.map(|c| c.kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_key_is_order_independent() {
        let a = Uuid::parse_str("00000000-0000-7000-8000-000000000001").unwrap();
        let b = Uuid::parse_str("00000000-0000-7000-8000-000000000002").unwrap();
        assert_eq!(direct_key(a, b), direct_key(b, a));
        assert_eq!(direct_key(a, b), format!("{a}:{b}"));
    }
}
