//! Pre-key repository.
//!
//! The one-time pre-key pop is a single `UPDATE … RETURNING` against an
//! unconsumed row, so the same key is never handed to two initiators even
//! under concurrent bundle fetches.

use chrono::Utc;
use hush_common::ids;
use hush_common::models::prekey::{OneTimePrekey, PrekeySet};
use uuid::Uuid;

use super::ts;

/// Write-once-ish: registration inserts, later uploads replace.
pub async fn upsert_set(
    conn: &mut sqlx::AnyConnection,
    user_id: Uuid,
    identity_key: &str,
    signed_pre_key: &str,
    signed_pre_key_sig: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO user_prekeys (user_id, identity_key, signed_pre_key, signed_pre_key_sig, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (user_id) DO UPDATE SET
            identity_key = excluded.identity_key,
            signed_pre_key = excluded.signed_pre_key,
            signed_pre_key_sig = excluded.signed_pre_key_sig,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id.to_string())
    .bind(identity_key)
    .bind(signed_pre_key)
    .bind(signed_pre_key_sig)
    .bind(ts(Utc::now()))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_set(pool: &sqlx::AnyPool, user_id: Uuid) -> Result<Option<PrekeySet>, sqlx::Error> {
    sqlx::query_as::<_, PrekeySet>("SELECT * FROM user_prekeys WHERE user_id = ?")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await
}

/// Bulk-insert one-time pre-keys, skipping duplicates by key_id.
pub async fn insert_one_time(
    pool: &sqlx::AnyPool,
    user_id: Uuid,
    keys: &[(i64, String)],
) -> Result<usize, sqlx::Error> {
    let mut inserted = 0usize;
    for (key_id, public_key) in keys {
        let result = sqlx::query(
            r#"
            INSERT INTO one_time_prekeys (id, user_id, key_id, public_key, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (user_id, key_id) DO NOTHING
            "#,
        )
        .bind(ids::generate_id().to_string())
        .bind(user_id.to_string())
        .bind(key_id)
        .bind(public_key)
        .bind(ts(Utc::now()))
        .execute(pool)
        .await?;
        inserted += result.rows_affected() as usize;
    }
    Ok(inserted)
}

pub async fn count_unconsumed(pool: &sqlx::AnyPool, user_id: Uuid) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM one_time_prekeys WHERE user_id = ? AND consumed = FALSE",
    )
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Atomically consume one one-time pre-key. `None` when the pool is dry —
/// the bundle still serves identity + signed pre-key.
pub async fn pop_one_time(
    pool: &sqlx::AnyPool,
    user_id: Uuid,
) -> Result<Option<OneTimePrekey>, sqlx::Error> {
    sqlx::query_as::<_, OneTimePrekey>(
        r#"
        UPDATE one_time_prekeys
        SET consumed = TRUE
        WHERE id = (
            SELECT id FROM one_time_prekeys
            WHERE user_id = ? AND consumed = FALSE
            ORDER BY key_id ASC
            LIMIT 1
        )
        RETURNING *
        "#,
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await
}
