//! Verification code repository.
//!
//! One row per phone; the upsert supersedes any prior active code in place.

use chrono::{DateTime, Utc};
use hush_common::models::verification::VerificationCode;
use uuid::Uuid;

use super::ts;

/// Store a fresh code for a phone, superseding whatever was there.
pub async fn upsert_code(
    pool: &sqlx::AnyPool,
    id: Uuid,
    phone_number: &str,
    code: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO verification_codes (id, phone_number, code, created_at, expires_at, verified_at, attempts)
        VALUES (?, ?, ?, ?, ?, NULL, 0)
        ON CONFLICT (phone_number) DO UPDATE SET
            code = excluded.code,
            created_at = excluded.created_at,
            expires_at = excluded.expires_at,
            verified_at = NULL,
            attempts = 0
        "#,
    )
    .bind(id.to_string())
    .bind(phone_number)
    .bind(code)
    .bind(ts(Utc::now()))
    .bind(ts(expires_at))
    .execute(pool)
    .await?;
    Ok(())
}

/// The not-yet-consumed code for a phone; expiry is the caller's check.
pub async fn find_unverified(
    pool: &sqlx::AnyPool,
    phone_number: &str,
) -> Result<Option<VerificationCode>, sqlx::Error> {
    sqlx::query_as::<_, VerificationCode>(
        "SELECT * FROM verification_codes WHERE phone_number = ? AND verified_at IS NULL",
    )
    .bind(phone_number)
    .fetch_optional(pool)
    .await
}

/// Bump the failed-attempt counter; returns the new count.
pub async fn increment_attempts(
    pool: &sqlx::AnyPool,
    phone_number: &str,
) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        r#"
        UPDATE verification_codes SET attempts = attempts + 1
        WHERE phone_number = ? AND verified_at IS NULL
        RETURNING attempts
        "#,
    )
    .bind(phone_number)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Force-expire the active code (too many failed attempts).
pub async fn invalidate(pool: &sqlx::AnyPool, phone_number: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE verification_codes SET expires_at = ? WHERE phone_number = ? AND verified_at IS NULL",
    )
    .bind(ts(Utc::now()))
    .bind(phone_number)
    .execute(pool)
    .await?;
    Ok(())
}

/// True when the phone's last code was consumed within its original TTL —
/// the gate for the zero-device recovery login.
pub async fn recently_verified(
    pool: &sqlx::AnyPool,
    phone_number: &str,
) -> Result<bool, sqlx::Error> {
    let cutoff = ts(Utc::now() - chrono::Duration::seconds(
        hush_common::models::verification::CODE_TTL_SECS,
    ));
    let row: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM verification_codes
        WHERE phone_number = ? AND verified_at IS NOT NULL AND verified_at > ?
        "#,
    )
    .bind(phone_number)
    .bind(cutoff)
    .fetch_one(pool)
    .await?;
    Ok(row.0 > 0)
}

/// Consume the active code: sets verified_at iff still unverified and
/// unexpired. Runs inside the register/login transaction, so a rollback
/// leaves the code unconsumed. Returns whether a code was consumed.
pub async fn consume(
    conn: &mut sqlx::AnyConnection,
    phone_number: &str,
) -> Result<bool, sqlx::Error> {
    let now = ts(Utc::now());
    let result = sqlx::query(
        r#"
        UPDATE verification_codes SET verified_at = ?
        WHERE phone_number = ? AND verified_at IS NULL AND expires_at > ?
        "#,
    )
    .bind(&now)
    .bind(phone_number)
    .bind(&now)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}
