//! Manual `sqlx::FromRow<'_, sqlx::any::AnyRow>` implementations for the
//! model types.
//!
//! `sqlx::AnyPool` only decodes primitive types natively (i64, f64, bool,
//! String, bytes). UUID and DateTime columns are stored as TEXT and parsed
//! here; enum columns are TEXT parsed through each type's `parse`.
//!
//! Manual impls instead of `#[derive(sqlx::FromRow)]` because the derive
//! emits a blanket impl whose bounds the Any driver never satisfies, and
//! coherence then forbids adding the AnyRow impl by hand.

use chrono::{DateTime, Utc};
use sqlx::{Row, any::AnyRow};
use uuid::Uuid;

use crate::frame::MessageKind;
use crate::models::{
    approval::{ApprovalRequest, ApprovalStatus},
    conversation::{Conversation, ConversationKind, ConversationStatus},
    device::{Device, DeviceType},
    media::MediaObject,
    message::{DeliveryStatus, Message},
    prekey::{OneTimePrekey, PrekeySet},
    session::Session,
    user::{User, Visibility},
    verification::VerificationCode,
};

// ── Internal helpers ──────────────────────────────────────────────────────────

fn uuid(row: &AnyRow, col: &str) -> Result<Uuid, sqlx::Error> {
    let s: String = row.try_get(col)?;
    Uuid::parse_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e) as _))
}

fn opt_uuid(row: &AnyRow, col: &str) -> Result<Option<Uuid>, sqlx::Error> {
    let s: Option<String> = row.try_get(col)?;
    s.map(|v| Uuid::parse_str(&v).map_err(|e| sqlx::Error::Decode(Box::new(e) as _)))
        .transpose()
}

fn dt(row: &AnyRow, col: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let s: String = row.try_get(col)?;
    parse_dt(&s).map_err(sqlx::Error::Decode)
}

fn opt_dt(row: &AnyRow, col: &str) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let s: Option<String> = row.try_get(col)?;
    s.map(|v| parse_dt(&v).map_err(sqlx::Error::Decode)).transpose()
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>, Box<dyn std::error::Error + Send + Sync + 'static>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Ok(d.with_timezone(&Utc));
    }
    if let Ok(d) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(d.and_utc());
    }
    if let Ok(d) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(d.and_utc());
    }
    Err(format!("cannot parse timestamp '{s}'").into())
}

fn parse_enum<T>(
    row: &AnyRow,
    col: &str,
    f: impl Fn(&str) -> Option<T>,
) -> Result<T, sqlx::Error> {
    let s: String = row.try_get(col)?;
    f(&s).ok_or_else(|| sqlx::Error::Decode(format!("unknown enum variant: {s}").into()))
}

// ── User ──────────────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for User {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(User {
            id: uuid(row, "id")?,
            phone_number: row.try_get("phone_number")?,
            username: row.try_get("username")?,
            display_name: row.try_get("display_name")?,
            avatar: row.try_get("avatar")?,
            show_online_status: parse_enum(row, "show_online_status", Visibility::parse)?,
            show_last_seen: parse_enum(row, "show_last_seen", Visibility::parse)?,
            pin_hash: row.try_get("pin_hash")?,
            created_at: dt(row, "created_at")?,
            updated_at: dt(row, "updated_at")?,
        })
    }
}

// ── Device ────────────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for Device {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Device {
            id: uuid(row, "id")?,
            user_id: uuid(row, "user_id")?,
            name: row.try_get("name")?,
            device_type: parse_enum(row, "device_type", DeviceType::parse)?,
            public_key: row.try_get("public_key")?,
            active: row.try_get("active")?,
            is_primary: row.try_get("is_primary")?,
            last_seen_at: opt_dt(row, "last_seen_at")?,
            created_at: dt(row, "created_at")?,
        })
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for Session {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Session {
            id: uuid(row, "id")?,
            user_id: uuid(row, "user_id")?,
            device_id: uuid(row, "device_id")?,
            token_hash: row.try_get("token_hash")?,
            token_digest: row.try_get("token_digest")?,
            expires_at: dt(row, "expires_at")?,
            revoked_at: opt_dt(row, "revoked_at")?,
            created_at: dt(row, "created_at")?,
        })
    }
}

// ── VerificationCode ──────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for VerificationCode {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(VerificationCode {
            id: uuid(row, "id")?,
            phone_number: row.try_get("phone_number")?,
            code: row.try_get("code")?,
            created_at: dt(row, "created_at")?,
            expires_at: dt(row, "expires_at")?,
            verified_at: opt_dt(row, "verified_at")?,
            attempts: row.try_get("attempts")?,
        })
    }
}

// ── ApprovalRequest ───────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for ApprovalRequest {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(ApprovalRequest {
            id: uuid(row, "id")?,
            phone_number: row.try_get("phone_number")?,
            device_id: uuid(row, "device_id")?,
            device_name: row.try_get("device_name")?,
            device_type: parse_enum(row, "device_type", DeviceType::parse)?,
            public_device_key: row.try_get("public_device_key")?,
            code: row.try_get("code")?,
            status: parse_enum(row, "status", ApprovalStatus::parse)?,
            possession_verified_at: opt_dt(row, "possession_verified_at")?,
            requester_ip: row.try_get("requester_ip")?,
            requester_user_agent: row.try_get("requester_user_agent")?,
            approver_device_id: opt_uuid(row, "approver_device_id")?,
            created_at: dt(row, "created_at")?,
            expires_at: dt(row, "expires_at")?,
        })
    }
}

// ── Conversation ──────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for Conversation {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Conversation {
            id: uuid(row, "id")?,
            kind: parse_enum(row, "kind", ConversationKind::parse)?,
            status: parse_enum(row, "status", ConversationStatus::parse)?,
            created_by: uuid(row, "created_by")?,
            blocked_by: opt_uuid(row, "blocked_by")?,
            created_at: dt(row, "created_at")?,
            updated_at: dt(row, "updated_at")?,
        })
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for Message {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Message {
            id: uuid(row, "id")?,
            conversation_id: uuid(row, "conversation_id")?,
            sender_id: uuid(row, "sender_id")?,
            sender_device_id: uuid(row, "sender_device_id")?,
            recipient_id: opt_uuid(row, "recipient_id")?,
            ciphertext: row.try_get("ciphertext")?,
            kind: parse_enum(row, "kind", MessageKind::parse)?,
            media_id: opt_uuid(row, "media_id")?,
            status: parse_enum(row, "status", DeliveryStatus::parse)?,
            created_at: dt(row, "created_at")?,
            delivered_at: opt_dt(row, "delivered_at")?,
            read_at: opt_dt(row, "read_at")?,
        })
    }
}

// ── PrekeySet / OneTimePrekey ─────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for PrekeySet {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(PrekeySet {
            user_id: uuid(row, "user_id")?,
            identity_key: row.try_get("identity_key")?,
            signed_pre_key: row.try_get("signed_pre_key")?,
            signed_pre_key_sig: row.try_get("signed_pre_key_sig")?,
            updated_at: dt(row, "updated_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, AnyRow> for OneTimePrekey {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(OneTimePrekey {
            id: uuid(row, "id")?,
            user_id: uuid(row, "user_id")?,
            key_id: row.try_get("key_id")?,
            public_key: row.try_get("public_key")?,
            consumed: row.try_get("consumed")?,
            created_at: dt(row, "created_at")?,
        })
    }
}

// ── MediaObject ───────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for MediaObject {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(MediaObject {
            id: uuid(row, "id")?,
            owner_id: uuid(row, "owner_id")?,
            storage_key: row.try_get("storage_key")?,
            content_type: row.try_get("content_type")?,
            size_bytes: row.try_get("size_bytes")?,
            created_at: dt(row, "created_at")?,
        })
    }
}
