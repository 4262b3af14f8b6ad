//! Session model.
//!
//! One live session per device per issuance; refresh mints a new session.
//! The access token is stored only as a salted hash plus a deterministic
//! digest (the blacklist key) — never in plaintext.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    /// `"<salt_hex>$<digest_hex>"` of the access token
    #[serde(skip_serializing)]
    pub token_hash: String,
    /// Unsalted SHA-256 of the access token; blacklist key on revocation
    #[serde(skip_serializing)]
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Token pair returned on verify / register / login / refresh.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub token_type: String,
}
