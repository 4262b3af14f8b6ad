//! Pre-key material.
//!
//! The server is a dumb key shelf: write-once identity + signed pre-key per
//! user, and a pool of up to 100 one-time pre-keys popped atomically on
//! bundle retrieval. An empty pool still yields a usable bundle (clients
//! fall back to identity+signed-only X3DH).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrekeySet {
    pub user_id: Uuid,
    pub identity_key: String,
    pub signed_pre_key: String,
    pub signed_pre_key_sig: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimePrekey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key_id: i64,
    pub public_key: String,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
}

/// A single uploaded one-time pre-key.
#[derive(Debug, Clone, Deserialize)]
pub struct OneTimePrekeyUpload {
    pub key_id: i64,
    pub public_key: String,
}

/// Upload body for POST /users/me/prekeys.
#[derive(Debug, Deserialize)]
pub struct UploadPrekeysRequest {
    pub one_time_pre_keys: Vec<OneTimePrekeyUpload>,
}

/// The bundle an X3DH initiator fetches.
#[derive(Debug, Serialize)]
pub struct PrekeyBundleResponse {
    pub user_id: Uuid,
    pub identity_key: String,
    pub signed_pre_key: String,
    pub signed_pre_key_sig: String,
    /// Popped atomically; None when the pool is dry.
    pub one_time_pre_key: Option<PoppedPrekey>,
}

#[derive(Debug, Serialize)]
pub struct PoppedPrekey {
    pub key_id: i64,
    pub public_key: String,
}
