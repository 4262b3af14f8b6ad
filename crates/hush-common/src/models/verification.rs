//! Phone verification codes.
//!
//! At most one active (unexpired, unverified) code per phone; requesting a
//! new one supersedes the previous. A code is consumed exactly once, inside
//! the transaction that creates the user or session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifetime of a verification code.
pub const CODE_TTL_SECS: i64 = 5 * 60;
/// Failed attempts before the active code is invalidated.
pub const MAX_ATTEMPTS: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCode {
    pub id: Uuid,
    pub phone_number: String,
    #[serde(skip_serializing)]
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub attempts: i64,
}

impl VerificationCode {
    /// Active means unexpired and not yet consumed.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.verified_at.is_none() && self.expires_at > now
    }
}
