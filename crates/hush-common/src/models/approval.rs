//! Device approval requests.
//!
//! A new device proves possession of the 6-digit code before the primary
//! device may approve it — an approval screenshot alone is useless to an
//! attacker. Expiry is a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::device::DeviceType;

/// Lifetime of an approval request.
pub const APPROVAL_TTL_SECS: i64 = 15 * 60;
/// Concurrent pending requests per phone; excess expires oldest first.
pub const MAX_PENDING_PER_PHONE: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "denied" => Some(ApprovalStatus::Denied),
            "expired" => Some(ApprovalStatus::Expired),
            _ => None,
        }
    }

    /// Approved, denied, and expired requests never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub phone_number: String,
    /// Proposed device descriptor
    pub device_id: Uuid,
    pub device_name: String,
    pub device_type: DeviceType,
    pub public_device_key: String,
    #[serde(skip_serializing)]
    pub code: String,
    pub status: ApprovalStatus,
    /// Set when the new device has POSTed the code back (possession proof);
    /// only then does the request become approvable.
    pub possession_verified_at: Option<DateTime<Utc>>,
    pub requester_ip: String,
    pub requester_user_agent: String,
    pub approver_device_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_approvable(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending
            && !self.is_expired(now)
            && self.possession_verified_at.is_some()
    }
}

/// What pollers and the approver see — no code.
#[derive(Debug, Serialize)]
pub struct ApprovalStatusResponse {
    pub request_id: Uuid,
    pub status: ApprovalStatus,
    pub device_name: String,
    pub device_type: DeviceType,
    pub possession_verified: bool,
    pub expires_at: DateTime<Utc>,
}

impl From<ApprovalRequest> for ApprovalStatusResponse {
    fn from(r: ApprovalRequest) -> Self {
        Self {
            request_id: r.id,
            status: r.status,
            device_name: r.device_name,
            device_type: r.device_type,
            possession_verified: r.possession_verified_at.is_some(),
            expires_at: r.expires_at,
        }
    }
}
