//! Message metadata.
//!
//! The server stores only metadata and the opaque ciphertext blob. The
//! status lattice is sent → delivered → read; `read` is never persisted
//! without a prior `delivered` for the same id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::MessageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "read" => Some(DeliveryStatus::Read),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    /// Device the send frame arrived on; per-device ordering key.
    pub sender_device_id: Uuid,
    /// Direct-message recipient; None for group messages.
    pub recipient_id: Option<Uuid>,
    /// Opaque base64 ciphertext — never parsed.
    pub ciphertext: String,
    pub kind: MessageKind,
    pub media_id: Option<Uuid>,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Paginated history query.
#[derive(Debug, Deserialize)]
pub struct MessageHistoryQuery {
    pub conversation_id: Uuid,
    /// Return messages with ids strictly before this one (exclusive cursor).
    pub before: Option<Uuid>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct MessageStatusRequest {
    pub status: DeliveryStatus,
}
