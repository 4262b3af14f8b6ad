//! The realtime frame envelope — shared between the hub, the router, the
//! cross-instance bus, and the offline queue.
//!
//! Every frame on the persistent channel is a self-describing JSON record:
//! a `type` tag from a closed set, optional `message_id` / `sender_id`,
//! a server timestamp, and a type-specific `payload`. Ciphertext fields are
//! base64 strings; the server never parses them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Closed set of frame tags. Anything else is rejected with an `error`
/// frame (`invalid_message`) and the connection stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Send,
    Deliver,
    SentAck,
    DeliveryAck,
    ReadReceipt,
    StatusUpdate,
    Typing,
    UserOnline,
    UserOffline,
    DeviceApprovalRequest,
    DeviceApproved,
    DeviceDenied,
    MediaKey,
    CallOffer,
    CallAnswer,
    CallReject,
    CallEnd,
    CallBusy,
    IceCandidate,
    SyncRequest,
    SyncData,
    SyncAck,
    Heartbeat,
    HeartbeatAck,
    Ping,
    Pong,
    Error,
}

impl FrameKind {
    /// Tags a client may send. Server-origin tags arriving from a client are
    /// answered with `invalid_message` like unknown tags.
    pub fn client_origin(self) -> bool {
        matches!(
            self,
            FrameKind::Send
                | FrameKind::DeliveryAck
                | FrameKind::ReadReceipt
                | FrameKind::Typing
                | FrameKind::MediaKey
                | FrameKind::CallOffer
                | FrameKind::CallAnswer
                | FrameKind::CallReject
                | FrameKind::CallEnd
                | FrameKind::CallBusy
                | FrameKind::IceCandidate
                | FrameKind::SyncRequest
                | FrameKind::SyncData
                | FrameKind::SyncAck
                | FrameKind::Heartbeat
                | FrameKind::Pong
        )
    }
}

/// The frame envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Server-assigned on ingress where applicable; echoed on egress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: Value) -> Self {
        Self {
            kind,
            message_id: None,
            sender_id: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn with_message_id(mut self, id: Uuid) -> Self {
        self.message_id = Some(id);
        self
    }

    pub fn with_sender(mut self, sender: Uuid) -> Self {
        self.sender_id = Some(sender);
        self
    }

    pub fn ping() -> Self {
        Self::new(FrameKind::Ping, Value::Null)
    }

    pub fn pong() -> Self {
        Self::new(FrameKind::Pong, Value::Null)
    }

    pub fn heartbeat_ack() -> Self {
        Self::new(FrameKind::HeartbeatAck, Value::Null)
    }

    /// Build an `error` frame. `retry_after` is attached for admission
    /// failures so the client can back off.
    pub fn error(error_code: &str, message: &str, retry_after: Option<u64>) -> Self {
        Self::new(
            FrameKind::Error,
            serde_json::json!({
                "error_code": error_code,
                "message": message,
                "retry_after": retry_after,
            }),
        )
    }

    pub fn status_update(message_id: Uuid, status: &str) -> Self {
        Self::new(
            FrameKind::StatusUpdate,
            serde_json::json!({ "message_id": message_id, "status": status }),
        )
        .with_message_id(message_id)
    }
}

// ============================================================
// Typed payloads
// ============================================================

/// Payload of an inbound `send` frame. Exactly one of `receiver_id` /
/// `group_id` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    /// Opaque base64 ciphertext.
    pub ciphertext: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<Uuid>,
    /// Client-side idempotency nonce; a re-send with the same nonce returns
    /// the original `sent_ack` without re-fanning out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Payload of an outbound `deliver` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverPayload {
    pub conversation_id: Uuid,
    pub ciphertext: String,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<Uuid>,
    /// Set when the conversation is still a message request; the client
    /// routes these to its requests view. No typing or read receipts flow
    /// until the recipient accepts.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
}

/// Payload of `delivery_ack` and `read_receipt` frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptPayload {
    pub message_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdatePayload {
    pub message_id: Uuid,
    pub status: String,
}

/// Payload pushed to the primary device when another device asks to join
/// the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequestPayload {
    pub request_id: Uuid,
    pub device_name: String,
    pub device_type: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
}

/// Message kind tag — the server never inspects content, only the tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Media,
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Media => "media",
            MessageKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "media" => Some(MessageKind::Media),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }
}

// ============================================================
// Bus and queue envelopes
// ============================================================

/// Envelope published on the cross-instance bus. `server_id` identifies the
/// publishing instance so it can skip its own messages (loop prevention).
/// `target_device` narrows delivery to one device (approval frames); absent
/// means every device of the target user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub server_id: String,
    pub target_user: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_device: Option<Uuid>,
    pub frame: Frame,
}

/// A frame parked in the offline queue awaiting the recipient's next
/// connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedFrame {
    pub id: Uuid,
    pub queued_at: DateTime<Utc>,
    pub frame: Frame,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_serialize_snake_case() {
        let f = Frame::new(FrameKind::DeviceApprovalRequest, Value::Null);
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["type"], "device_approval_request");
        let f = Frame::ping();
        assert_eq!(serde_json::to_value(&f).unwrap()["type"], "ping");
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let raw = r#"{"type":"exfiltrate","timestamp":"2026-01-01T00:00:00Z","payload":{}}"#;
        assert!(serde_json::from_str::<Frame>(raw).is_err());
    }

    #[test]
    fn send_payload_requires_only_known_fields() {
        let raw = r#"{
            "type": "send",
            "timestamp": "2026-01-01T00:00:00Z",
            "payload": {"receiver_id":"6a31c9b0-0000-7000-8000-000000000001","ciphertext":"WFla"}
        }"#;
        let frame: Frame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.kind, FrameKind::Send);
        let payload: SendPayload = serde_json::from_value(frame.payload).unwrap();
        assert_eq!(payload.kind, MessageKind::Text);
        assert_eq!(payload.ciphertext, "WFla");
        assert!(payload.group_id.is_none());
    }

    #[test]
    fn server_origin_tags_are_not_client_origin() {
        assert!(FrameKind::Send.client_origin());
        assert!(FrameKind::Pong.client_origin());
        assert!(!FrameKind::Deliver.client_origin());
        assert!(!FrameKind::SentAck.client_origin());
        assert!(!FrameKind::DeviceApprovalRequest.client_origin());
    }

    #[test]
    fn pending_flag_omitted_when_false() {
        let payload = DeliverPayload {
            conversation_id: Uuid::nil(),
            ciphertext: "YQ==".into(),
            kind: MessageKind::Text,
            media_id: None,
            pending: false,
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert!(v.get("pending").is_none());
    }
}
