//! Device model.
//!
//! Device ids are client-proposed UUIDs (the client generates its own id at
//! install time). At most one device per user is primary; only the primary
//! may approve new devices. Removal is a soft delete that keeps the audit
//! trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Client-proposed id
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub device_type: DeviceType,
    /// Public device key blob (base64); opaque to the server.
    pub public_key: String,
    pub active: bool,
    pub is_primary: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Mobile,
    Web,
    Tablet,
    Desktop,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Web => "web",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mobile" => Some(DeviceType::Mobile),
            "web" => Some(DeviceType::Web),
            "tablet" => Some(DeviceType::Tablet),
            "desktop" => Some(DeviceType::Desktop),
            _ => None,
        }
    }
}

/// Device descriptor sent by clients on register / login / approval.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DeviceDescriptor {
    pub device_id: Uuid,

    #[validate(length(min = 1, max = 64, message = "Device name must be 1-64 characters"))]
    pub device_name: String,

    pub device_type: DeviceType,

    /// Public device key blob (base64)
    pub public_device_key: String,
}
