//! User model — the identity layer.
//!
//! Accounts are keyed by phone number (E.164) verified via SMS. The server
//! stores no password: possession of the phone plus an approved device is
//! the credential. The PIN is hashed client-side before it ever reaches us.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::validation::USERNAME_REGEX;

/// A Hush account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,

    /// E.164 phone number, unique. Only ever serialized to the owner.
    #[serde(skip_serializing)]
    pub phone_number: String,

    /// Unique username (3-30 chars, alphanumeric + underscore)
    pub username: String,

    pub display_name: Option<String>,

    /// Avatar media reference
    pub avatar: Option<String>,

    /// Who may see the online indicator
    pub show_online_status: Visibility,

    /// Who may see the last-seen timestamp
    pub show_last_seen: Visibility,

    /// Client-hashed Argon2id PHC string; format-validated only.
    #[serde(skip_serializing)]
    pub pin_hash: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Presence privacy tri-state. "Hidden" reads return no data, not false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Everyone,
    Contacts,
    Nobody,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Everyone => "everyone",
            Visibility::Contacts => "contacts",
            Visibility::Nobody => "nobody",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "everyone" => Some(Visibility::Everyone),
            "contacts" => Some(Visibility::Contacts),
            "nobody" => Some(Visibility::Nobody),
            _ => None,
        }
    }
}

/// Profile update request.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(regex(
        path = *USERNAME_REGEX,
        message = "Username must be 3-30 characters: letters, numbers, underscores"
    ))]
    pub username: Option<String>,

    #[validate(length(max = 64, message = "Display name must be at most 64 characters"))]
    pub display_name: Option<String>,

    pub avatar: Option<String>,

    pub show_online_status: Option<Visibility>,
    pub show_last_seen: Option<Visibility>,
}

/// Public user representation (no phone, no PIN).
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            display_name: u.display_name,
            avatar: u.avatar,
            created_at: u.created_at,
        }
    }
}

/// The owner's own profile — includes the phone number and privacy flags.
#[derive(Debug, Serialize)]
pub struct OwnProfileResponse {
    pub id: Uuid,
    pub phone_number: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub show_online_status: Visibility,
    pub show_last_seen: Visibility,
    pub pin_set: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for OwnProfileResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            phone_number: u.phone_number,
            username: u.username,
            display_name: u.display_name,
            avatar: u.avatar,
            show_online_status: u.show_online_status,
            show_last_seen: u.show_last_seen,
            pin_set: u.pin_hash.is_some(),
            created_at: u.created_at,
        }
    }
}
