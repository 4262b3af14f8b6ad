//! SQL repositories — plain async functions over the shared pool.
//!
//! Multi-row writes that must be atomic (register, device removal, account
//! deletion) take a `&mut sqlx::AnyConnection` so the calling service owns
//! the transaction.

pub mod approvals;
pub mod conversations;
pub mod devices;
pub mod media;
pub mod messages;
pub mod prekeys;
pub mod sessions;
pub mod users;
pub mod verification;

use chrono::{DateTime, SecondsFormat, Utc};

/// Timestamps are bound as RFC 3339 TEXT so one schema serves both
/// backends. Fixed-width microseconds keep lexical string comparison
/// identical to chronological order for the `expires_at > ?` guards.
pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}
