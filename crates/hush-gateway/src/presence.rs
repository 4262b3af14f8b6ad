//! Presence tracker.
//!
//! `hush:presence:<user>` in the counter store holds either the literal
//! `online` or a last-seen RFC 3339 timestamp. The gateway flips the value
//! on first-connect / last-disconnect and notifies the user's contacts
//! with `user_online` / `user_offline` frames. Reads honor the target's
//! tri-state privacy flags — a hidden value reads as "no data", never as
//! "offline".

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use hush_common::error::HushResult;
use hush_common::models::user::{User, Visibility};
use hush_db::counter_store::CounterStore;
use hush_db::repository::conversations;

pub const ONLINE: &str = "online";

/// What a viewer is allowed to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PresenceView {
    /// Privacy-hidden or never seen: no data, not "offline".
    Unknown,
    Online,
    LastSeen { last_seen: DateTime<Utc> },
}

#[derive(Clone)]
pub struct PresenceTracker {
    store: CounterStore,
    pool: sqlx::AnyPool,
}

impl PresenceTracker {
    pub fn new(store: CounterStore, pool: sqlx::AnyPool) -> Self {
        Self { store, pool }
    }

    pub async fn mark_online(&self, user: Uuid) -> HushResult<()> {
        self.store.presence_set(user, ONLINE).await?;
        Ok(())
    }

    pub async fn mark_offline(&self, user: Uuid) -> HushResult<()> {
        self.store
            .presence_set(user, &Utc::now().to_rfc3339())
            .await?;
        Ok(())
    }

    /// The contact set presence transitions fan out to.
    pub async fn contacts_of(&self, user: Uuid) -> HushResult<Vec<Uuid>> {
        Ok(conversations::contact_ids(&self.pool, user).await?)
    }

    /// Privacy-gated read of a target's presence for a given viewer.
    pub async fn read(
        &self,
        target: &User,
        viewer: Uuid,
    ) -> HushResult<PresenceView> {
        let raw = self.store.presence_get(target.id).await?;
        let viewer_is_contact = if viewer == target.id {
            true
        } else {
            conversations::contact_ids(&self.pool, target.id)
                .await?
                .contains(&viewer)
        };
        Ok(resolve_view(
            raw.as_deref(),
            target,
            viewer == target.id,
            viewer_is_contact,
        ))
    }
}

/// Pure visibility resolution: the privacy flags gate at read time.
pub fn resolve_view(
    raw: Option<&str>,
    target: &User,
    is_self: bool,
    viewer_is_contact: bool,
) -> PresenceView {
    let allowed = |flag: Visibility| -> bool {
        is_self
            || match flag {
                Visibility::Everyone => true,
                Visibility::Contacts => viewer_is_contact,
                Visibility::Nobody => false,
            }
    };

    match raw {
        None => PresenceView::Unknown,
        Some(ONLINE) => {
            if allowed(target.show_online_status) {
                PresenceView::Online
            } else {
                PresenceView::Unknown
            }
        }
        Some(stamp) => match DateTime::parse_from_rfc3339(stamp) {
            Ok(last_seen) if allowed(target.show_last_seen) => PresenceView::LastSeen {
                last_seen: last_seen.with_timezone(&Utc),
            },
            Ok(_) => PresenceView::Unknown,
            Err(_) => PresenceView::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(online_flag: Visibility, last_seen_flag: Visibility) -> User {
        User {
            id: Uuid::now_v7(),
            phone_number: "+15551234567".into(),
            username: "ada".into(),
            display_name: None,
            avatar: None,
            show_online_status: online_flag,
            show_last_seen: last_seen_flag,
            pin_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn hidden_reads_are_unknown_not_offline() {
        let target = user(Visibility::Nobody, Visibility::Nobody);
        assert_eq!(
            resolve_view(Some(ONLINE), &target, false, true),
            PresenceView::Unknown
        );
        let stamp = Utc::now().to_rfc3339();
        assert_eq!(
            resolve_view(Some(&stamp), &target, false, true),
            PresenceView::Unknown
        );
    }

    #[test]
    fn contacts_tier_gates_on_relationship() {
        let target = user(Visibility::Contacts, Visibility::Contacts);
        assert_eq!(
            resolve_view(Some(ONLINE), &target, false, true),
            PresenceView::Online
        );
        assert_eq!(
            resolve_view(Some(ONLINE), &target, false, false),
            PresenceView::Unknown
        );
    }

    #[test]
    fn everyone_tier_is_visible_to_strangers() {
        let target = user(Visibility::Everyone, Visibility::Everyone);
        assert_eq!(
            resolve_view(Some(ONLINE), &target, false, false),
            PresenceView::Online
        );
    }

    #[test]
    fn self_always_sees_own_presence() {
        let target = user(Visibility::Nobody, Visibility::Nobody);
        assert_eq!(
            resolve_view(Some(ONLINE), &target, true, false),
            PresenceView::Online
        );
    }

    #[test]
    fn missing_value_is_unknown() {
        let target = user(Visibility::Everyone, Visibility::Everyone);
        assert_eq!(resolve_view(None, &target, false, true), PresenceView::Unknown);
    }
}
