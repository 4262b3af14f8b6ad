//! Durable per-recipient offline queue.
//!
//! A Redis list per user holding frame envelopes that could not be
//! delivered live. The hub drains the queue FIFO on connect; each frame is
//! removed only after the client's `delivery_ack`, so an interrupted drain
//! resumes on the next connection (from any instance — the queue is shared
//! state).
//!
//! The queue is capped by count and by age. Overflow trims oldest and
//! leaves a truncation marker the next drain surfaces, so the client knows
//! to backfill over HTTP history.

use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use hush_common::frame::{Frame, QueuedFrame};
use hush_common::ids;

fn queue_key(user: Uuid) -> String {
    format!("hush:queue:{user}")
}

fn truncated_key(user: Uuid) -> String {
    format!("hush:queue:{user}:truncated")
}

#[derive(Clone)]
pub struct OfflineQueue {
    conn: ConnectionManager,
    max_frames: usize,
    max_age_days: i64,
}

impl OfflineQueue {
    pub fn new(conn: ConnectionManager, max_frames: usize, max_age_days: i64) -> Self {
        Self {
            conn,
            max_frames,
            max_age_days,
        }
    }

    /// Append a frame for an offline recipient. Trims oldest entries past
    /// the cap and records the truncation.
    pub async fn enqueue(&self, user: Uuid, frame: Frame) -> Result<(), redis::RedisError> {
        let entry = QueuedFrame {
            id: ids::generate_id(),
            queued_at: Utc::now(),
            frame,
        };
        let raw = serde_json::to_string(&entry).unwrap_or_default();
        let mut conn = self.conn.clone();
        let len: i64 = conn.rpush(queue_key(user), raw).await?;

        let overflow = len - self.max_frames as i64;
        if overflow > 0 {
            tracing::warn!(user = %user, dropped = overflow, "Offline queue overflow, trimming oldest");
            let _: () = conn
                .ltrim(queue_key(user), overflow as isize, -1)
                .await?;
            let _: () = conn.set(truncated_key(user), 1).await?;
        }
        Ok(())
    }

    /// Read the full queue in FIFO order without removing anything.
    /// Entries past the age cap are dropped here (trim at read — no
    /// sweeper) and counted as truncation.
    pub async fn peek_all(
        &self,
        user: Uuid,
    ) -> Result<Vec<(String, QueuedFrame)>, redis::RedisError> {
        let mut conn = self.conn.clone();
        let raws: Vec<String> = conn.lrange(queue_key(user), 0, -1).await?;

        let oldest_allowed = Utc::now() - chrono::Duration::days(self.max_age_days);
        let mut live = Vec::with_capacity(raws.len());
        let mut expired = 0usize;
        for raw in raws {
            match serde_json::from_str::<QueuedFrame>(&raw) {
                Ok(entry) if entry.queued_at < oldest_allowed => {
                    let _: () = conn.lrem(queue_key(user), 1, &raw).await?;
                    expired += 1;
                }
                Ok(entry) => live.push((raw, entry)),
                Err(e) => {
                    // Unparseable entry: drop it rather than wedge the drain.
                    tracing::error!(user = %user, "Dropping corrupt queue entry: {e}");
                    let _: () = conn.lrem(queue_key(user), 1, &raw).await?;
                }
            }
        }
        if expired > 0 {
            tracing::info!(user = %user, expired, "Aged out queued frames");
            let _: () = conn.set(truncated_key(user), 1).await?;
        }
        Ok(live)
    }

    /// Remove one acked entry by its exact stored representation.
    pub async fn ack(&self, user: Uuid, raw: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lrem(queue_key(user), 1, raw).await?;
        Ok(())
    }

    pub async fn len(&self, user: Uuid) -> Result<usize, redis::RedisError> {
        let mut conn = self.conn.clone();
        let n: i64 = conn.llen(queue_key(user)).await?;
        Ok(n.max(0) as usize)
    }

    /// Consume the truncation marker, if set. The drain turns this into an
    /// error frame (`queue_truncated`) so the client backfills over HTTP.
    pub async fn take_truncated(&self, user: Uuid) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn.clone();
        let marker: Option<i64> = conn.get_del(truncated_key(user)).await?;
        Ok(marker.is_some())
    }

    /// Drop a user's queue entirely (account deletion cascade).
    pub async fn purge(&self, user: Uuid) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(queue_key(user)).await?;
        let _: () = conn.del(truncated_key(user)).await?;
        Ok(())
    }
}
