//! Redis counter store — the shared mutable state for rate limits, abuse
//! control, presence, token blacklisting, and send idempotency.
//!
//! All keys live under the `hush:` prefix and carry TTLs equal to their
//! window, so memory stays bounded without a sweeper. Every operation is a
//! single atomic command or an atomic pipeline.
//!
//! Failure policy belongs to the callers: the rate limiter fails open on a
//! store error, the token authority fails closed.

use rand::Rng;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

const PREFIX: &str = "hush";

/// Mode flag stored per rate-limit scope.
pub const MODE_NORMAL: &str = "normal";
pub const MODE_STRICT: &str = "strict";

#[derive(Clone)]
pub struct CounterStore {
    conn: ConnectionManager,
}

// ── Key naming ────────────────────────────────────────────────────────────────

pub fn window_key(scope: &str) -> String {
    format!("{PREFIX}:window:{scope}")
}

pub fn mode_key(scope: &str) -> String {
    format!("{PREFIX}:mode:{scope}")
}

pub fn penalty_key(subject: &str) -> String {
    format!("{PREFIX}:penalty:{subject}")
}

pub fn blacklist_key(digest: &str) -> String {
    format!("{PREFIX}:blacklist:{digest}")
}

pub fn presence_key(user: uuid::Uuid) -> String {
    format!("{PREFIX}:presence:{user}")
}

pub fn nonce_key(device: uuid::Uuid, nonce: &str) -> String {
    format!("{PREFIX}:nonce:{device}:{nonce}")
}

pub fn presence_conns_key(user: uuid::Uuid) -> String {
    format!("{PREFIX}:presence:conns:{user}")
}

impl CounterStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    // ── Sliding windows ──────────────────────────────────────────────────

    /// Trim entries older than `now_ms - window_ms` and return the count of
    /// what remains. Atomic pipeline, so concurrent admits see a consistent
    /// window.
    pub async fn count_in_window(
        &self,
        scope: &str,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<u64, redis::RedisError> {
        let key = window_key(scope);
        let cutoff = now_ms - window_ms;
        let mut conn = self.conn.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .zrembyscore(&key, "-inf", cutoff)
            .ignore()
            .zcard(&key)
            .query_async(&mut conn)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Append an admitted request timestamp to the window and refresh the
    /// key TTL. The member carries a random suffix so same-millisecond
    /// admits don't collapse into one entry.
    pub async fn append(
        &self,
        scope: &str,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<(), redis::RedisError> {
        let key = window_key(scope);
        let member = format!("{now_ms}-{:08x}", rand::rng().random::<u32>());
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .zadd(&key, member, now_ms)
            .ignore()
            .expire(&key, (window_ms / 1000).max(1))
            .ignore()
            .query_async::<()>(&mut conn)
            .await
    }

    // ── Modes ────────────────────────────────────────────────────────────

    /// Put a scope in strict (or back to normal) mode for `ttl_secs`.
    pub async fn set_mode(
        &self,
        scope: &str,
        mode: &str,
        ttl_secs: u64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.set_ex(mode_key(scope), mode, ttl_secs).await
    }

    /// Current mode for a scope; absent key means normal.
    pub async fn get_mode(&self, scope: &str) -> Result<String, redis::RedisError> {
        let mut conn = self.conn.clone();
        let mode: Option<String> = conn.get(mode_key(scope)).await?;
        Ok(mode.unwrap_or_else(|| MODE_NORMAL.to_string()))
    }

    // ── Penalty box ──────────────────────────────────────────────────────

    /// Put (or extend) a subject in the penalty box.
    pub async fn add_penalty(
        &self,
        subject: &str,
        ttl_secs: u64,
        reason: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.set_ex(penalty_key(subject), reason, ttl_secs).await
    }

    /// Remaining penalty seconds, if the subject is currently boxed.
    pub async fn penalty_remaining(
        &self,
        subject: &str,
    ) -> Result<Option<u64>, redis::RedisError> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(penalty_key(subject)).await?;
        Ok((ttl > 0).then_some(ttl as u64))
    }

    // ── Token blacklist ──────────────────────────────────────────────────

    pub async fn blacklist(
        &self,
        digest: &str,
        reason: &str,
        ttl_secs: u64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.set_ex(blacklist_key(digest), reason, ttl_secs.max(1)).await
    }

    pub async fn is_blacklisted(&self, digest: &str) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.exists(blacklist_key(digest)).await
    }

    // ── Presence ─────────────────────────────────────────────────────────

    /// Value is either the literal `online` or a last-seen RFC 3339 stamp.
    pub async fn presence_set(
        &self,
        user: uuid::Uuid,
        value: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.set(presence_key(user), value).await
    }

    pub async fn presence_get(
        &self,
        user: uuid::Uuid,
    ) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.get(presence_key(user)).await
    }

    /// Count a new connection across all instances. Returns the total, so
    /// the caller knows when the user just came online (== 1).
    pub async fn presence_connect(&self, user: uuid::Uuid) -> Result<i64, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.incr(presence_conns_key(user), 1).await
    }

    /// Drop a connection from the cross-instance count. Returns what
    /// remains; 0 means the user is offline everywhere. The key is removed
    /// at zero so a dead instance's leak heals on the next connect cycle.
    pub async fn presence_disconnect(&self, user: uuid::Uuid) -> Result<i64, redis::RedisError> {
        let mut conn = self.conn.clone();
        let remaining: i64 = conn.decr(presence_conns_key(user), 1).await?;
        if remaining <= 0 {
            let _: () = conn.del(presence_conns_key(user)).await?;
        }
        Ok(remaining.max(0))
    }

    /// Remove every presence key for a user (account deletion).
    pub async fn presence_clear(&self, user: uuid::Uuid) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(presence_key(user)).await?;
        let _: () = conn.del(presence_conns_key(user)).await?;
        Ok(())
    }

    // ── Send idempotency ─────────────────────────────────────────────────

    /// Claim a client nonce for a message id. Returns `None` when this call
    /// won the claim, or `Some(original_id)` when the nonce was already
    /// claimed — the caller replays the original `sent_ack`.
    pub async fn claim_nonce(
        &self,
        device: uuid::Uuid,
        nonce: &str,
        message_id: uuid::Uuid,
        ttl_secs: u64,
    ) -> Result<Option<uuid::Uuid>, redis::RedisError> {
        let key = nonce_key(device, nonce);
        let mut conn = self.conn.clone();
        let claimed: bool = conn.set_nx(&key, message_id.to_string()).await?;
        if claimed {
            let _: () = conn.expire(&key, ttl_secs as i64).await?;
            return Ok(None);
        }
        let existing: Option<String> = conn.get(&key).await?;
        Ok(existing.and_then(|s| uuid::Uuid::parse_str(&s).ok()))
    }

    /// Release a claimed nonce (the send it was claimed for failed, so a
    /// retry must not replay a dead ack).
    pub async fn release_nonce(
        &self,
        device: uuid::Uuid,
        nonce: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.del(nonce_key(device, nonce)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(window_key("ip:10.0.0.1"), "hush:window:ip:10.0.0.1");
        assert_eq!(mode_key("global"), "hush:mode:global");
        assert_eq!(penalty_key("user:abc"), "hush:penalty:user:abc");
        assert!(blacklist_key("deadbeef").starts_with("hush:blacklist:"));
        let id = uuid::Uuid::nil();
        assert_eq!(
            presence_key(id),
            "hush:presence:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(nonce_key(id, "n1"), format!("hush:nonce:{id}:n1"));
    }
}
