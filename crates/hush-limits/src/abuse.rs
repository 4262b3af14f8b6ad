//! Abuse detector.
//!
//! Watches the admitted request stream per subject (`ip:<addr>` or
//! `user:<id>`) over a five-minute in-memory window and escalates
//! offenders. Escalations are monotonic and idempotent: a higher level
//! supersedes a lower one, re-recording the same level is a no-op.
//!
//! | level   | threshold / 5 min | action                          |
//! |---------|-------------------|---------------------------------|
//! | warning | 50                | metric only                     |
//! | penalty | 100               | penalty box, 15 min             |
//! | strict  | 200               | subject scope strict, 30 min    |
//! | block   | 300               | penalty box extended to 60 min  |
//!
//! Store entries expire by TTL and the in-memory window trims at read, so
//! no sweeper task exists.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use hush_db::counter_store::{CounterStore, MODE_STRICT};
use tokio::sync::Mutex;

const OBSERVATION_WINDOW_SECS: i64 = 5 * 60;

pub const WARNING_THRESHOLD: usize = 50;
pub const PENALTY_THRESHOLD: usize = 100;
pub const STRICT_THRESHOLD: usize = 200;
pub const BLOCK_THRESHOLD: usize = 300;

pub const PENALTY_SECS: u64 = 15 * 60;
pub const STRICT_SECS: u64 = 30 * 60;
pub const BLOCK_SECS: u64 = 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AbuseLevel {
    None,
    Warning,
    Penalty,
    Strict,
    Block,
}

impl AbuseLevel {
    /// Level implied by a request count within the observation window.
    pub fn for_count(count: usize) -> Self {
        if count >= BLOCK_THRESHOLD {
            AbuseLevel::Block
        } else if count >= STRICT_THRESHOLD {
            AbuseLevel::Strict
        } else if count >= PENALTY_THRESHOLD {
            AbuseLevel::Penalty
        } else if count >= WARNING_THRESHOLD {
            AbuseLevel::Warning
        } else {
            AbuseLevel::None
        }
    }
}

struct SubjectWindow {
    /// Request timestamps (unix seconds), oldest first.
    hits: VecDeque<i64>,
    /// Highest level already acted on for the current episode.
    escalated: AbuseLevel,
}

pub struct AbuseDetector {
    store: CounterStore,
    // Short critical section only: trim + push + threshold compare. All
    // store I/O happens after the lock is dropped.
    windows: Mutex<HashMap<String, SubjectWindow>>,
}

impl AbuseDetector {
    pub fn new(store: CounterStore) -> Self {
        Self {
            store,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one admitted request for a subject and escalate if a
    /// threshold was crossed.
    pub async fn record(&self, subject: &str) {
        let now = Utc::now().timestamp();

        let escalate_to = {
            let mut windows = self.windows.lock().await;
            let window = windows.entry(subject.to_string()).or_insert(SubjectWindow {
                hits: VecDeque::new(),
                escalated: AbuseLevel::None,
            });

            let cutoff = now - OBSERVATION_WINDOW_SECS;
            while window.hits.front().is_some_and(|&t| t < cutoff) {
                window.hits.pop_front();
            }
            window.hits.push_back(now);

            let level = AbuseLevel::for_count(window.hits.len());
            if level > window.escalated {
                window.escalated = level;
                Some(level)
            } else {
                if level == AbuseLevel::None && window.escalated != AbuseLevel::None {
                    // Quiet again: allow a future episode to escalate fresh.
                    window.escalated = AbuseLevel::None;
                }
                None
            }
        };

        let Some(level) = escalate_to else { return };

        match level {
            AbuseLevel::None => {}
            AbuseLevel::Warning => {
                tracing::warn!(subject = %subject, "Abuse warning threshold crossed");
            }
            AbuseLevel::Penalty => {
                tracing::warn!(subject = %subject, "Escalating to penalty box ({PENALTY_SECS}s)");
                if let Err(e) = self
                    .store
                    .add_penalty(subject, PENALTY_SECS, "request flood")
                    .await
                {
                    tracing::error!(subject = %subject, "Failed to record penalty: {e}");
                }
            }
            AbuseLevel::Strict => {
                tracing::warn!(subject = %subject, "Escalating to strict mode ({STRICT_SECS}s)");
                if let Err(e) = self.store.set_mode(subject, MODE_STRICT, STRICT_SECS).await {
                    tracing::error!(subject = %subject, "Failed to set strict mode: {e}");
                }
            }
            AbuseLevel::Block => {
                tracing::warn!(subject = %subject, "Escalating to block ({BLOCK_SECS}s penalty)");
                if let Err(e) = self
                    .store
                    .add_penalty(subject, BLOCK_SECS, "sustained request flood")
                    .await
                {
                    tracing::error!(subject = %subject, "Failed to extend penalty: {e}");
                }
            }
        }
    }

    /// Manual escalation (operator action). Same store effects as the
    /// automatic path.
    pub async fn punish(
        &self,
        subject: &str,
        level: AbuseLevel,
        reason: &str,
    ) -> Result<(), redis::RedisError> {
        match level {
            AbuseLevel::None | AbuseLevel::Warning => Ok(()),
            AbuseLevel::Penalty => self.store.add_penalty(subject, PENALTY_SECS, reason).await,
            AbuseLevel::Strict => self.store.set_mode(subject, MODE_STRICT, STRICT_SECS).await,
            AbuseLevel::Block => self.store.add_penalty(subject, BLOCK_SECS, reason).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_thresholds() {
        assert_eq!(AbuseLevel::for_count(0), AbuseLevel::None);
        assert_eq!(AbuseLevel::for_count(49), AbuseLevel::None);
        assert_eq!(AbuseLevel::for_count(50), AbuseLevel::Warning);
        assert_eq!(AbuseLevel::for_count(99), AbuseLevel::Warning);
        assert_eq!(AbuseLevel::for_count(100), AbuseLevel::Penalty);
        assert_eq!(AbuseLevel::for_count(200), AbuseLevel::Strict);
        assert_eq!(AbuseLevel::for_count(299), AbuseLevel::Strict);
        assert_eq!(AbuseLevel::for_count(300), AbuseLevel::Block);
        assert_eq!(AbuseLevel::for_count(5000), AbuseLevel::Block);
    }

    #[test]
    fn levels_order_monotonically() {
        assert!(AbuseLevel::Block > AbuseLevel::Strict);
        assert!(AbuseLevel::Strict > AbuseLevel::Penalty);
        assert!(AbuseLevel::Penalty > AbuseLevel::Warning);
        assert!(AbuseLevel::Warning > AbuseLevel::None);
    }
}
