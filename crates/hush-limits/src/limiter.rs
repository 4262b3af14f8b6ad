//! Four-tier sliding-window rate limiter.
//!
//! Scopes stack global → endpoint → ip → user; a request passes only if
//! every applicable scope has room. Each scope is a one-minute sorted-set
//! window in the counter store: trim, count, compare, and append on admit.
//!
//! Store failures fail OPEN: a transient Redis outage must not take the
//! API down, it only loses rate limiting while it lasts. (The token
//! blacklist is the opposite — see the token authority.)
//!
//! WebSocket upgrades bypass this limiter; the hub enforces its own
//! per-connection frame cap.

use std::sync::Arc;

use chrono::Utc;
use hush_db::counter_store::{CounterStore, MODE_STRICT};
use uuid::Uuid;

use crate::abuse::AbuseDetector;

/// Window length for every scope.
pub const WINDOW_SECS: u64 = 60;
const WINDOW_MS: i64 = WINDOW_SECS as i64 * 1000;

/// Endpoint families with their own (stricter) budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    Auth,
    UserSearch,
    DeviceApproval,
    MediaUpload,
    MediaDownload,
    MessageRetrieval,
    MessageStatus,
    Default,
}

impl EndpointClass {
    /// (normal, strict) per-minute budgets.
    pub fn limits(self) -> (u32, u32) {
        match self {
            EndpointClass::Auth => (10, 5),
            EndpointClass::UserSearch => (10, 5),
            EndpointClass::DeviceApproval => (5, 3),
            EndpointClass::MediaUpload => (5, 3),
            EndpointClass::MediaDownload => (60, 30),
            EndpointClass::MessageRetrieval => (60, 30),
            EndpointClass::MessageStatus => (120, 60),
            EndpointClass::Default => (100, 50),
        }
    }

    /// Classify a request by method and matched route path.
    pub fn classify(method: &str, path: &str) -> Self {
        if path.starts_with("/api/v1/auth/") {
            return EndpointClass::Auth;
        }
        if path.starts_with("/api/v1/device-approval") {
            return EndpointClass::DeviceApproval;
        }
        if path == "/api/v1/users/search" {
            return EndpointClass::UserSearch;
        }
        if path == "/api/v1/media/upload-url" {
            return EndpointClass::MediaUpload;
        }
        if path.starts_with("/api/v1/media/") {
            return EndpointClass::MediaDownload;
        }
        if path.starts_with("/api/v1/messages") {
            return if method == "GET" {
                EndpointClass::MessageRetrieval
            } else {
                EndpointClass::MessageStatus
            };
        }
        EndpointClass::Default
    }
}

/// Per-scope budgets (normal, strict).
fn scope_limits(scope: &ScopeKind, endpoint: EndpointClass) -> (u32, u32) {
    match scope {
        ScopeKind::Global => (1000, 500),
        ScopeKind::Endpoint => endpoint.limits(),
        ScopeKind::Ip => (60, 30),
        ScopeKind::User => (120, 60),
    }
}

#[derive(Debug, Clone, Copy)]
enum ScopeKind {
    Global,
    Endpoint,
    Ip,
    User,
}

/// Structured rejection the HTTP layer turns into a 429 with headers.
#[derive(Debug, Clone)]
pub struct Denial {
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
    pub mode: &'static str,
}

#[derive(Debug, Clone)]
pub enum Decision {
    Allowed,
    Denied(Denial),
    /// Subject is in the penalty box; independent of window math.
    Penalized { retry_after_secs: u64 },
}

#[derive(Clone)]
pub struct RateLimiter {
    store: CounterStore,
    abuse: Arc<AbuseDetector>,
}

impl RateLimiter {
    pub fn new(store: CounterStore, abuse: Arc<AbuseDetector>) -> Self {
        Self { store, abuse }
    }

    /// Admit or reject one request. `endpoint_key` is the matched route
    /// ("POST /api/v1/auth/request-code"), `ip` the client address, `user`
    /// the authenticated user if any.
    pub async fn check(
        &self,
        endpoint: EndpointClass,
        endpoint_key: &str,
        ip: &str,
        user: Option<Uuid>,
    ) -> Decision {
        let ip_subject = format!("ip:{ip}");
        let user_subject = user.map(|u| format!("user:{u}"));

        // Penalty box first — boxed subjects don't get window math.
        for subject in std::iter::once(&ip_subject).chain(user_subject.as_ref()) {
            match self.store.penalty_remaining(subject).await {
                Ok(Some(retry_after_secs)) => {
                    return Decision::Penalized { retry_after_secs };
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Penalty check unavailable, failing open: {e}");
                }
            }
        }

        // The detector watches the whole request stream, not just what the
        // windows admit — an offender pinned at 429 still escalates into
        // the penalty box.
        self.abuse.record(&ip_subject).await;
        if let Some(ref subject) = user_subject {
            self.abuse.record(subject).await;
        }

        let mut scopes: Vec<(ScopeKind, String)> = vec![
            (ScopeKind::Global, "global".to_string()),
            (ScopeKind::Endpoint, format!("endpoint:{endpoint_key}")),
            (ScopeKind::Ip, ip_subject.clone()),
        ];
        if let Some(ref subject) = user_subject {
            scopes.push((ScopeKind::User, subject.clone()));
        }

        let now_ms = Utc::now().timestamp_millis();

        for (kind, scope) in &scopes {
            let (normal, strict) = scope_limits(kind, endpoint);

            let mode = match self.store.get_mode(scope).await {
                Ok(mode) => mode,
                Err(e) => {
                    tracing::warn!(scope = %scope, "Mode read unavailable, assuming normal: {e}");
                    continue;
                }
            };
            let (limit, mode_str): (u32, &'static str) = if mode == MODE_STRICT {
                (strict, "strict")
            } else {
                (normal, "normal")
            };

            let count = match self.store.count_in_window(scope, now_ms, WINDOW_MS).await {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(scope = %scope, "Window read unavailable, failing open: {e}");
                    continue;
                }
            };

            if count >= limit as u64 {
                tracing::debug!(scope = %scope, count, limit, mode = mode_str, "Rate limit exceeded");
                return Decision::Denied(Denial {
                    limit,
                    remaining: 0,
                    reset_secs: WINDOW_SECS,
                    mode: mode_str,
                });
            }
        }

        // Admitted: append to every scope window.
        for (_, scope) in &scopes {
            if let Err(e) = self.store.append(scope, now_ms, WINDOW_MS).await {
                tracing::warn!(scope = %scope, "Window append failed: {e}");
            }
        }

        Decision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_overrides_match_policy() {
        assert_eq!(EndpointClass::Auth.limits(), (10, 5));
        assert_eq!(EndpointClass::UserSearch.limits(), (10, 5));
        assert_eq!(EndpointClass::DeviceApproval.limits(), (5, 3));
        assert_eq!(EndpointClass::MediaUpload.limits(), (5, 3));
        assert_eq!(EndpointClass::MessageRetrieval.limits(), (60, 30));
        assert_eq!(EndpointClass::MessageStatus.limits(), (120, 60));
        assert_eq!(EndpointClass::MediaDownload.limits(), (60, 30));
        assert_eq!(EndpointClass::Default.limits(), (100, 50));
    }

    #[test]
    fn strict_mode_halves_every_tier() {
        for class in [
            EndpointClass::Auth,
            EndpointClass::DeviceApproval,
            EndpointClass::Default,
        ] {
            let (normal, strict) = class.limits();
            assert!(strict < normal);
        }
        assert_eq!(scope_limits(&ScopeKind::Global, EndpointClass::Default), (1000, 500));
        assert_eq!(scope_limits(&ScopeKind::Ip, EndpointClass::Default), (60, 30));
        assert_eq!(scope_limits(&ScopeKind::User, EndpointClass::Default), (120, 60));
    }

    #[test]
    fn routes_classify_to_their_family() {
        assert_eq!(
            EndpointClass::classify("POST", "/api/v1/auth/request-code"),
            EndpointClass::Auth
        );
        assert_eq!(
            EndpointClass::classify("POST", "/api/v1/device-approval/request"),
            EndpointClass::DeviceApproval
        );
        assert_eq!(
            EndpointClass::classify("GET", "/api/v1/users/search"),
            EndpointClass::UserSearch
        );
        assert_eq!(
            EndpointClass::classify("GET", "/api/v1/messages"),
            EndpointClass::MessageRetrieval
        );
        assert_eq!(
            EndpointClass::classify("PUT", "/api/v1/messages/{id}/status"),
            EndpointClass::MessageStatus
        );
        assert_eq!(
            EndpointClass::classify("POST", "/api/v1/media/upload-url"),
            EndpointClass::MediaUpload
        );
        assert_eq!(
            EndpointClass::classify("GET", "/api/v1/media/{id}"),
            EndpointClass::MediaDownload
        );
        assert_eq!(
            EndpointClass::classify("GET", "/api/v1/devices"),
            EndpointClass::Default
        );
    }
}
