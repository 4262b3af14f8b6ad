//! # hush-gateway
//!
//! The realtime delivery fabric: the per-instance WebSocket hub, the
//! cross-instance bus, the message router, and the presence tracker.
//!
//! Upgrade requests authenticate with a bearer token in the query string,
//! the Authorization header, or a `bearer.<token>` subprotocol entry. The
//! HTTP rate limiter does not apply to the upgrade; instead a per-ip cap
//! bounds concurrent handshakes and each connection gets its own frame
//! budget.

pub mod bus;
pub mod connection;
pub mod hub;
pub mod presence;
pub mod router;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    extract::{ConnectInfo, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use hush_auth::TokenAuthority;
use hush_common::config::LimitsConfig;
use hush_common::frame::BusEnvelope;
use hush_db::Database;
use hush_db::counter_store::CounterStore;
use hush_db::offline_queue::OfflineQueue;

use bus::Bus;
use hub::Hub;
use presence::PresenceTracker;
use router::MessageRouter;

/// Shared gateway state.
pub struct GatewayState {
    pub hub: Arc<Hub>,
    pub authority: Arc<TokenAuthority>,
    pub router: Arc<MessageRouter>,
    pub presence: Arc<PresenceTracker>,
    pub bus: Bus,
    pub queue: OfflineQueue,
    pub store: CounterStore,
    pub db: Database,
    pub limits: LimitsConfig,
    /// In-flight upgrade handshakes per source ip.
    upgrades: Mutex<HashMap<String, u32>>,
}

impl GatewayState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hub: Arc<Hub>,
        authority: Arc<TokenAuthority>,
        router: Arc<MessageRouter>,
        presence: Arc<PresenceTracker>,
        bus: Bus,
        queue: OfflineQueue,
        store: CounterStore,
        db: Database,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            hub,
            authority,
            router,
            presence,
            bus,
            queue,
            store,
            db,
            limits,
            upgrades: Mutex::new(HashMap::new()),
        }
    }

    fn try_begin_upgrade(self: &Arc<Self>, ip: &str) -> Option<UpgradeGuard> {
        let mut upgrades = self.upgrades.lock().ok()?;
        let count = upgrades.entry(ip.to_string()).or_insert(0);
        if *count >= self.limits.upgrades_per_ip {
            return None;
        }
        *count += 1;
        Some(UpgradeGuard {
            state: Arc::clone(self),
            ip: ip.to_string(),
        })
    }
}

/// Releases an upgrade slot when the handshake completes or fails.
struct UpgradeGuard {
    state: Arc<GatewayState>,
    ip: String,
}

impl Drop for UpgradeGuard {
    fn drop(&mut self) {
        if let Ok(mut upgrades) = self.state.upgrades.lock() {
            if let Some(count) = upgrades.get_mut(&self.ip) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    upgrades.remove(&self.ip);
                }
            }
        }
    }
}

/// Forward bus envelopes from other instances into the router.
pub fn spawn_bus_dispatcher(
    router: Arc<MessageRouter>,
    mut envelopes: mpsc::Receiver<BusEnvelope>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = envelopes.recv().await {
            router.handle_bus_frame(envelope).await;
        }
    })
}

/// Build the gateway router. Serve with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the per-ip cap
/// sees real addresses.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/gateway", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let ip = addr.ip().to_string();

    let Some(guard) = state.try_begin_upgrade(&ip) else {
        tracing::warn!(ip = %ip, "Upgrade cap reached");
        return (StatusCode::TOO_MANY_REQUESTS, "too many upgrade attempts").into_response();
    };

    let Some(token) = extract_token(&params, &headers) else {
        return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
    };

    let identity = match state.authority.validate_access(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::debug!(ip = %ip, "Upgrade rejected: {e}");
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    };

    let connection_id = Uuid::now_v7();
    ws.on_upgrade(move |socket| async move {
        drop(guard); // handshake done, free the slot

        // Task boundary: a panicking connection must not take the
        // process down, only log and close.
        let handle = tokio::spawn(connection::run(
            socket,
            state,
            connection::ConnectionParams {
                user_id: identity.user_id,
                device_id: identity.device_id,
                connection_id,
                ip,
            },
        ));
        if let Err(e) = handle.await {
            if e.is_panic() {
                tracing::error!(connection = %connection_id, "Connection handler panicked: {e}");
            }
        }
    })
}

/// Bearer token from `?token=`, the Authorization header, or a
/// `bearer.<token>` subprotocol entry — in that order.
fn extract_token(params: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = params.get("token") {
        if !token.is_empty() {
            return Some(token.clone());
        }
    }
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    if let Some(protocols) = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        for entry in protocols.split(',') {
            if let Some(token) = entry.trim().strip_prefix("bearer.") {
                return Some(token.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_extraction_order() {
        let mut params = HashMap::new();
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&params, &headers), None);

        headers.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            "hush, bearer.proto-token".parse().unwrap(),
        );
        assert_eq!(
            extract_token(&params, &headers).as_deref(),
            Some("proto-token")
        );

        headers.insert(header::AUTHORIZATION, "Bearer header-token".parse().unwrap());
        assert_eq!(
            extract_token(&params, &headers).as_deref(),
            Some("header-token")
        );

        params.insert("token".into(), "query-token".into());
        assert_eq!(
            extract_token(&params, &headers).as_deref(),
            Some("query-token")
        );
    }
}
