//! # hush-api
//!
//! The HTTP surface: authentication, device approval, profile and key
//! management, message history, and presigned media URLs. All JSON under
//! `/api/v1`, bearer auth except the public auth/approval endpoints,
//! per-scope rate limits on everything (the WebSocket upgrade lives in
//! hush-gateway and is exempt by design).

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;

use hush_auth::approval::ApprovalService;
use hush_auth::registry::DeviceRegistry;
use hush_auth::{TokenAuthority, VerificationService};
use hush_common::config::{LimitsConfig, RunMode};
use hush_db::Database;
use hush_db::counter_store::CounterStore;
use hush_db::offline_queue::OfflineQueue;
use hush_db::storage::BlobStore;
use hush_gateway::hub::Hub;
use hush_gateway::presence::PresenceTracker;
use hush_gateway::router::MessageRouter;
use hush_limits::RateLimiter;

/// Shared application state available to all route handlers.
pub struct AppState {
    pub db: Database,
    pub store: CounterStore,
    pub authority: Arc<TokenAuthority>,
    pub verification: VerificationService,
    pub registry: DeviceRegistry,
    pub approvals: ApprovalService,
    pub limiter: RateLimiter,
    pub router: Arc<MessageRouter>,
    pub hub: Arc<Hub>,
    pub presence: Arc<PresenceTracker>,
    pub queue: OfflineQueue,
    pub blob: BlobStore,
    pub mode: RunMode,
    pub limits: LimitsConfig,
}

/// Build the complete API router.
///
/// Layer order per router (outermost first): auth extraction, then rate
/// limiting — so the user scope is known when the limiter runs. Public
/// routes get the limiter only (ip + endpoint + global scopes).
pub fn build_router(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .merge(routes::auth::router())
        .merge(routes::approval::public_router())
        .merge(routes::health::router())
        .route_layer(from_fn_with_state(
            Arc::clone(&state),
            middleware::rate_limit_middleware,
        ));

    let protected = Router::new()
        .merge(routes::users::router())
        .merge(routes::devices::router())
        .merge(routes::approval::router())
        .merge(routes::messages::router())
        .merge(routes::media::router())
        .route_layer(from_fn_with_state(
            Arc::clone(&state),
            middleware::rate_limit_middleware,
        ))
        .route_layer(from_fn_with_state(
            Arc::clone(&state),
            middleware::auth_middleware,
        ));

    Router::new()
        .nest("/api/v1", public.merge(protected))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
