//! Middleware — authentication extraction and rate limiting.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use hush_common::error::HushError;
use hush_limits::{Decision, EndpointClass};

use crate::AppState;

/// Typed authentication context. Produced here, consumed by handlers via
/// `Extension<AuthContext>` — never a stringly-typed extension value.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub device_id: Uuid,
}

/// Extract and validate the bearer token from `Authorization`.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, HushError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(HushError::AuthMissing)?;

    let identity = state.authority.validate_access(token).await?;

    request.extensions_mut().insert(AuthContext {
        user_id: identity.user_id,
        device_id: identity.device_id,
    });

    Ok(next.run(request).await)
}

/// Enforce the four-tier sliding-window limits. Runs after auth (when auth
/// applies), so the user scope participates; public endpoints are limited
/// by global + endpoint + ip alone.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, HushError> {
    let method = request.method().as_str().to_owned();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned());

    let user = request
        .extensions()
        .get::<AuthContext>()
        .map(|auth| auth.user_id);

    let class = EndpointClass::classify(&method, &path);
    let endpoint_key = format!("{method} {path}");

    match state.limiter.check(class, &endpoint_key, &ip, user).await {
        Decision::Allowed => Ok(next.run(request).await),
        Decision::Denied(denial) => Err(HushError::RateLimited {
            limit: denial.limit,
            remaining: denial.remaining,
            reset_secs: denial.reset_secs,
            mode: denial.mode,
        }),
        Decision::Penalized { retry_after_secs } => Err(HushError::AbuseBlocked {
            retry_after_secs,
        }),
    }
}

/// The `X-Device-ID` header, required on primary-only operations. Must
/// name the same device the token is bound to.
pub fn require_device_header(request_headers: &axum::http::HeaderMap, auth: &AuthContext) -> Result<Uuid, HushError> {
    let claimed = request_headers
        .get("x-device-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or(HushError::AuthDeviceMismatch)?;
    if claimed != auth.device_id {
        return Err(HushError::AuthDeviceMismatch);
    }
    Ok(claimed)
}
