//! Device approval routes.
//!
//! Public side: the new device starts a request, proves possession of the
//! code, and polls. Authenticated side: the primary device lists pending
//! requests and approves or denies. Approve/deny additionally require an
//! `X-Device-ID` header naming the token's own (primary) device.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::HeaderMap,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use hush_auth::registry::require_primary;
use hush_common::{
    crypto::validate_public_key,
    error::{HushError, HushResult},
    frame::{ApprovalRequestPayload, Frame, FrameKind},
    models::approval::ApprovalStatusResponse,
    models::device::DeviceDescriptor,
    validation::{CODE_REGEX, PHONE_REGEX, validate_request},
};
use hush_db::repository::users;

use crate::{AppState, middleware::AuthContext};

pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/device-approval/request", post(start_request))
        .route("/device-approval/verify", post(verify_possession))
        .route("/device-approval/{id}/status", get(poll_status))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/device-approval/pending", get(list_pending))
        .route("/device-approval/{id}/approve", post(approve))
        .route("/device-approval/{id}/deny", post(deny))
}

// ============================================================
// POST /device-approval/request  (public)
// ============================================================

#[derive(Deserialize, Validate)]
struct StartBody {
    #[validate(regex(path = *PHONE_REGEX, message = "Phone number must be E.164"))]
    phone_number: String,
    #[serde(flatten)]
    device: DeviceDescriptor,
}

#[derive(Serialize)]
struct StartResponse {
    request_id: Uuid,
    status: &'static str,
    expires_at: chrono::DateTime<chrono::Utc>,
}

async fn start_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<std::net::SocketAddr>,
    Json(body): Json<StartBody>,
) -> HushResult<Json<StartResponse>> {
    validate_request(&body)?;
    validate_request(&body.device)?;
    validate_public_key(&body.device.public_device_key, "public_device_key").map_err(|e| {
        HushError::InvalidInput {
            message: e.to_string(),
        }
    })?;

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_owned();

    let started = state
        .approvals
        .start(
            &body.phone_number,
            &body.device,
            &addr.ip().to_string(),
            &user_agent,
        )
        .await?;

    // The approval code travels ONLY to the primary device, over the
    // realtime channel. Transient: the primary can also poll /pending.
    let frame = Frame::new(
        FrameKind::DeviceApprovalRequest,
        serde_json::to_value(ApprovalRequestPayload {
            request_id: started.request.id,
            device_name: started.request.device_name.clone(),
            device_type: started.request.device_type.as_str().to_owned(),
            code: started.request.code.clone(),
            expires_at: started.request.expires_at,
            ip: started.request.requester_ip.clone(),
            user_agent: started.request.requester_user_agent.clone(),
        })
        .unwrap_or_default(),
    );
    let _ = state
        .router
        .dispatch(started.owner_id, Some(started.primary.id), frame, false)
        .await;

    Ok(Json(StartResponse {
        request_id: started.request.id,
        status: "pending",
        expires_at: started.request.expires_at,
    }))
}

// ============================================================
// POST /device-approval/verify  (public)
// ============================================================

#[derive(Deserialize, Validate)]
struct VerifyBody {
    request_id: Uuid,
    #[validate(regex(path = *CODE_REGEX, message = "Code must be 6 digits"))]
    code: String,
}

async fn verify_possession(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyBody>,
) -> HushResult<Json<serde_json::Value>> {
    validate_request(&body)?;
    state
        .approvals
        .verify_possession(body.request_id, &body.code)
        .await?;
    Ok(Json(serde_json::json!({ "verified": true })))
}

// ============================================================
// GET /device-approval/:id/status  (public)
// ============================================================

async fn poll_status(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> HushResult<Json<ApprovalStatusResponse>> {
    let request = state.approvals.status(request_id).await?;
    Ok(Json(request.into()))
}

// ============================================================
// GET /device-approval/pending  (auth)
// ============================================================

async fn list_pending(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
) -> HushResult<Json<Vec<ApprovalStatusResponse>>> {
    let user = users::find_by_id(&state.db.pool, auth.user_id)
        .await?
        .ok_or(HushError::NotFound {
            resource: "User".into(),
        })?;
    let pending = state.approvals.pending_for_user(&user.phone_number).await?;
    Ok(Json(pending.into_iter().map(Into::into).collect()))
}

// ============================================================
// POST /device-approval/:id/approve | /deny  (auth, primary only)
// ============================================================

async fn approve(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    headers: HeaderMap,
) -> HushResult<Json<ApprovalStatusResponse>> {
    decide(auth, state, request_id, headers, true).await
}

async fn deny(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    headers: HeaderMap,
) -> HushResult<Json<ApprovalStatusResponse>> {
    decide(auth, state, request_id, headers, false).await
}

async fn decide(
    auth: AuthContext,
    state: Arc<AppState>,
    request_id: Uuid,
    headers: HeaderMap,
    approve: bool,
) -> HushResult<Json<ApprovalStatusResponse>> {
    // Session device and X-Device-ID header must agree, and both must be
    // the account's current primary.
    let claimed = crate::middleware::require_device_header(&headers, &auth)?;
    require_primary(&state.db.pool, auth.user_id, claimed).await?;

    let decided = state
        .approvals
        .decide(request_id, auth.user_id, claimed, approve)
        .await?;

    // Tell the new device, if it already holds a connection.
    let kind = if approve {
        FrameKind::DeviceApproved
    } else {
        FrameKind::DeviceDenied
    };
    let frame = Frame::new(
        kind,
        serde_json::json!({ "request_id": request_id, "device_id": decided.new_device_id }),
    );
    let _ = state
        .router
        .dispatch(auth.user_id, Some(decided.new_device_id), frame, false)
        .await;

    Ok(Json(decided.request.into()))
}
