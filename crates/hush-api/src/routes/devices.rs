//! Device lifecycle routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    routing::{delete, get, put},
};
use uuid::Uuid;

use hush_common::error::HushResult;
use hush_common::models::device::Device;
use hush_db::repository::devices;
use hush_gateway::hub::CloseReason;

use crate::{AppState, middleware::AuthContext};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/devices/{id}", delete(remove_device))
        .route("/devices/{id}/primary", put(make_primary))
}

// ============================================================
// GET /devices
// ============================================================

async fn list_devices(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
) -> HushResult<Json<Vec<Device>>> {
    let list = devices::list_for_user(&state.db.pool, auth.user_id).await?;
    Ok(Json(list))
}

// ============================================================
// DELETE /devices/:id
// ============================================================

/// Soft delete: revokes and blacklists the device's sessions, closes its
/// live connection, clears its presence claim. Refused for the primary —
/// designate a replacement first.
async fn remove_device(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<Uuid>,
) -> HushResult<Json<serde_json::Value>> {
    state
        .registry
        .remove_device(&state.authority, auth.user_id, device_id)
        .await?;

    state
        .hub
        .close_device(auth.user_id, device_id, CloseReason::Revoked)
        .await;

    Ok(Json(serde_json::json!({ "removed": true })))
}

// ============================================================
// PUT /devices/:id/primary
// ============================================================

/// Only the current primary, acting from its own session, may hand the
/// flag to another active device.
async fn make_primary(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<Uuid>,
) -> HushResult<Json<serde_json::Value>> {
    state
        .registry
        .reassign_primary(auth.user_id, auth.device_id, device_id)
        .await?;

    Ok(Json(serde_json::json!({ "primary_device_id": device_id })))
}
