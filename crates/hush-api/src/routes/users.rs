//! User routes — profile, search, pre-keys, PIN, presence.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hush_common::{
    crypto::{validate_pin_hash, validate_public_key},
    error::{HushError, HushResult},
    models::prekey::{PoppedPrekey, PrekeyBundleResponse, UploadPrekeysRequest},
    models::user::{OwnProfileResponse, UpdateUserRequest, UserResponse},
    validation::validate_request,
};
use hush_db::repository::{prekeys, users};
use hush_gateway::hub::CloseReason;
use hush_gateway::presence::PresenceView;

use crate::{AppState, middleware::AuthContext};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/users/me",
            get(get_me).patch(update_me).delete(delete_me),
        )
        .route("/users/me/prekeys", post(upload_prekeys))
        .route("/users/search", get(search))
        .route("/users/{id}/keys", get(get_key_bundle))
        .route("/users/{id}/presence", get(get_presence))
        .route("/pin", get(get_pin).put(set_pin).delete(delete_pin))
}

// ============================================================
// GET / PATCH / DELETE /users/me
// ============================================================

async fn get_me(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
) -> HushResult<Json<OwnProfileResponse>> {
    let user = users::find_by_id(&state.db.pool, auth.user_id)
        .await?
        .ok_or(HushError::NotFound {
            resource: "User".into(),
        })?;
    Ok(Json(user.into()))
}

async fn update_me(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpdateUserRequest>,
) -> HushResult<Json<OwnProfileResponse>> {
    validate_request(&body)?;

    if let Some(ref username) = body.username {
        if let Some(existing) = users::find_by_username(&state.db.pool, username).await? {
            if existing.id != auth.user_id {
                return Err(HushError::Conflict {
                    resource: "Username".into(),
                });
            }
        }
    }

    let user = users::update_profile(
        &state.db.pool,
        auth.user_id,
        body.username.as_deref(),
        body.display_name.as_deref(),
        body.avatar.as_deref(),
        body.show_online_status,
        body.show_last_seen,
    )
    .await?;

    Ok(Json(user.into()))
}

/// Full account deletion: sessions, devices, approvals, conversations,
/// queued frames, presence — everything.
async fn delete_me(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
) -> HushResult<Json<serde_json::Value>> {
    let user = users::find_by_id(&state.db.pool, auth.user_id)
        .await?
        .ok_or(HushError::NotFound {
            resource: "User".into(),
        })?;

    state.hub.close_user(auth.user_id, CloseReason::Revoked).await;
    state
        .registry
        .delete_account(&state.authority, &user)
        .await?;
    state.queue.purge(auth.user_id).await?;
    state.store.presence_clear(auth.user_id).await?;

    tracing::info!(user = %auth.user_id, "Account deletion complete");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

// ============================================================
// GET /users/search?q=
// ============================================================

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

const SEARCH_MIN_CHARS: usize = 3;
const SEARCH_MAX_RESULTS: i64 = 20;

async fn search(
    Extension(_auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> HushResult<Json<Vec<UserResponse>>> {
    let needle = query.q.trim();
    if needle.chars().count() < SEARCH_MIN_CHARS {
        return Err(HushError::InvalidInput {
            message: format!("Search needs at least {SEARCH_MIN_CHARS} characters"),
        });
    }

    let found = users::search(&state.db.pool, needle, SEARCH_MAX_RESULTS).await?;
    Ok(Json(found.into_iter().map(UserResponse::from).collect()))
}

// ============================================================
// POST /users/me/prekeys
// ============================================================

#[derive(Serialize)]
struct UploadPrekeysResponse {
    uploaded: usize,
    remaining: i64,
}

async fn upload_prekeys(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<UploadPrekeysRequest>,
) -> HushResult<Json<UploadPrekeysResponse>> {
    if body.one_time_pre_keys.len() > state.limits.max_one_time_prekeys {
        return Err(HushError::PayloadTooLarge {
            message: format!(
                "At most {} one-time pre-keys per upload",
                state.limits.max_one_time_prekeys
            ),
        });
    }
    for key in &body.one_time_pre_keys {
        validate_public_key(&key.public_key, "one_time_pre_key").map_err(|e| {
            HushError::InvalidInput {
                message: e.to_string(),
            }
        })?;
    }

    let pairs: Vec<(i64, String)> = body
        .one_time_pre_keys
        .iter()
        .map(|k| (k.key_id, k.public_key.clone()))
        .collect();
    let uploaded = prekeys::insert_one_time(&state.db.pool, auth.user_id, &pairs).await?;
    let remaining = prekeys::count_unconsumed(&state.db.pool, auth.user_id).await?;

    Ok(Json(UploadPrekeysResponse { uploaded, remaining }))
}

// ============================================================
// GET /users/:id/keys — the X3DH bundle fetch
// ============================================================

/// Pops one one-time pre-key atomically. A dry pool still serves identity
/// + signed pre-key; the initiator falls back to identity-only X3DH.
async fn get_key_bundle(
    Extension(_auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> HushResult<Json<PrekeyBundleResponse>> {
    let set = prekeys::get_set(&state.db.pool, user_id)
        .await?
        .ok_or(HushError::NotFound {
            resource: "Key bundle".into(),
        })?;

    let popped = prekeys::pop_one_time(&state.db.pool, user_id).await?;

    Ok(Json(PrekeyBundleResponse {
        user_id,
        identity_key: set.identity_key,
        signed_pre_key: set.signed_pre_key,
        signed_pre_key_sig: set.signed_pre_key_sig,
        one_time_pre_key: popped.map(|k| PoppedPrekey {
            key_id: k.key_id,
            public_key: k.public_key,
        }),
    }))
}

// ============================================================
// GET /users/:id/presence
// ============================================================

async fn get_presence(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> HushResult<Json<PresenceView>> {
    let target = users::find_by_id(&state.db.pool, user_id)
        .await?
        .ok_or(HushError::NotFound {
            resource: "User".into(),
        })?;

    let view = state.presence.read(&target, auth.user_id).await?;
    Ok(Json(view))
}

// ============================================================
// GET / PUT / DELETE /pin
// ============================================================

#[derive(Deserialize)]
struct PinBody {
    /// Argon2id PHC string, hashed client-side. The server never sees the
    /// PIN itself.
    pin_hash: String,
}

async fn get_pin(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
) -> HushResult<Json<serde_json::Value>> {
    let user = users::find_by_id(&state.db.pool, auth.user_id)
        .await?
        .ok_or(HushError::NotFound {
            resource: "User".into(),
        })?;
    Ok(Json(serde_json::json!({ "pin_set": user.pin_hash.is_some() })))
}

async fn set_pin(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<PinBody>,
) -> HushResult<Json<serde_json::Value>> {
    validate_pin_hash(&body.pin_hash).map_err(|message| HushError::InvalidInput { message })?;
    users::set_pin(&state.db.pool, auth.user_id, &body.pin_hash).await?;
    Ok(Json(serde_json::json!({ "pin_set": true })))
}

async fn delete_pin(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
) -> HushResult<Json<serde_json::Value>> {
    users::clear_pin(&state.db.pool, auth.user_id).await?;
    Ok(Json(serde_json::json!({ "pin_set": false })))
}
