//! Authentication routes — request-code, verify, register, login, refresh.
//!
//! Possession of the phone number plus an approved device is the
//! credential; there is no password. Registration is one transaction:
//! consume code + create user + first (primary) device + session.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use hush_auth::registry::RegisterInput;
use hush_common::{
    crypto::{validate_identity_key, validate_prekey_signature, validate_public_key},
    error::{HushError, HushResult},
    models::device::DeviceDescriptor,
    models::session::TokenPair,
    models::user::OwnProfileResponse,
    validation::{CODE_REGEX, PHONE_REGEX, USERNAME_REGEX, validate_request},
};
use hush_db::repository::{devices, prekeys, users};

use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/request-code", post(request_code))
        .route("/auth/verify", post(verify))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

// ============================================================
// POST /auth/request-code
// ============================================================

#[derive(Deserialize, Validate)]
struct RequestCodeBody {
    #[validate(regex(path = *PHONE_REGEX, message = "Phone number must be E.164"))]
    phone_number: String,
}

#[derive(Serialize)]
struct RequestCodeResponse {
    status: &'static str,
    /// Development mode only: the code, so integration tests don't need a
    /// live SMS gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

async fn request_code(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestCodeBody>,
) -> HushResult<Json<RequestCodeResponse>> {
    validate_request(&body)?;

    let dispatch = state.verification.request_code(&body.phone_number).await?;

    Ok(Json(RequestCodeResponse {
        status: "sent",
        code: dispatch.dev_echo,
    }))
}

// ============================================================
// POST /auth/verify
// ============================================================

#[derive(Deserialize, Validate)]
struct VerifyBody {
    #[validate(regex(path = *PHONE_REGEX, message = "Phone number must be E.164"))]
    phone_number: String,
    #[validate(regex(path = *CODE_REGEX, message = "Code must be 6 digits"))]
    code: String,
    /// Known device asking for a session directly.
    device_id: Option<Uuid>,
}

#[derive(Serialize)]
struct VerifyResponse {
    user_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<Uuid>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    tokens: Option<TokenPair>,
}

/// Pre-validate a code. For an existing account presenting a registered
/// active device, this consumes the code and returns tokens; otherwise it
/// leaves the code active for the follow-up register call.
async fn verify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyBody>,
) -> HushResult<Json<VerifyResponse>> {
    validate_request(&body)?;

    state
        .verification
        .check_code(&body.phone_number, &body.code)
        .await?;

    let Some(user) = users::find_by_phone(&state.db.pool, &body.phone_number).await? else {
        return Ok(Json(VerifyResponse {
            user_exists: false,
            user_id: None,
            tokens: None,
        }));
    };

    let device = match body.device_id {
        Some(device_id) => devices::find_for_user(&state.db.pool, user.id, device_id)
            .await?
            .filter(|d| d.active),
        None => None,
    };

    let Some(device) = device else {
        // Known account, unknown device: the device-approval flow (or the
        // recovery login) takes it from here.
        return Ok(Json(VerifyResponse {
            user_exists: true,
            user_id: Some(user.id),
            tokens: None,
        }));
    };

    let mut tx = state.db.pool.begin().await?;
    state
        .verification
        .verify_code(&mut *tx, &body.phone_number, &body.code)
        .await?;
    let tokens = state.authority.issue(&mut *tx, user.id, device.id).await?;
    tx.commit().await?;

    tracing::info!(user = %user.id, device = %device.id, "Verified login");

    Ok(Json(VerifyResponse {
        user_exists: true,
        user_id: Some(user.id),
        tokens: Some(tokens),
    }))
}

// ============================================================
// POST /auth/register
// ============================================================

#[derive(Deserialize, Validate)]
struct RegisterBody {
    #[validate(regex(path = *PHONE_REGEX, message = "Phone number must be E.164"))]
    phone_number: String,
    #[validate(regex(path = *CODE_REGEX, message = "Code must be 6 digits"))]
    code: String,
    #[validate(regex(
        path = *USERNAME_REGEX,
        message = "Username must be 3-30 characters: letters, numbers, underscores"
    ))]
    username: String,
    #[validate(length(max = 64, message = "Display name must be at most 64 characters"))]
    display_name: Option<String>,
    identity_key: String,
    signed_pre_key: String,
    signed_pre_key_sig: String,
    device: DeviceDescriptor,
    #[serde(default)]
    one_time_pre_keys: Vec<hush_common::models::prekey::OneTimePrekeyUpload>,
}

#[derive(Serialize)]
struct AuthResponse {
    user: OwnProfileResponse,
    device_id: Uuid,
    is_primary: bool,
    #[serde(flatten)]
    tokens: TokenPair,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> HushResult<Json<AuthResponse>> {
    validate_request(&body)?;
    validate_request(&body.device)?;
    validate_key_material(
        &body.identity_key,
        &body.signed_pre_key,
        &body.signed_pre_key_sig,
        &body.device.public_device_key,
    )?;

    if body.one_time_pre_keys.len() > state.limits.max_one_time_prekeys {
        return Err(HushError::PayloadTooLarge {
            message: format!(
                "At most {} one-time pre-keys per upload",
                state.limits.max_one_time_prekeys
            ),
        });
    }
    for key in &body.one_time_pre_keys {
        validate_public_key(&key.public_key, "one_time_pre_key")
            .map_err(invalid_key)?;
    }

    let one_time: Vec<(i64, String)> = body
        .one_time_pre_keys
        .iter()
        .map(|k| (k.key_id, k.public_key.clone()))
        .collect();

    let (user, device, tokens) = state
        .registry
        .register_account(
            &state.verification,
            &state.authority,
            RegisterInput {
                phone_number: body.phone_number,
                code: body.code,
                username: body.username,
                display_name: body.display_name,
                identity_key: body.identity_key,
                signed_pre_key: body.signed_pre_key,
                signed_pre_key_sig: body.signed_pre_key_sig,
                device: body.device,
            },
        )
        .await?;

    if !one_time.is_empty() {
        prekeys::insert_one_time(&state.db.pool, user.id, &one_time).await?;
    }

    Ok(Json(AuthResponse {
        user: user.into(),
        device_id: device.id,
        is_primary: device.is_primary,
        tokens,
    }))
}

// ============================================================
// POST /auth/login
// ============================================================

#[derive(Deserialize, Validate)]
struct LoginBody {
    #[validate(regex(path = *PHONE_REGEX, message = "Phone number must be E.164"))]
    phone_number: String,
    device: DeviceDescriptor,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> HushResult<Json<AuthResponse>> {
    validate_request(&body)?;
    validate_request(&body.device)?;
    validate_public_key(&body.device.public_device_key, "public_device_key")
        .map_err(invalid_key)?;

    let (user, device, tokens) = state
        .registry
        .login(&state.authority, &body.phone_number, &body.device)
        .await?;

    Ok(Json(AuthResponse {
        user: user.into(),
        device_id: device.id,
        is_primary: device.is_primary,
        tokens,
    }))
}

// ============================================================
// POST /auth/refresh
// ============================================================

#[derive(Deserialize)]
struct RefreshBody {
    refresh_token: String,
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshBody>,
) -> HushResult<Json<TokenPair>> {
    let identity = state.authority.validate_refresh(&body.refresh_token).await?;
    let tokens = state
        .registry
        .refresh(&state.authority, identity.user_id, identity.device_id)
        .await?;
    Ok(Json(tokens))
}

// ============================================================
// helpers
// ============================================================

fn validate_key_material(
    identity_key: &str,
    signed_pre_key: &str,
    signed_pre_key_sig: &str,
    public_device_key: &str,
) -> HushResult<()> {
    validate_identity_key(identity_key).map_err(invalid_key)?;
    validate_public_key(signed_pre_key, "signed_pre_key").map_err(invalid_key)?;
    validate_prekey_signature(signed_pre_key_sig).map_err(invalid_key)?;
    validate_public_key(public_device_key, "public_device_key").map_err(invalid_key)?;
    Ok(())
}

fn invalid_key(e: hush_common::crypto::KeyMaterialError) -> HushError {
    HushError::InvalidInput {
        message: e.to_string(),
    }
}
