//! Centralized error types for Hush.
//!
//! Uses `thiserror` for ergonomic error definitions and provides HTTP-friendly
//! error variants that can be directly converted to API responses. Rate-limit
//! denials additionally carry the standard `X-RateLimit-*` headers.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Core application error type used across all Hush services.
#[derive(Debug, thiserror::Error)]
pub enum HushError {
    // === Validation ===
    #[error("{message}")]
    InvalidInput { message: String },

    // === Auth ===
    #[error("Missing credentials")]
    AuthMissing,

    #[error("Invalid token or code")]
    AuthInvalid,

    #[error("Token expired")]
    AuthExpired,

    #[error("Request must come from the primary device")]
    AuthDeviceMismatch,

    #[error("Forbidden")]
    Forbidden,

    // === Resources ===
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{resource} already exists")]
    Conflict { resource: String },

    // === Admission control ===
    #[error("Rate limited")]
    RateLimited {
        limit: u32,
        remaining: u32,
        reset_secs: u64,
        mode: &'static str,
    },

    #[error("Blocked for abuse. Retry after {retry_after_secs}s")]
    AbuseBlocked { retry_after_secs: u64 },

    #[error("{message}")]
    PayloadTooLarge { message: String },

    // === Upstream collaborators ===
    #[error("{service} unavailable")]
    UpstreamUnavailable { service: String },

    // === Infrastructure ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body sent to clients.
#[derive(Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl HushError {
    /// Map error to HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::AuthMissing | Self::AuthInvalid | Self::AuthExpired => StatusCode::UNAUTHORIZED,
            Self::AuthDeviceMismatch | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::RateLimited { .. } | Self::AbuseBlocked { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable error kind string for programmatic handling by clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::AuthMissing => "auth_missing",
            Self::AuthInvalid => "auth_invalid",
            Self::AuthExpired => "auth_expired",
            Self::AuthDeviceMismatch => "auth_device_mismatch",
            Self::Forbidden => "forbidden",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::AbuseBlocked { .. } => "abuse_blocked",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::Database(_) | Self::Store(_) | Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for HushError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't leak internal details to clients
        let message = match &self {
            HushError::Database(e) => {
                tracing::error!("Database error: {e}");
                "An internal error occurred".to_string()
            }
            HushError::Store(e) => {
                tracing::error!("Store error: {e}");
                "An internal error occurred".to_string()
            }
            HushError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let retry_after = match &self {
            HushError::RateLimited { reset_secs, .. } => Some(*reset_secs),
            HushError::AbuseBlocked { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let body = ErrorResponse {
            code: self.error_code().to_string(),
            message,
            retry_after,
        };

        let mut response = (status, axum::Json(body)).into_response();

        if let HushError::RateLimited {
            limit,
            remaining,
            reset_secs,
            mode,
        } = &self
        {
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", header_num(*limit as u64));
            headers.insert("X-RateLimit-Remaining", header_num(*remaining as u64));
            headers.insert("X-RateLimit-Reset", header_num(*reset_secs));
            headers.insert("X-RateLimit-Mode", HeaderValue::from_static(mode));
            headers.insert("Retry-After", header_num(*reset_secs));
        }
        if let HushError::AbuseBlocked { retry_after_secs } = &self {
            response
                .headers_mut()
                .insert("Retry-After", header_num(*retry_after_secs));
        }

        response
    }
}

fn header_num(v: u64) -> HeaderValue {
    HeaderValue::from_str(&v.to_string()).unwrap_or(HeaderValue::from_static("0"))
}

/// Convenience type alias for Results using HushError.
pub type HushResult<T> = Result<T, HushError>;
