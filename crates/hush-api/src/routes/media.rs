//! Media routes — presigned URL issuance only; bytes never transit here.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    routing::{get, post},
};
use uuid::Uuid;

use hush_common::{
    error::{HushError, HushResult},
    ids,
    models::media::{DownloadUrlResponse, UploadUrlRequest, UploadUrlResponse},
};
use hush_db::repository::media;
use hush_db::storage::{DOWNLOAD_URL_TTL_SECS, UPLOAD_URL_TTL_SECS};

use crate::{AppState, middleware::AuthContext};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media/upload-url", post(upload_url))
        .route("/media/{id}", get(download_url))
}

// ============================================================
// POST /media/upload-url
// ============================================================

async fn upload_url(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<UploadUrlRequest>,
) -> HushResult<Json<UploadUrlResponse>> {
    if body.size_bytes > state.limits.max_media_bytes {
        return Err(HushError::PayloadTooLarge {
            message: format!(
                "Media is capped at {} bytes",
                state.limits.max_media_bytes
            ),
        });
    }
    if body.content_type.is_empty() || !body.content_type.contains('/') {
        return Err(HushError::InvalidInput {
            message: "content_type must be a MIME type".into(),
        });
    }

    let media_id = ids::generate_id();
    let storage_key = format!("media/{}/{}", auth.user_id, media_id);

    let url = state
        .blob
        .issue_upload_url(&storage_key, &body.content_type, body.size_bytes)
        .await
        .map_err(|e| {
            tracing::error!("Upload presign failed: {e}");
            HushError::UpstreamUnavailable {
                service: "blob store".into(),
            }
        })?;

    media::insert(
        &state.db.pool,
        media_id,
        auth.user_id,
        &storage_key,
        &body.content_type,
        body.size_bytes as i64,
    )
    .await?;

    Ok(Json(UploadUrlResponse {
        media_id,
        url,
        expires_in: UPLOAD_URL_TTL_SECS,
        max_size: state.limits.max_media_bytes,
    }))
}

// ============================================================
// GET /media/:id
// ============================================================

async fn download_url(
    Extension(_auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<Uuid>,
) -> HushResult<Json<DownloadUrlResponse>> {
    let object = media::find(&state.db.pool, media_id)
        .await?
        .ok_or(HushError::NotFound {
            resource: "Media".into(),
        })?;

    let url = state
        .blob
        .issue_download_url(&object.storage_key)
        .await
        .map_err(|e| {
            tracing::error!("Download presign failed: {e}");
            HushError::UpstreamUnavailable {
                service: "blob store".into(),
            }
        })?;

    Ok(Json(DownloadUrlResponse {
        url,
        expires_in: DOWNLOAD_URL_TTL_SECS,
    }))
}
