//! Media object metadata. Bytes live in the blob store; the server issues
//! presigned URLs and keeps only this record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaObject {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UploadUrlRequest {
    pub content_type: String,
    pub size_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct UploadUrlResponse {
    pub media_id: Uuid,
    pub url: String,
    pub expires_in: u64,
    pub max_size: u64,
}

#[derive(Debug, Serialize)]
pub struct DownloadUrlResponse {
    pub url: String,
    pub expires_in: u64,
}
