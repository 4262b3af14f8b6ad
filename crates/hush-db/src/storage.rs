//! MinIO / S3-compatible blob adapter.
//!
//! The server never proxies media bytes. It issues presigned URLs —
//! 15 minutes for uploads, 1 hour for downloads — and stores only the
//! media metadata row.

use std::time::Duration;

use anyhow::{Context, Result};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::{
    Client,
    config::{Builder as S3Builder, Credentials, Region},
};

/// Presigned upload URL lifetime.
pub const UPLOAD_URL_TTL_SECS: u64 = 15 * 60;
/// Presigned download URL lifetime.
pub const DOWNLOAD_URL_TTL_SECS: u64 = 60 * 60;

/// S3/MinIO blob client — wraps the AWS SDK.
#[derive(Clone)]
pub struct BlobStore {
    inner: Client,
    bucket: String,
}

impl BlobStore {
    /// Initialise client from config.
    pub fn new(cfg: &hush_common::config::StorageConfig) -> Result<Self> {
        let creds = Credentials::new(
            &cfg.access_key,
            &cfg.secret_key,
            None, // session token
            None, // expiry
            "hush-storage",
        );

        let s3_cfg = S3Builder::new()
            .endpoint_url(&cfg.endpoint)
            .credentials_provider(creds)
            .region(Region::new(cfg.region.clone()))
            // Force path-style URLs (required for MinIO)
            .force_path_style(true)
            .build();

        Ok(Self {
            inner: Client::from_conf(s3_cfg),
            bucket: cfg.bucket.clone(),
        })
    }

    /// Create the bucket if it doesn't exist yet.
    pub async fn ensure_bucket(&self) -> Result<()> {
        if self.inner.head_bucket().bucket(&self.bucket).send().await.is_ok() {
            return Ok(());
        }
        self.inner
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .with_context(|| format!("Failed to create bucket {}", self.bucket))?;
        Ok(())
    }

    /// Presigned PUT for a new media object.
    pub async fn issue_upload_url(
        &self,
        key: &str,
        content_type: &str,
        max_size: u64,
    ) -> Result<String> {
        let presigning = PresigningConfig::expires_in(Duration::from_secs(UPLOAD_URL_TTL_SECS))
            .context("Failed to build presigning config")?;

        let req = self
            .inner
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(max_size as i64)
            .presigned(presigning)
            .await
            .with_context(|| format!("Failed to presign upload for {key}"))?;

        Ok(req.uri().to_string())
    }

    /// Presigned GET for an existing media object.
    pub async fn issue_download_url(&self, key: &str) -> Result<String> {
        let presigning = PresigningConfig::expires_in(Duration::from_secs(DOWNLOAD_URL_TTL_SECS))
            .context("Failed to build presigning config")?;

        let req = self
            .inner
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .with_context(|| format!("Failed to presign download for {key}"))?;

        Ok(req.uri().to_string())
    }

    /// Delete a media object (account deletion cascade).
    pub async fn delete_object(&self, key: &str) -> Result<()> {
        self.inner
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to delete {key} from blob store"))?;
        Ok(())
    }
}
