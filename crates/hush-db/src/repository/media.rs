//! Media metadata repository.

use chrono::Utc;
use hush_common::models::media::MediaObject;
use uuid::Uuid;

use super::ts;

pub async fn insert(
    pool: &sqlx::AnyPool,
    id: Uuid,
    owner_id: Uuid,
    storage_key: &str,
    content_type: &str,
    size_bytes: i64,
) -> Result<MediaObject, sqlx::Error> {
    sqlx::query_as::<_, MediaObject>(
        r#"
        INSERT INTO media_objects (id, owner_id, storage_key, content_type, size_bytes, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id.to_string())
    .bind(owner_id.to_string())
    .bind(storage_key)
    .bind(content_type)
    .bind(size_bytes)
    .bind(ts(Utc::now()))
    .fetch_one(pool)
    .await
}

pub async fn find(pool: &sqlx::AnyPool, id: Uuid) -> Result<Option<MediaObject>, sqlx::Error> {
    sqlx::query_as::<_, MediaObject>("SELECT * FROM media_objects WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
}
