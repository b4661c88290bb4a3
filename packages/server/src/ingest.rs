//! Upload path: spool, hash, validate, dedup, store, record.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use chrono::Utc;
use common::storage::{BlobStore, ContentHasher};
use futures::{Stream, StreamExt};
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set, SqlErr,
    TransactionTrait,
};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::dedup;
use crate::entity::media_item;
use crate::error::VaultError;
use crate::validate::{MAX_UPLOAD_BYTES, UploadCandidate, ValidationFailure, validate_batch};

/// Who is uploading, and where the announcement will be posted.
#[derive(Debug, Clone)]
pub struct OwnerScope {
    pub community_id: String,
    pub channel_id: String,
    pub author_id: String,
}

/// One uploaded file parked in a temp file. The file is removed on drop.
#[derive(Debug)]
pub struct SpooledUpload {
    pub candidate: UploadCandidate,
    path: PathBuf,
}

impl SpooledUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpooledUpload {
    fn drop(&mut self) {
        // Best effort.
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Copy `chunks` into a temp file under `dir`, hashing as it goes.
///
/// Bytes past [`MAX_UPLOAD_BYTES`] are counted but not written, so an
/// oversize file is still reported with its real size by validation.
pub async fn spool<S, E>(
    mut chunks: S,
    dir: &Path,
    filename: &str,
    content_type: &str,
) -> Result<SpooledUpload, VaultError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let path = dir.join(format!("cams-upload-{}", uuid::Uuid::new_v4()));

    let result = async {
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| VaultError::Internal(format!("Failed to create temp file: {e}")))?;
        let mut hasher = ContentHasher::new();
        let mut total: u64 = 0;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| {
                VaultError::Validation(vec![ValidationFailure {
                    filename: filename.to_string(),
                    field: "body",
                    message: format!("upload read error: {e}"),
                }])
            })?;
            total += chunk.len() as u64;
            if total > MAX_UPLOAD_BYTES {
                continue;
            }
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| VaultError::Internal(format!("Temp file write failed: {e}")))?;
        }

        file.flush()
            .await
            .map_err(|e| VaultError::Internal(format!("Temp file flush failed: {e}")))?;
        Ok((total, hasher.finalize()))
    }
    .await;

    match result {
        Ok((size_bytes, content_hash)) => Ok(SpooledUpload {
            candidate: UploadCandidate {
                filename: filename.to_string(),
                content_type: content_type.to_string(),
                size_bytes,
                content_hash,
            },
            path,
        }),
        Err(e) => {
            let _ = tokio::fs::remove_file(&path).await;
            Err(e)
        }
    }
}

/// Store a batch of uploads for `owner`.
///
/// All-or-nothing: every file is validated and dedup-checked before any byte
/// reaches the content store, and the rows are inserted in one transaction.
#[instrument(skip(db, store, uploads), fields(author_id = %owner.author_id, community_id = %owner.community_id, files = uploads.len()))]
pub async fn ingest(
    db: &DatabaseConnection,
    store: &dyn BlobStore,
    owner: &OwnerScope,
    uploads: Vec<SpooledUpload>,
) -> Result<Vec<media_item::Model>, VaultError> {
    let candidates: Vec<UploadCandidate> = uploads.iter().map(|u| u.candidate.clone()).collect();
    let validated = validate_batch(&candidates).map_err(VaultError::Validation)?;

    let mut seen = HashSet::new();
    for upload in &validated {
        if !seen.insert(upload.content_hash) {
            return Err(VaultError::Duplicate {
                filename: upload.filename.clone(),
                existing_id: None,
            });
        }
        if let Some(existing_id) = dedup::find_existing(
            db,
            &upload.content_hash,
            &owner.author_id,
            &owner.community_id,
        )
        .await?
        {
            info!(%existing_id, filename = %upload.filename, "Rejected duplicate upload");
            return Err(VaultError::Duplicate {
                filename: upload.filename.clone(),
                existing_id: Some(existing_id),
            });
        }
    }

    let mut rows = Vec::with_capacity(validated.len());
    for (upload, spooled) in validated.iter().zip(&uploads) {
        let stored = store.put_file(spooled.path()).await?;
        if stored != upload.content_hash {
            return Err(VaultError::Internal(format!(
                "'{}' changed while being stored",
                upload.filename
            )));
        }
        rows.push(media_item::ActiveModel {
            id: Set(uuid::Uuid::now_v7().to_string()),
            content_hash: Set(stored.to_hex()),
            media_type: Set(upload.media_type),
            content_type: Set(upload.content_type.clone()),
            filename: Set(upload.filename.clone()),
            size_bytes: Set(upload.size_bytes as i64),
            storage_ref: Set(stored.to_hex()),
            community_id: Set(owner.community_id.clone()),
            channel_id: Set(owner.channel_id.clone()),
            author_id: Set(owner.author_id.clone()),
            announcement_ref: Set(None),
            created_at: Set(Utc::now()),
        });
    }

    let txn = db.begin().await?;
    let mut items = Vec::with_capacity(rows.len());
    for (row, upload) in rows.into_iter().zip(&validated) {
        match row.insert(&txn).await {
            Ok(item) => items.push(item),
            // A concurrent upload of the same triple won the race.
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                txn.rollback().await?;
                warn!(filename = %upload.filename, "Duplicate detected by unique index");
                return Err(VaultError::Duplicate {
                    filename: upload.filename.clone(),
                    existing_id: None,
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
    txn.commit().await?;

    for item in &items {
        info!(item_id = %item.id, media_type = %item.media_type, size = item.size_bytes, "Stored media item");
    }
    Ok(items)
}

pub async fn find_item(
    db: &DatabaseConnection,
    item_id: &str,
) -> Result<media_item::Model, VaultError> {
    media_item::Entity::find_by_id(item_id)
        .one(db)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("Media item {item_id} not found")))
}

/// Remember where the announcement for `item_id` was rendered.
pub async fn attach_announcement(
    db: &DatabaseConnection,
    item_id: &str,
    announcement_ref: &str,
) -> Result<media_item::Model, VaultError> {
    let mut item = find_item(db, item_id).await?.into_active_model();
    item.announcement_ref = Set(Some(announcement_ref.to_string()));
    Ok(item.update(db).await?)
}
