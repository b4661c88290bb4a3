use axum::Json;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::instrument;

use crate::error::{AppError, VaultError};
use crate::extractors::json::AppJson;
use crate::ingest::{self, OwnerScope, SpooledUpload};
use crate::models::media::{AttachAnnouncementRequest, MediaItemResponse, UploadResponse};
use crate::state::AppState;
use crate::validate::{MAX_FILES_PER_UPLOAD, MAX_UPLOAD_BYTES};

/// Room for a full batch plus multipart framing.
pub fn upload_body_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::max((MAX_UPLOAD_BYTES as usize + 64 * 1024) * MAX_FILES_PER_UPLOAD)
}

/// `POST /media`: multipart with one or more `file` parts plus
/// `community_id`, `channel_id` and `author_id` text parts.
#[instrument(skip(state, multipart))]
pub async fn upload_media(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    if !state.config.vault.uploads_enabled {
        return Err(VaultError::UploadsClosed.into());
    }

    let spool_dir = std::env::temp_dir();
    let mut uploads: Vec<SpooledUpload> = Vec::new();
    let mut community_id = None;
    let mut channel_id = None;
    let mut author_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                uploads.push(
                    ingest::spool(Box::pin(field), &spool_dir, &filename, &content_type).await?,
                );
            }
            Some(name @ ("community_id" | "channel_id" | "author_id")) => {
                let slot = match name {
                    "community_id" => &mut community_id,
                    "channel_id" => &mut channel_id,
                    _ => &mut author_id,
                };
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read {name}: {e}")))?;
                *slot = Some(text.trim().to_string());
            }
            _ => {} // Ignore unknown fields.
        }
    }

    let required = |value: Option<String>, name: &str| {
        value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Validation(format!("Missing '{name}' field")))
    };
    let owner = OwnerScope {
        community_id: required(community_id, "community_id")?,
        channel_id: required(channel_id, "channel_id")?,
        author_id: required(author_id, "author_id")?,
    };

    let items = ingest::ingest(&state.db, state.store.as_ref(), &owner, uploads).await?;
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            items: items.into_iter().map(Into::into).collect(),
        }),
    ))
}

pub async fn get_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MediaItemResponse>, AppError> {
    let item = ingest::find_item(&state.db, &id).await?;
    Ok(Json(item.into()))
}

#[instrument(skip(state, payload))]
pub async fn attach_announcement(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(payload): AppJson<AttachAnnouncementRequest>,
) -> Result<Json<MediaItemResponse>, AppError> {
    let announcement_ref = payload.announcement_ref.trim();
    if announcement_ref.is_empty() {
        return Err(AppError::Validation("announcement_ref cannot be empty".into()));
    }
    let item = ingest::attach_announcement(&state.db, &id, announcement_ref).await?;
    Ok(Json(item.into()))
}
