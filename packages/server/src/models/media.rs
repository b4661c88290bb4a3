use chrono::{DateTime, Utc};
use common::MediaType;
use serde::{Deserialize, Serialize};

use crate::entity::media_item;

/// Response DTO for one stored item.
#[derive(Debug, Serialize, Deserialize)]
pub struct MediaItemResponse {
    /// UUIDv7.
    pub id: String,
    pub media_type: MediaType,
    pub content_type: String,
    pub filename: String,
    pub size_bytes: i64,
    /// SHA-256 of the raw upload.
    pub content_hash: String,
    pub community_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub announcement_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<media_item::Model> for MediaItemResponse {
    fn from(model: media_item::Model) -> Self {
        Self {
            id: model.id,
            media_type: model.media_type,
            content_type: model.content_type,
            filename: model.filename,
            size_bytes: model.size_bytes,
            content_hash: model.content_hash,
            community_id: model.community_id,
            channel_id: model.channel_id,
            author_id: model.author_id,
            announcement_ref: model.announcement_ref,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub items: Vec<MediaItemResponse>,
}

#[derive(Debug, Deserialize)]
pub struct AttachAnnouncementRequest {
    /// Opaque pointer to the rendered announcement, e.g. a message id.
    pub announcement_ref: String,
}
