use common::MediaType;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One confidential upload.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "media_item")]
pub struct Model {
    /// UUIDv7, canonical string form.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Hex SHA-256 of the raw bytes. A given author may hold a given content
    /// only once per community.
    #[sea_orm(unique_key = "owner_content")]
    pub content_hash: String,

    pub media_type: MediaType,
    /// Declared MIME type.
    pub content_type: String,
    pub filename: String,
    pub size_bytes: i64,

    /// Content store key of the raw upload.
    pub storage_ref: String,

    #[sea_orm(unique_key = "owner_content")]
    pub community_id: String,
    pub channel_id: String,
    #[sea_orm(unique_key = "owner_content")]
    pub author_id: String,

    /// Where the presentation layer rendered the announcement for this item.
    pub announcement_ref: Option<String>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
