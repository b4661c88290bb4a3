use common::{JobStatus, MediaType};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "watermark_job")]
pub struct Model {
    /// UUIDv7; retries keep the same id.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub item_id: String,
    #[sea_orm(belongs_to, from = "item_id", to = "id")]
    pub item: HasOne<super::media_item::Entity>,

    #[sea_orm(indexed)]
    pub viewer_id: String,

    pub media_type: MediaType,
    /// Opaque text burnt into the artifact.
    pub watermark_text: String,

    #[sea_orm(indexed)]
    pub status: JobStatus,
    /// Executions started so far.
    pub attempts: i32,

    /// Content store key of the watermarked output.
    pub artifact_hash: Option<String>,
    pub artifact_content_type: Option<String>,
    pub artifact_size: Option<i64>,

    pub error_code: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
