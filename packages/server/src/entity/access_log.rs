use common::AccessKind;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One reveal of one item to one viewer. Append-only; the newest entry per
/// (viewer, item) decides whether the artifact is still fresh.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "access_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub viewer_id: String,
    pub item_id: String,

    pub completed_job_id: String,
    #[sea_orm(belongs_to, from = "completed_job_id", to = "id")]
    pub completed_job: HasOne<super::completed_job::Entity>,

    pub access_kind: AccessKind,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
