use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Durable link from a finished job to the item it was made from. Written
/// once per job and never changed.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "completed_job")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(unique)]
    pub job_id: String,
    #[sea_orm(belongs_to, from = "job_id", to = "id")]
    pub job: HasOne<super::watermark_job::Entity>,

    #[sea_orm(indexed)]
    pub item_id: String,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
