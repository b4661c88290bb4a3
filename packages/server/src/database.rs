use std::time::Duration;

use sea_orm::sea_query::Index;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use tracing::{info, warn};

use crate::entity::{access_log, dead_letter_message, watermark_job};

pub async fn init_db(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());

    // SQLite serializes writers anyway; one connection avoids lock errors.
    let max_connections = if db_url.starts_with("sqlite:") { 1 } else { 100 };
    opt.max_connections(max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8))
        .max_lifetime(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    sync_schema(&db).await?;
    Ok(db)
}

/// Create or migrate every table declared under `server::entity`.
pub async fn sync_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.get_schema_registry("server::entity::*").sync(db).await
}

/// Ensure the composite indexes the hot queries rely on.
///
/// Schema sync only creates single-column and unique indexes, so these are
/// added by hand at start-up. Failure is logged, not fatal.
pub async fn ensure_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();

    // Latest reveal of an item to a viewer:
    // WHERE viewer_id = ? AND item_id = ? ORDER BY created_at DESC
    let access_history = Index::create()
        .if_not_exists()
        .name("idx_access_log_viewer_item_created")
        .table(access_log::Entity)
        .col(access_log::Column::ViewerId)
        .col(access_log::Column::ItemId)
        .col(access_log::Column::CreatedAt)
        .to_owned();

    // Stuck job scan: WHERE status IN (...) AND updated_at < ?
    let stuck_scan = Index::create()
        .if_not_exists()
        .name("idx_watermark_job_status_updated")
        .table(watermark_job::Entity)
        .col(watermark_job::Column::Status)
        .col(watermark_job::Column::UpdatedAt)
        .to_owned();

    let dlq_listing = Index::create()
        .if_not_exists()
        .name("idx_dlq_resolved_created")
        .table(dead_letter_message::Entity)
        .col(dead_letter_message::Column::Resolved)
        .col(dead_letter_message::Column::CreatedAt)
        .to_owned();

    for (name, stmt) in [
        ("idx_access_log_viewer_item_created", access_history),
        ("idx_watermark_job_status_updated", stuck_scan),
        ("idx_dlq_resolved_created", dlq_listing),
    ] {
        match db.execute_raw(backend.build(&stmt)).await {
            Ok(_) => info!("Ensured index {} exists", name),
            Err(e) => warn!("Failed to create index {}: {}", name, e),
        }
    }

    Ok(())
}
