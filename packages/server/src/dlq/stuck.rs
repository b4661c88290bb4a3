use std::time::Duration;

use chrono::Utc;
use common::dlq::JobFailureCode;
use common::{DlqConfig, DlqEnvelope, DlqErrorCode, JobStatus};
use sea_orm::sea_query::LockType;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, TransactionTrait,
};
use tracing::{error, info};

use crate::entity::watermark_job;
use crate::queue;

use super::DlqService;

/// Run the stuck job detector as a background task.
pub async fn run_stuck_job_detector(db: DatabaseConnection, config: DlqConfig) {
    let scan_interval = Duration::from_secs(config.stuck_job_scan_interval_secs);

    info!(
        timeout_secs = config.stuck_job_timeout_secs,
        scan_interval_secs = config.stuck_job_scan_interval_secs,
        "Starting stuck job detector"
    );

    let mut interval = tokio::time::interval(scan_interval);

    loop {
        interval.tick().await;

        if let Err(e) = detect_and_handle_stuck_jobs(&db, &config).await {
            error!(error = %e, "Stuck job detection failed");
        }
    }
}

/// Fail and dead-letter every job that has sat in `queued` or `active` for
/// longer than the timeout. Returns how many were moved.
pub async fn detect_and_handle_stuck_jobs(
    db: &DatabaseConnection,
    config: &DlqConfig,
) -> anyhow::Result<usize> {
    let threshold = Utc::now() - chrono::Duration::seconds(config.stuck_job_timeout_secs as i64);

    let stuck_ids: Vec<String> = watermark_job::Entity::find()
        .select_only()
        .column(watermark_job::Column::Id)
        .filter(watermark_job::Column::Status.is_in([JobStatus::Queued, JobStatus::Active]))
        .filter(watermark_job::Column::UpdatedAt.lt(threshold))
        .into_tuple()
        .all(db)
        .await?;

    if stuck_ids.is_empty() {
        return Ok(0);
    }

    info!(count = stuck_ids.len(), "Found stuck watermark jobs, moving to DLQ");

    let mut moved = 0;
    for job_id in stuck_ids {
        match handle_stuck_job(db, &job_id, config).await {
            Ok(true) => moved += 1,
            Ok(false) => {}
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to handle stuck job"),
        }
    }
    Ok(moved)
}

async fn handle_stuck_job(
    db: &DatabaseConnection,
    job_id: &str,
    config: &DlqConfig,
) -> anyhow::Result<bool> {
    let txn = db.begin().await?;

    let job = watermark_job::Entity::find_by_id(job_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;

    // Finished since the scan.
    let Some(job) = job.filter(|j| !j.status.is_final()) else {
        txn.rollback().await?;
        return Ok(false);
    };

    let message = format!(
        "Job stuck in {} for over {} seconds",
        job.status, config.stuck_job_timeout_secs
    );

    if !queue::mark_failed(&txn, &job.id, JobFailureCode::STUCK_JOB, &message).await? {
        txn.rollback().await?;
        return Ok(false);
    }

    let envelope = DlqEnvelope {
        message_id: job.id.clone(),
        item_id: Some(job.item_id.clone()),
        payload: serde_json::json!({
            "job_id": job.id,
            "item_id": job.item_id,
            "viewer_id": job.viewer_id,
            "media_type": job.media_type,
            "attempts": job.attempts,
            "created_at": job.created_at,
        }),
        error_code: DlqErrorCode::StuckJob,
        error_message: message,
        retry_history: Vec::new(),
    };
    DlqService::new(&txn).send_to_dlq(&envelope).await?;

    txn.commit().await?;

    info!(job_id = %job.id, item_id = %job.item_id, "Moved stuck job to DLQ");
    Ok(true)
}
