//! Durable job rows plus the transport that hands jobs to a runner.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::dlq::JobFailureCode;
use common::storage::{BlobStore, ContentHash};
use common::{JobStatus, ProcessedArtifact, WatermarkJob, WatermarkTask, watermark};
use mq::{MqError, QueuePublisher};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use tokio::sync::mpsc;
use tracing::{error, info, instrument};

use crate::entity::{media_item, watermark_job};
use crate::error::VaultError;

/// Carries a job to whoever executes it.
#[async_trait]
pub trait JobTransport: Send + Sync {
    async fn dispatch(&self, job: &WatermarkJob) -> Result<(), MqError>;
}

/// Redis-backed transport consumed by `cams-worker` processes.
pub struct MqTransport {
    publisher: QueuePublisher,
}

impl MqTransport {
    pub fn new(publisher: QueuePublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl JobTransport for MqTransport {
    async fn dispatch(&self, job: &WatermarkJob) -> Result<(), MqError> {
        self.publisher.publish(job).await
    }
}

/// In-process channel drained by the server's own runner.
pub struct LocalTransport {
    tx: mpsc::Sender<WatermarkJob>,
}

impl LocalTransport {
    pub fn new(tx: mpsc::Sender<WatermarkJob>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl JobTransport for LocalTransport {
    async fn dispatch(&self, job: &WatermarkJob) -> Result<(), MqError> {
        self.tx
            .send(job.clone())
            .await
            .map_err(|_| MqError::Queue(common::mq::MqError::Closed))
    }
}

#[derive(Clone)]
pub struct JobQueue {
    db: DatabaseConnection,
    transport: Arc<dyn JobTransport>,
    store: Arc<dyn BlobStore>,
    public_base_url: Option<String>,
}

impl JobQueue {
    pub fn new(
        db: DatabaseConnection,
        transport: Arc<dyn JobTransport>,
        store: Arc<dyn BlobStore>,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            db,
            transport,
            store,
            public_base_url,
        }
    }

    /// Where a worker fetches the raw upload from.
    pub fn source_url(&self, hash: &ContentHash) -> Result<String, VaultError> {
        if let Some(base) = &self.public_base_url {
            return Ok(format!("{}/{}", base.trim_end_matches('/'), hash));
        }
        self.store.locate(hash).ok_or_else(|| {
            VaultError::Internal("content store has no locator and no public_base_url".into())
        })
    }

    /// Insert a `queued` row for `viewer_id` and dispatch it.
    ///
    /// If the transport refuses the message the row is failed with
    /// `DISPATCH_FAILED` so it is not mistaken for work in progress.
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    pub async fn enqueue(
        &self,
        item: &media_item::Model,
        viewer_id: &str,
    ) -> Result<watermark_job::Model, VaultError> {
        let hash = ContentHash::from_hex(&item.storage_ref)?;
        let source_url = self.source_url(&hash)?;
        let now = Utc::now();
        let watermark_text = watermark::encode(viewer_id, now);

        let row = watermark_job::ActiveModel {
            id: Set(uuid::Uuid::now_v7().to_string()),
            item_id: Set(item.id.clone()),
            viewer_id: Set(viewer_id.to_string()),
            media_type: Set(item.media_type),
            watermark_text: Set(watermark_text.clone()),
            status: Set(JobStatus::Queued),
            attempts: Set(0),
            artifact_hash: Set(None),
            artifact_content_type: Set(None),
            artifact_size: Set(None),
            error_code: Set(None),
            error_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        let job = WatermarkJob {
            job_id: row.id.clone(),
            item_id: item.id.clone(),
            viewer_id: viewer_id.to_string(),
            task: WatermarkTask::new(item.media_type, source_url, watermark_text),
        };

        if let Err(e) = self.transport.dispatch(&job).await {
            error!(job_id = %row.id, error = %e, "Failed to dispatch watermark job");
            mark_failed(
                &self.db,
                &row.id,
                JobFailureCode::DISPATCH_FAILED,
                &e.to_string(),
            )
            .await?;
            return Err(VaultError::Unavailable(format!("job queue: {e}")));
        }

        info!(job_id = %row.id, viewer_id, "Enqueued watermark job");
        Ok(row)
    }

    pub async fn find(&self, job_id: &str) -> Result<Option<watermark_job::Model>, VaultError> {
        Ok(watermark_job::Entity::find_by_id(job_id).one(&self.db).await?)
    }

    pub async fn status(&self, job_id: &str) -> Result<JobStatus, VaultError> {
        self.find(job_id)
            .await?
            .map(|job| job.status)
            .ok_or_else(|| VaultError::NotFound(format!("Job {job_id} not found")))
    }
}

fn predecessors(next: JobStatus) -> Vec<JobStatus> {
    next.predecessors().to_vec()
}

/// `queued|active -> active`, recording the attempt number.
pub async fn mark_active<C: ConnectionTrait>(
    conn: &C,
    job_id: &str,
    attempt: u32,
) -> Result<bool, VaultError> {
    let result = watermark_job::Entity::update_many()
        .col_expr(watermark_job::Column::Status, Expr::value(JobStatus::Active))
        .col_expr(watermark_job::Column::Attempts, Expr::value(attempt as i32))
        .col_expr(watermark_job::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(watermark_job::Column::Id.eq(job_id))
        .filter(watermark_job::Column::Status.is_in(predecessors(JobStatus::Active)))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// `queued|active -> completed`. Returns `true` only for the caller whose
/// update took effect; a job completes once.
pub async fn mark_completed<C: ConnectionTrait>(
    conn: &C,
    job_id: &str,
    artifact: &ProcessedArtifact,
    attempts: u32,
) -> Result<bool, VaultError> {
    let result = watermark_job::Entity::update_many()
        .col_expr(watermark_job::Column::Status, Expr::value(JobStatus::Completed))
        .col_expr(watermark_job::Column::Attempts, Expr::value(attempts as i32))
        .col_expr(
            watermark_job::Column::ArtifactHash,
            Expr::value(Some(artifact.hash.to_hex())),
        )
        .col_expr(
            watermark_job::Column::ArtifactContentType,
            Expr::value(Some(artifact.content_type.clone())),
        )
        .col_expr(
            watermark_job::Column::ArtifactSize,
            Expr::value(Some(artifact.size as i64)),
        )
        .col_expr(watermark_job::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(watermark_job::Column::Id.eq(job_id))
        .filter(watermark_job::Column::Status.is_in(predecessors(JobStatus::Completed)))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// `queued|active -> failed`.
pub async fn mark_failed<C: ConnectionTrait>(
    conn: &C,
    job_id: &str,
    code: &str,
    message: &str,
) -> Result<bool, VaultError> {
    let result = watermark_job::Entity::update_many()
        .col_expr(watermark_job::Column::Status, Expr::value(JobStatus::Failed))
        .col_expr(watermark_job::Column::ErrorCode, Expr::value(Some(code.to_string())))
        .col_expr(
            watermark_job::Column::ErrorMessage,
            Expr::value(Some(message.to_string())),
        )
        .col_expr(watermark_job::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(watermark_job::Column::Id.eq(job_id))
        .filter(watermark_job::Column::Status.is_in(predecessors(JobStatus::Failed)))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Newest queued or active job for (viewer, item).
/// Jobs not yet finished, split by whether a runner has picked them up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepth {
    pub waiting: u64,
    pub active: u64,
}

impl QueueDepth {
    pub fn total(&self) -> u64 {
        self.waiting + self.active
    }
}

pub async fn depth<C: ConnectionTrait>(conn: &C) -> Result<QueueDepth, VaultError> {
    let count = |status: JobStatus| {
        watermark_job::Entity::find()
            .filter(watermark_job::Column::Status.eq(status))
            .count(conn)
    };
    Ok(QueueDepth {
        waiting: count(JobStatus::Queued).await?,
        active: count(JobStatus::Active).await?,
    })
}

pub async fn find_unfinished<C: ConnectionTrait>(
    conn: &C,
    viewer_id: &str,
    item_id: &str,
) -> Result<Option<watermark_job::Model>, VaultError> {
    Ok(watermark_job::Entity::find()
        .filter(watermark_job::Column::ViewerId.eq(viewer_id))
        .filter(watermark_job::Column::ItemId.eq(item_id))
        .filter(watermark_job::Column::Status.is_in([JobStatus::Queued, JobStatus::Active]))
        .order_by_desc(watermark_job::Column::CreatedAt)
        .one(conn)
        .await?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::tests::memory_db;
    use common::MediaType;
    use common::storage::FilesystemBlobStore;

    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) jobs: std::sync::Mutex<Vec<WatermarkJob>>,
        pub(crate) refuse: bool,
    }

    #[async_trait]
    impl JobTransport for RecordingTransport {
        async fn dispatch(&self, job: &WatermarkJob) -> Result<(), MqError> {
            if self.refuse {
                return Err(MqError::Broker("connection refused".into()));
            }
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    pub(crate) async fn insert_item(db: &DatabaseConnection, bytes: &[u8]) -> media_item::Model {
        media_item::ActiveModel {
            id: Set(uuid::Uuid::now_v7().to_string()),
            content_hash: Set(ContentHash::compute(bytes).to_hex()),
            media_type: Set(MediaType::Image),
            content_type: Set("image/png".into()),
            filename: Set("a.png".into()),
            size_bytes: Set(bytes.len() as i64),
            storage_ref: Set(ContentHash::compute(bytes).to_hex()),
            community_id: Set("c".into()),
            channel_id: Set("ch".into()),
            author_id: Set("a".into()),
            announcement_ref: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await
        .unwrap()
    }

    async fn queue_with(
        db: &DatabaseConnection,
        transport: Arc<RecordingTransport>,
        dir: &std::path::Path,
    ) -> JobQueue {
        let store = Arc::new(FilesystemBlobStore::new(dir.to_path_buf(), 1 << 20).await.unwrap());
        JobQueue::new(db.clone(), transport, store, None)
    }

    fn artifact() -> ProcessedArtifact {
        ProcessedArtifact {
            hash: ContentHash::compute(b"out"),
            size: 3,
            content_type: "image/png".into(),
        }
    }

    #[tokio::test]
    async fn enqueue_writes_row_and_dispatches() {
        let db = memory_db().await;
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let queue = queue_with(&db, transport.clone(), dir.path()).await;
        let item = insert_item(&db, b"raw").await;

        let job = queue.enqueue(&item, "1234").await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(queue.status(&job.id).await.unwrap(), JobStatus::Queued);

        let sent = transport.jobs.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].job_id, job.id);
        assert!(sent[0].task.source_url().starts_with("file://"));
        let mark = watermark::decode(sent[0].task.watermark_text()).unwrap();
        assert_eq!(mark.viewer_id, "1234");
    }

    #[tokio::test]
    async fn refused_dispatch_fails_the_row() {
        let db = memory_db().await;
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport {
            refuse: true,
            ..Default::default()
        });
        let queue = queue_with(&db, transport, dir.path()).await;
        let item = insert_item(&db, b"raw").await;

        let err = queue.enqueue(&item, "1").await.unwrap_err();
        assert!(matches!(err, VaultError::Unavailable(_)));
        assert!(find_unfinished(&db, "1", &item.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn public_base_url_wins_over_locator() {
        let db = memory_db().await;
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FilesystemBlobStore::new(dir.path().to_path_buf(), 1 << 20).await.unwrap());
        let queue = JobQueue::new(
            db,
            Arc::new(RecordingTransport::default()),
            store,
            Some("https://vault.example/api/v1/objects/".into()),
        );
        let hash = ContentHash::compute(b"x");
        assert_eq!(
            queue.source_url(&hash).unwrap(),
            format!("https://vault.example/api/v1/objects/{hash}")
        );
    }

    #[tokio::test]
    async fn transitions_are_monotonic_and_complete_once() {
        let db = memory_db().await;
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&db, Arc::new(RecordingTransport::default()), dir.path()).await;
        let item = insert_item(&db, b"raw").await;
        let job = queue.enqueue(&item, "7").await.unwrap();

        assert!(mark_active(&db, &job.id, 1).await.unwrap());
        assert!(mark_active(&db, &job.id, 2).await.unwrap());
        assert!(mark_completed(&db, &job.id, &artifact(), 2).await.unwrap());
        assert!(!mark_completed(&db, &job.id, &artifact(), 2).await.unwrap());
        assert!(!mark_failed(&db, &job.id, "TIMEOUT", "late").await.unwrap());
        assert!(!mark_active(&db, &job.id, 3).await.unwrap());

        let row = queue.find(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Completed);
        assert_eq!(row.attempts, 2);
        assert_eq!(row.artifact_hash, Some(artifact().hash.to_hex()));
    }

    #[tokio::test]
    async fn depth_counts_waiting_and_active_jobs() {
        let db = memory_db().await;
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&db, Arc::new(RecordingTransport::default()), dir.path()).await;
        let item = insert_item(&db, b"raw").await;
        let a = queue.enqueue(&item, "1").await.unwrap();
        let b = queue.enqueue(&item, "2").await.unwrap();
        let c = queue.enqueue(&item, "3").await.unwrap();
        queue.enqueue(&item, "4").await.unwrap();

        mark_active(&db, &a.id, 1).await.unwrap();
        mark_active(&db, &b.id, 1).await.unwrap();
        mark_completed(&db, &b.id, &artifact(), 1).await.unwrap();
        mark_failed(&db, &c.id, "TIMEOUT", "slow").await.unwrap();

        let counts = depth(&db).await.unwrap();
        assert_eq!(counts, QueueDepth { waiting: 1, active: 1 });
        assert_eq!(counts.total(), 2);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let db = memory_db().await;
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&db, Arc::new(RecordingTransport::default()), dir.path()).await;
        assert!(matches!(queue.status("nope").await, Err(VaultError::NotFound(_))));
    }
}
