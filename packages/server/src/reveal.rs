//! Reveal flow: the gate's decision plus job creation, polling and artifact
//! retrieval, serialized per (viewer, item).

use std::sync::Arc;
use std::time::Duration;

use common::storage::{BlobStore, BoxReader, ContentHash};
use common::{AccessKind, JobStatus};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

use crate::entity::{access_log, completed_job, media_item, watermark_job};
use crate::error::VaultError;
use crate::gate::{self, RevealDecision};
use crate::ingest::find_item;
use crate::locks::{KeyedLocks, reveal_key};
use crate::queue::{self, JobQueue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealOutcome {
    /// The viewer may download the artifact behind `access_log_id`.
    Ready {
        access_log_id: String,
        access_kind: AccessKind,
        completed_job_id: String,
    },
    Processing {
        job_id: String,
    },
    Failed {
        job_id: String,
        code: String,
        message: String,
    },
}

/// A processed artifact opened for streaming.
pub struct Artifact {
    pub reader: BoxReader,
    pub content_type: String,
    pub filename: String,
    pub size: u64,
}

pub struct RevealService {
    db: DatabaseConnection,
    store: Arc<dyn BlobStore>,
    queue: JobQueue,
    locks: KeyedLocks,
    window: chrono::Duration,
    poll_cooldown: Duration,
    finished: Arc<Notify>,
}

impl RevealService {
    pub fn new(
        db: DatabaseConnection,
        store: Arc<dyn BlobStore>,
        queue: JobQueue,
        window: chrono::Duration,
        poll_cooldown: Duration,
        finished: Arc<Notify>,
    ) -> Self {
        Self {
            db,
            store,
            queue,
            locks: KeyedLocks::new(),
            window,
            poll_cooldown,
            finished,
        }
    }

    #[instrument(skip(self))]
    pub async fn request_reveal(
        &self,
        viewer_id: &str,
        item_id: &str,
    ) -> Result<RevealOutcome, VaultError> {
        let item = find_item(&self.db, item_id).await?;
        let _guard = self.locks.lock(reveal_key(viewer_id, item_id)).await;

        let latest = gate::latest_entry(&self.db, viewer_id, item_id).await?;
        let now = chrono::Utc::now();
        if let RevealDecision::ReuseExisting { completed_job_id } =
            gate::decide(latest.as_slice(), now, self.window)
        {
            let entry = gate::record_reveal(
                &self.db,
                viewer_id,
                item_id,
                &completed_job_id,
                AccessKind::RepeatView,
            )
            .await?;
            return Ok(ready(entry));
        }

        if let Some(link) = self.unclaimed_completion(viewer_id, item_id, now).await? {
            let entry = gate::record_reveal(
                &self.db,
                viewer_id,
                item_id,
                &link.id,
                AccessKind::FirstView,
            )
            .await?;
            return Ok(ready(entry));
        }

        if let Some(job) = queue::find_unfinished(&self.db, viewer_id, item_id).await? {
            info!(job_id = %job.id, "Reveal already in progress");
            return Ok(RevealOutcome::Processing { job_id: job.id });
        }

        let job = self.queue.enqueue(&item, viewer_id).await?;
        Ok(RevealOutcome::Processing { job_id: job.id })
    }

    /// A completed job for (viewer, item) whose artifact the viewer has not
    /// picked up yet. The mark must still be inside the freshness window,
    /// measured from when its job was created.
    async fn unclaimed_completion(
        &self,
        viewer_id: &str,
        item_id: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<completed_job::Model>, VaultError> {
        let Some(job) = watermark_job::Entity::find()
            .filter(watermark_job::Column::ViewerId.eq(viewer_id))
            .filter(watermark_job::Column::ItemId.eq(item_id))
            .filter(watermark_job::Column::Status.eq(JobStatus::Completed))
            .order_by_desc(watermark_job::Column::UpdatedAt)
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let Some(link) = completed_job::Entity::find()
            .filter(completed_job::Column::JobId.eq(job.id.clone()))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let issued_at = job.created_at.min(link.created_at);
        if now - issued_at >= self.window {
            info!(job_id = %job.id, %issued_at, "Unclaimed artifact is stale, reprocessing");
            return Ok(None);
        }

        let claimed = access_log::Entity::find()
            .filter(access_log::Column::CompletedJobId.eq(link.id.clone()))
            .filter(access_log::Column::ViewerId.eq(viewer_id))
            .count(&self.db)
            .await?;
        Ok((claimed == 0).then_some(link))
    }

    /// Wait up to the poll cooldown for `job_id` to finish.
    ///
    /// A finished job is turned into a `first_view` on the first poll; later
    /// polls return the same entry.
    #[instrument(skip(self))]
    pub async fn poll_job(&self, job_id: &str, viewer_id: &str) -> Result<RevealOutcome, VaultError> {
        let deadline = tokio::time::Instant::now() + self.poll_cooldown;

        let job = loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let job = self
                .queue
                .find(job_id)
                .await?
                .filter(|j| j.viewer_id == viewer_id)
                .ok_or_else(|| VaultError::NotFound(format!("Job {job_id} not found")))?;

            if job.status.is_final() {
                break job;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(RevealOutcome::Processing { job_id: job.id });
            }
        };

        match job.status {
            JobStatus::Failed => Ok(RevealOutcome::Failed {
                job_id: job.id,
                code: job.error_code.unwrap_or_default(),
                message: job.error_message.unwrap_or_default(),
            }),
            _ => self.claim_completed(&job).await,
        }
    }

    async fn claim_completed(&self, job: &watermark_job::Model) -> Result<RevealOutcome, VaultError> {
        let _guard = self.locks.lock(reveal_key(&job.viewer_id, &job.item_id)).await;

        let link = completed_job::Entity::find()
            .filter(completed_job::Column::JobId.eq(job.id.clone()))
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                warn!(job_id = %job.id, "Completed job has no completion record");
                VaultError::NotFound(format!("Result of job {} not found", job.id))
            })?;

        let existing = access_log::Entity::find()
            .filter(access_log::Column::CompletedJobId.eq(link.id.clone()))
            .filter(access_log::Column::ViewerId.eq(job.viewer_id.clone()))
            .order_by_desc(access_log::Column::CreatedAt)
            .one(&self.db)
            .await?;
        if let Some(entry) = existing {
            return Ok(ready(entry));
        }

        let entry = gate::record_reveal(
            &self.db,
            &job.viewer_id,
            &job.item_id,
            &link.id,
            AccessKind::FirstView,
        )
        .await?;
        Ok(ready(entry))
    }

    /// Open the artifact a reveal refers to.
    #[instrument(skip(self))]
    pub async fn open_artifact(&self, access_log_id: &str) -> Result<Artifact, VaultError> {
        let not_found = || VaultError::NotFound(format!("Reveal {access_log_id} not found"));

        let entry = access_log::Entity::find_by_id(access_log_id)
            .one(&self.db)
            .await?
            .ok_or_else(not_found)?;

        let job = completed_job::Entity::find_by_id(entry.completed_job_id.clone())
            .one(&self.db)
            .await?;
        let job = match job {
            Some(link) => watermark_job::Entity::find_by_id(link.job_id).one(&self.db).await?,
            None => None,
        };
        let Some((hash, content_type)) = job.and_then(|j| j.artifact_hash.zip(j.artifact_content_type))
        else {
            warn!(
                access_log_id,
                completed_job_id = %entry.completed_job_id,
                "Reveal points at a job without an artifact"
            );
            return Err(not_found());
        };

        let hash = ContentHash::from_hex(&hash)?;
        let size = self.store.size(&hash).await?;
        let reader = self.store.get_stream(&hash).await?;
        Ok(Artifact {
            reader,
            filename: format!("{}.{}", entry.id, extension_for(&content_type)),
            content_type,
            size,
        })
    }

    /// Raw stored bytes of an item, for workers fetching over HTTP.
    pub async fn open_object(&self, hash: &str) -> Result<(BoxReader, u64), VaultError> {
        let hash = ContentHash::from_hex(hash)
            .map_err(|_| VaultError::NotFound(format!("Object {hash} not found")))?;
        let referenced = media_item::Entity::find()
            .filter(media_item::Column::StorageRef.eq(hash.to_hex()))
            .count(&self.db)
            .await?;
        if referenced == 0 {
            return Err(VaultError::NotFound(format!("Object {hash} not found")));
        }
        let size = self.store.size(&hash).await?;
        Ok((self.store.get_stream(&hash).await?, size))
    }
}

fn ready(entry: access_log::Model) -> RevealOutcome {
    RevealOutcome::Ready {
        access_log_id: entry.id,
        access_kind: entry.access_kind,
        completed_job_id: entry.completed_job_id,
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "video/mp4" => "mp4",
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|exts| exts.first().copied())
            .unwrap_or("bin"),
    }
}
