//! Applies worker progress to job rows and announces finished artifacts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::retry::RetryAttempt;
use common::{
    DlqEnvelope, DlqErrorCode, FailureInfo, JobEvent, JobEventSink, ProcessedArtifact,
};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use crate::dlq::DlqService;
use crate::entity::{completed_job, watermark_job};
use crate::queue;

/// Body of an "artifact ready" notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadyNotice {
    pub item_id: String,
    pub completed_job_id: String,
    pub job_id: String,
    pub viewer_id: String,
}

/// Where ready notices go; the presentation layer flips its "processing"
/// message when it receives one.
#[async_trait]
pub trait ReadySink: Send + Sync {
    async fn notify(&self, notice: &ReadyNotice) -> anyhow::Result<()>;
}

pub struct LogSink;

#[async_trait]
impl ReadySink for LogSink {
    async fn notify(&self, notice: &ReadyNotice) -> anyhow::Result<()> {
        info!(
            item_id = %notice.item_id,
            completed_job_id = %notice.completed_job_id,
            viewer_id = %notice.viewer_id,
            "Artifact ready"
        );
        Ok(())
    }
}

/// POSTs each notice as JSON to a fixed URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReadySink for WebhookSink {
    async fn notify(&self, notice: &ReadyNotice) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(notice)
            .send()
            .await?
            .error_for_status()?;
        debug!(url = %self.url, job_id = %notice.job_id, "Delivered ready notice");
        Ok(())
    }
}

/// Consumer of [`JobEvent`]s on the server side.
///
/// Every transition is a conditional update, so replays and late events are
/// harmless: only the first `Completed` for a job creates its
/// [`completed_job`] row and sends a notice.
pub struct CompletionNotifier {
    db: DatabaseConnection,
    sink: Arc<dyn ReadySink>,
    finished: Arc<Notify>,
}

impl CompletionNotifier {
    pub fn new(db: DatabaseConnection, sink: Arc<dyn ReadySink>, finished: Arc<Notify>) -> Self {
        Self { db, sink, finished }
    }

    #[instrument(skip(self, artifact), fields(hash = %artifact.hash))]
    async fn on_completed(
        &self,
        job_id: &str,
        artifact: &ProcessedArtifact,
        attempts: u32,
    ) -> anyhow::Result<()> {
        let txn = self.db.begin().await?;
        if !queue::mark_completed(&txn, job_id, artifact, attempts).await? {
            txn.rollback().await?;
            info!("Ignoring completion of a job that already finished");
            return Ok(());
        }

        let job = watermark_job::Entity::find_by_id(job_id)
            .one(&txn)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {job_id} vanished during completion"))?;

        let link = completed_job::ActiveModel {
            id: Set(uuid::Uuid::now_v7().to_string()),
            job_id: Set(job.id.clone()),
            item_id: Set(job.item_id.clone()),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(completed_job_id = %link.id, item_id = %job.item_id, attempts, "Watermark job completed");
        self.finished.notify_waiters();

        let notice = ReadyNotice {
            item_id: job.item_id,
            completed_job_id: link.id,
            job_id: job.id,
            viewer_id: job.viewer_id,
        };
        // The artifact is ready either way; a lost notice only delays the
        // presentation layer until the viewer polls.
        if let Err(e) = self.sink.notify(&notice).await {
            warn!(error = %e, "Failed to deliver ready notice");
        }
        Ok(())
    }

    #[instrument(skip(self, error, retry_history), fields(code = %error.code))]
    async fn on_failed(
        &self,
        job_id: &str,
        error: &FailureInfo,
        retry_history: &[RetryAttempt],
    ) -> anyhow::Result<()> {
        let txn = self.db.begin().await?;
        if !queue::mark_failed(&txn, job_id, &error.code, &error.message).await? {
            txn.rollback().await?;
            info!("Ignoring failure of a job that already finished");
            return Ok(());
        }

        let job = watermark_job::Entity::find_by_id(job_id).one(&txn).await?;
        let error_code = if error.retryable {
            DlqErrorCode::MaxRetriesExceeded
        } else {
            DlqErrorCode::FatalError
        };
        let envelope = DlqEnvelope {
            message_id: job_id.to_string(),
            item_id: job.as_ref().map(|j| j.item_id.clone()),
            payload: serde_json::to_value(&job)?,
            error_code,
            error_message: error.message.clone(),
            retry_history: retry_history.to_vec(),
        };
        DlqService::new(&txn).send_to_dlq(&envelope).await?;
        txn.commit().await?;

        warn!(
            attempts = retry_history.len(),
            dlq_code = %error_code,
            "Watermark job failed terminally"
        );
        self.finished.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl JobEventSink for CompletionNotifier {
    async fn publish(&self, event: JobEvent) -> anyhow::Result<()> {
        match &event {
            JobEvent::Started { job_id, attempt } => {
                if !queue::mark_active(&self.db, job_id, *attempt).await? {
                    debug!(job_id = %job_id, attempt, "Started event for a finished job");
                }
                Ok(())
            }
            JobEvent::Completed {
                job_id,
                artifact,
                attempts,
            } => self.on_completed(job_id, artifact, *attempts).await,
            JobEvent::Failed {
                job_id,
                error,
                retry_history,
            } => self.on_failed(job_id, error, retry_history).await,
        }
    }
}
