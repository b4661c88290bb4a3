use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::job_status::MediaType;
use crate::mq::Message;
use crate::retry::RetryAttempt;
use crate::storage::ContentHash;

/// One transform for the watermark worker, dispatched exhaustively on `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatermarkTask {
    Image {
        source_url: String,
        watermark_text: String,
    },
    Video {
        source_url: String,
        watermark_text: String,
    },
}

impl WatermarkTask {
    pub fn new(media_type: MediaType, source_url: String, watermark_text: String) -> Self {
        match media_type {
            MediaType::Image => Self::Image {
                source_url,
                watermark_text,
            },
            MediaType::Video => Self::Video {
                source_url,
                watermark_text,
            },
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            Self::Image { .. } => MediaType::Image,
            Self::Video { .. } => MediaType::Video,
        }
    }

    pub fn source_url(&self) -> &str {
        match self {
            Self::Image { source_url, .. } | Self::Video { source_url, .. } => source_url,
        }
    }

    pub fn watermark_text(&self) -> &str {
        match self {
            Self::Image { watermark_text, .. } | Self::Video { watermark_text, .. } => {
                watermark_text
            }
        }
    }
}

/// Queue message: render `task` for `viewer_id` as job `job_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkJob {
    pub job_id: String,
    pub item_id: String,
    pub viewer_id: String,
    pub task: WatermarkTask,
}

impl Message for WatermarkJob {
    fn message_type() -> &'static str {
        "watermark_job"
    }

    fn message_id(&self) -> &str {
        &self.job_id
    }
}

/// A watermarked output committed to the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedArtifact {
    pub hash: ContentHash,
    pub size: u64,
    pub content_type: String,
}

/// Why the last attempt of a job failed, in transportable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Stable code, e.g. `TOOL_MISSING`, `DIMENSIONS_UNPARSEABLE`.
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Progress reported by whoever executes a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Started {
        job_id: String,
        attempt: u32,
    },
    Completed {
        job_id: String,
        artifact: ProcessedArtifact,
        attempts: u32,
    },
    Failed {
        job_id: String,
        error: FailureInfo,
        retry_history: Vec<RetryAttempt>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Started { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. } => job_id,
        }
    }
}

impl Message for JobEvent {
    fn message_type() -> &'static str {
        "job_event"
    }

    fn message_id(&self) -> &str {
        self.job_id()
    }
}

/// Receives job progress. The server's completion notifier is the real
/// consumer; workers forward events to it over the event queue.
#[async_trait]
pub trait JobEventSink: Send + Sync {
    async fn publish(&self, event: JobEvent) -> Result<()>;
}
