use std::time::Duration;

use common::FailureInfo;
use common::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("MQ error: {0}")]
    Mq(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<mq::MqError> for WorkerError {
    fn from(e: mq::MqError) -> Self {
        WorkerError::Mq(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;

/// Why one attempt at a watermark task failed.
///
/// The variants keep the three transcoder failure modes apart (binary missing,
/// binary failed, metadata unparseable) even though callers only ever see
/// "processing failed".
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("{tool} is not installed or not executable: {detail}")]
    ToolMissing { tool: String, detail: String },

    #[error("{tool} failed with {status}: {stderr_tail}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr_tail: String,
    },

    #[error("could not determine frame dimensions: {0}")]
    Dimensions(String),

    #[error("could not decode source image: {0}")]
    Decode(String),

    #[error("task process exited without a result ({status}): {stderr_tail}")]
    WorkerCrash { status: String, stderr_tail: String },

    #[error("task exceeded {0:?}")]
    Timeout(Duration),

    /// The task process answered, but not with a valid reply.
    #[error("malformed task reply: {0}")]
    Protocol(String),

    /// Failure reported by the task process itself.
    #[error("{}: {}", .0.code, .0.message)]
    Reported(FailureInfo),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessingError {
    pub fn code(&self) -> &str {
        match self {
            Self::Download(_) => "DOWNLOAD_ERROR",
            Self::ToolMissing { .. } => "TOOL_MISSING",
            Self::ToolFailed { .. } => "TOOL_FAILED",
            Self::Dimensions(_) => "DIMENSIONS_UNPARSEABLE",
            Self::Decode(_) => "DECODE_ERROR",
            Self::WorkerCrash { .. } => "WORKER_CRASH",
            Self::Timeout(_) => "TIMEOUT",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Reported(info) => &info.code,
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the job queue should try the same job again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ToolMissing { .. } | Self::Decode(_) => false,
            Self::Reported(info) => info.retryable,
            Self::Storage(e) => e.is_transient(),
            _ => true,
        }
    }

    pub fn to_failure_info(&self) -> FailureInfo {
        match self {
            Self::Reported(info) => info.clone(),
            other => FailureInfo {
                code: other.code().to_string(),
                message: other.to_string(),
                retryable: other.is_retryable(),
            },
        }
    }
}
