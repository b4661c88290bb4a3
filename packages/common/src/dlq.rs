use serde::{Deserialize, Serialize};

use crate::retry::RetryAttempt;

/// Error codes written to `watermark_job.error_code` by the server itself.
pub struct JobFailureCode;

impl JobFailureCode {
    /// Job sat in queued/active longer than the stuck-job timeout.
    pub const STUCK_JOB: &'static str = "STUCK_JOB";
    /// The job row was written but the transport refused the message.
    pub const DISPATCH_FAILED: &'static str = "DISPATCH_FAILED";
}

/// Why a message ended up in the dead-letter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DlqErrorCode {
    MaxRetriesExceeded,
    /// A non-retryable failure such as a missing transcoder binary.
    FatalError,
    StuckJob,
}

impl DlqErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            Self::FatalError => "FATAL_ERROR",
            Self::StuckJob => "STUCK_JOB",
        }
    }
}

impl std::fmt::Display for DlqErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminally failed job as handed to the dead-letter store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEnvelope {
    /// The job id.
    pub message_id: String,
    pub item_id: Option<String>,
    pub payload: serde_json::Value,
    pub error_code: DlqErrorCode,
    pub error_message: String,
    pub retry_history: Vec<RetryAttempt>,
}
