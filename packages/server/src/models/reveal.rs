use common::AccessKind;
use serde::{Deserialize, Serialize};

use crate::reveal::RevealOutcome;

#[derive(Debug, Deserialize)]
pub struct RevealRequest {
    pub viewer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct JobPollQuery {
    pub viewer_id: String,
}

/// Reveal and poll responses share one shape, tagged by `status`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RevealResponse {
    Ready {
        access_log_id: String,
        access_kind: AccessKind,
        /// Where to download the watermarked artifact.
        content_url: String,
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

impl From<RevealOutcome> for RevealResponse {
    fn from(outcome: RevealOutcome) -> Self {
        match outcome {
            RevealOutcome::Ready {
                access_log_id,
                access_kind,
                ..
            } => Self::Ready {
                content_url: format!("/api/v1/reveals/{access_log_id}/content"),
                access_log_id,
                access_kind,
            },
            RevealOutcome::Processing { job_id } => Self::Processing { job_id },
            RevealOutcome::Failed {
                job_id,
                code,
                message,
            } => Self::Failed {
                job_id,
                code,
                message,
            },
        }
    }
}
