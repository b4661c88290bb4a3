pub mod config;
pub mod dlq;
pub mod job_status;
pub mod mq;
pub mod retry;
pub mod storage;
pub mod watermark;
pub mod worker;

pub use config::{DlqConfig, MqAppConfig, StorageConfig};
pub use dlq::{DlqEnvelope, DlqErrorCode, JobFailureCode};
pub use job_status::{AccessKind, JobStatus, MediaType};
pub use worker::{
    FailureInfo, JobEvent, JobEventSink, ProcessedArtifact, WatermarkJob, WatermarkTask,
};
