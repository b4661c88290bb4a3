pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;

pub use config::{TransformOptions, WorkerAppConfig, WorkerConfig};
pub use error::{ProcessingError, Result, WorkerError};
pub use events::MqEventSink;
pub use handlers::task::{TASK_SUBCOMMAND, TaskMessage, TaskReply};
pub use models::{JobOutcome, JobRunner, ProcessBoundary, TaskBoundary, spawn_local_runner};
