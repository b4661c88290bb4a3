use std::fmt::Debug;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// A payload that travels on one of the queues.
pub trait Message: Serialize + DeserializeOwned + Debug + Send + Sync + Clone {
    fn message_type() -> &'static str
    where
        Self: Sized;

    /// Identity used for logging and dead-lettering. For watermark traffic
    /// this is the job id, which is stable across retries.
    fn message_id(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum MqError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish failed on {queue}: {reason}")]
    Publish { queue: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport closed")]
    Closed,
}
