use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    #[error("Queue error: {0}")]
    Queue(#[from] common::mq::MqError),

    #[error("{0}")]
    Broker(String),
}

impl From<broccoli_queue::error::BroccoliError> for MqError {
    fn from(e: broccoli_queue::error::BroccoliError) -> Self {
        MqError::Broker(e.to_string())
    }
}
