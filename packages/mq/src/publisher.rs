use std::sync::Arc;

use common::mq::Message;
use tracing::debug;

use crate::error::MqError;
use crate::models::MqQueue;

/// Typed publisher bound to one queue name.
#[derive(Clone)]
pub struct QueuePublisher {
    mq: Arc<MqQueue>,
    queue: String,
}

impl QueuePublisher {
    pub fn new(mq: Arc<MqQueue>, queue: impl Into<String>) -> Self {
        Self {
            mq,
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub async fn publish<M: Message + 'static>(&self, message: &M) -> Result<(), MqError> {
        self.mq
            .publish(&self.queue, None, message, None)
            .await
            .map_err(|e| {
                MqError::Queue(common::mq::MqError::Publish {
                    queue: self.queue.clone(),
                    reason: e.to_string(),
                })
            })?;
        debug!(
            queue = %self.queue,
            message_type = M::message_type(),
            message_id = %message.message_id(),
            "Published message"
        );
        Ok(())
    }
}
