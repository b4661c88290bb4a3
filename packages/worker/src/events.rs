use async_trait::async_trait;
use common::{JobEvent, JobEventSink};
use mq::QueuePublisher;

/// Forwards job events to the server over the event queue.
pub struct MqEventSink {
    publisher: QueuePublisher,
}

impl MqEventSink {
    pub fn new(publisher: QueuePublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl JobEventSink for MqEventSink {
    async fn publish(&self, event: JobEvent) -> anyhow::Result<()> {
        self.publisher.publish(&event).await?;
        Ok(())
    }
}
