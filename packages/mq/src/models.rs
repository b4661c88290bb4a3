use broccoli_queue::queue::BroccoliQueueBuilder;
pub use broccoli_queue::{
    brokers::broker::BrokerMessage,
    error::BroccoliError,
    queue::{BroccoliQueue, ConsumeOptions},
};
use tracing::info;

use crate::error::MqError;

pub type MqQueue = BroccoliQueue;
pub type MqBuilder = BroccoliQueueBuilder;

pub struct MqConfig {
    pub url: String,
    pub pool_size: u8,
}

/// Connect to the broker. Called once by process bootstrap; the handle is
/// then passed to whatever needs to publish or consume.
pub async fn init_mq(config: MqConfig) -> Result<MqQueue, MqError> {
    let queue = BroccoliQueue::builder(&config.url)
        .pool_connections(config.pool_size)
        .build()
        .await?;
    info!(pool_size = config.pool_size, "Connected to queue broker");
    Ok(queue)
}
