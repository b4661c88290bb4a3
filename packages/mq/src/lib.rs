pub mod error;
pub mod models;
pub mod publisher;

pub use error::MqError;
pub use models::{BroccoliError, BrokerMessage, ConsumeOptions, MqBuilder, MqConfig, MqQueue, init_mq};
pub use publisher::QueuePublisher;

pub type Mq = MqQueue;
