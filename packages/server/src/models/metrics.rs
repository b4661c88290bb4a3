use serde::{Deserialize, Serialize};

use crate::queue::QueueDepth;

/// Watermark jobs still in flight.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueueMetricsResponse {
    /// Queued, not yet picked up by a runner.
    pub waiting_count: u64,
    pub active_count: u64,
    pub total: u64,
}

impl From<QueueDepth> for QueueMetricsResponse {
    fn from(depth: QueueDepth) -> Self {
        Self {
            waiting_count: depth.waiting,
            active_count: depth.active,
            total: depth.total(),
        }
    }
}
