use std::sync::Arc;

use common::WatermarkJob;
use mq::{BroccoliError, BrokerMessage, Mq};
use tracing::info;

use crate::models::runner::{JobOutcome, JobRunner};

/// Consume watermark jobs until the broker connection ends.
///
/// Failures are reported through job events rather than broker retries, so
/// every message is acknowledged once the runner is done with it.
pub async fn consume_jobs(
    mq: Arc<Mq>,
    runner: Arc<JobRunner>,
    queue: &str,
    concurrency: usize,
) -> Result<(), BroccoliError> {
    mq.process_messages(
        queue,
        Some(concurrency),
        None,
        move |message: BrokerMessage<WatermarkJob>| {
            let runner = Arc::clone(&runner);
            async move {
                let job = message.payload;
                info!(
                    job_id = %job.job_id,
                    item_id = %job.item_id,
                    media_type = %job.task.media_type(),
                    "Received watermark job"
                );
                match runner.run(&job).await {
                    JobOutcome::Completed { attempts, .. } => {
                        info!(job_id = %job.job_id, attempts, "Acknowledging completed job")
                    }
                    JobOutcome::Failed { code, attempts } => {
                        info!(job_id = %job.job_id, %code, attempts, "Acknowledging failed job")
                    }
                }
                Ok(())
            }
        },
    )
    .await
}
