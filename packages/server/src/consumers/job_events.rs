use std::sync::Arc;

use common::{JobEvent, JobEventSink};
use mq::{BroccoliError, BrokerMessage, Mq};
use tracing::{error, info};

use crate::notifier::CompletionNotifier;

/// Apply worker events from the event queue until the broker goes away.
///
/// A failure to apply an event is handed back to the broker so it is
/// redelivered; the notifier's conditional updates make replays harmless.
pub async fn consume_job_events(
    notifier: Arc<CompletionNotifier>,
    mq: Arc<Mq>,
    queue_name: String,
) {
    info!(queue = %queue_name, "Starting job event consumer");

    let result = mq
        .process_messages(
            &queue_name,
            None, // sequential, so one job's events apply in order
            None,
            move |message: BrokerMessage<JobEvent>| {
                let notifier = Arc::clone(&notifier);
                async move {
                    let event = message.payload;
                    let job_id = event.job_id().to_string();

                    if let Err(e) = notifier.publish(event).await {
                        error!(job_id = %job_id, error = %e, "Failed to apply job event");
                        return Err(BroccoliError::Job(e.to_string()));
                    }
                    Ok(())
                }
            },
        )
        .await;

    if let Err(e) = result {
        error!(error = %e, "Job event consumer stopped unexpectedly");
    }
}
