use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::retry::spawn_cleanup_task;
use common::storage::{BlobStore, FilesystemBlobStore};
use mq::{MqConfig, QueuePublisher, init_mq};
use tracing::{error, info};
use worker::config::WorkerAppConfig;
use worker::handlers::{job::consume_jobs, task};
use worker::{JobRunner, MqEventSink, ProcessBoundary};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if task::is_task_invocation() {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
        return task::run_stdio().await;
    }

    tracing_subscriber::fmt().with_target(false).init();

    let config = WorkerAppConfig::load().context("Failed to load config")?;
    info!(worker_id = %config.worker.id, "Worker starting");

    let mq = Arc::new(
        init_mq(MqConfig {
            url: config.mq.url.clone(),
            pool_size: config.mq.pool_size,
        })
        .await
        .context("Failed to initialize MQ")?,
    );
    info!(
        queue_name = %config.mq.queue_name,
        event_queue_name = %config.mq.event_queue_name,
        max_attempts = config.mq.retry.max_attempts,
        "MQ connected"
    );

    let store: Arc<dyn BlobStore> = Arc::new(
        FilesystemBlobStore::new(
            config.storage.root.clone(),
            config.storage.max_object_size,
        )
        .await
        .context("Failed to open content store")?,
    );

    let boundary = ProcessBoundary::from_config(&config.worker, store)
        .context("Failed to resolve task program")?;
    let events = MqEventSink::new(QueuePublisher::new(
        Arc::clone(&mq),
        config.mq.event_queue_name.clone(),
    ));
    let runner = Arc::new(JobRunner::new(
        Arc::new(boundary),
        Arc::new(events),
        config.mq.retry,
    ));

    // Runs until process exit.
    let _cleanup_handle = spawn_cleanup_task(
        runner.tracker(),
        Duration::from_secs(config.dlq.retry_cleanup_interval_secs),
        Duration::from_secs(config.dlq.retry_max_age_secs),
    );

    if let Err(e) = consume_jobs(
        mq,
        runner,
        &config.mq.queue_name,
        config.worker.concurrency,
    )
    .await
    {
        error!(error = %e, "Worker stopped unexpectedly");
    }

    Ok(())
}
