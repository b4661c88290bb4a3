use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::retry::spawn_cleanup_task;
use common::storage::{BlobStore, FilesystemBlobStore};
use common::WatermarkJob;
use mq::{Mq, MqConfig, QueuePublisher, init_mq};
use server::config::AppConfig;
use server::consumers::consume_job_events;
use server::database::{ensure_indexes, init_db};
use server::dlq::run_stuck_job_detector;
use server::queue::{JobTransport, LocalTransport, MqTransport};
use server::state::AppState;
use tokio::sync::mpsc;
use tracing::info;
use worker::handlers::task;
use worker::{JobRunner, ProcessBoundary, spawn_local_runner};

/// Who executes watermark jobs for this server.
enum Execution {
    /// In-process runner fed by the local channel.
    Local(mpsc::Receiver<WatermarkJob>),
    /// `cams-worker` processes; their events arrive on the event queue.
    Remote(Arc<Mq>),
}

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

    let config = AppConfig::load().context("Failed to load config")?;

    let db = init_db(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    ensure_indexes(&db).await?;

    let store: Arc<dyn BlobStore> = Arc::new(
        FilesystemBlobStore::new(config.storage.root.clone(), config.storage.max_object_size)
            .await
            .context("Failed to open content store")?,
    );

    let (transport, execution): (Arc<dyn JobTransport>, Execution) = if config.mq.enabled {
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
            "MQ connected"
        );
        let publisher = QueuePublisher::new(Arc::clone(&mq), config.mq.queue_name.clone());
        (Arc::new(MqTransport::new(publisher)), Execution::Remote(mq))
    } else {
        let (tx, rx) = mpsc::channel(256);
        (Arc::new(LocalTransport::new(tx)), Execution::Local(rx))
    };

    let (state, notifier) =
        AppState::assemble(config.clone(), db.clone(), Arc::clone(&store), transport)?;

    match execution {
        Execution::Local(rx) => {
            let boundary = ProcessBoundary::from_config(&config.worker, Arc::clone(&store))
                .context("Failed to resolve task program")?;
            let runner = Arc::new(JobRunner::new(
                Arc::new(boundary),
                notifier,
                config.mq.retry,
            ));
            spawn_cleanup_task(
                runner.tracker(),
                Duration::from_secs(config.dlq.retry_cleanup_interval_secs),
                Duration::from_secs(config.dlq.retry_max_age_secs),
            );
            spawn_local_runner(rx, runner, config.worker.concurrency);
            info!(concurrency = config.worker.concurrency, "Running jobs in-process");
        }
        Execution::Remote(mq) => {
            tokio::spawn(consume_job_events(
                notifier,
                mq,
                config.mq.event_queue_name.clone(),
            ));
        }
    }

    tokio::spawn(run_stuck_job_detector(db, config.dlq.clone()));

    let app = server::build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server running at http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
