use std::sync::Arc;
use std::time::Duration;

use common::storage::BlobStore;
use sea_orm::DatabaseConnection;
use tokio::sync::Notify;

use crate::config::AppConfig;
use crate::notifier::{CompletionNotifier, LogSink, ReadySink, WebhookSink};
use crate::queue::{JobQueue, JobTransport};
use crate::reveal::RevealService;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn BlobStore>,
    pub reveals: Arc<RevealService>,
}

impl AppState {
    /// Wire the services around one job transport. The returned notifier
    /// must receive every job event for this deployment.
    pub fn assemble(
        config: AppConfig,
        db: DatabaseConnection,
        store: Arc<dyn BlobStore>,
        transport: Arc<dyn JobTransport>,
    ) -> anyhow::Result<(Self, Arc<CompletionNotifier>)> {
        let sink: Arc<dyn ReadySink> = match &config.notifier.webhook_url {
            Some(url) => Arc::new(WebhookSink::new(url.clone())?),
            None => Arc::new(LogSink),
        };
        let finished = Arc::new(Notify::new());
        let notifier = Arc::new(CompletionNotifier::new(
            db.clone(),
            sink,
            Arc::clone(&finished),
        ));

        let queue = JobQueue::new(
            db.clone(),
            transport,
            Arc::clone(&store),
            config.storage.public_base_url.clone(),
        );
        let reveals = Arc::new(RevealService::new(
            db.clone(),
            Arc::clone(&store),
            queue,
            config.vault.freshness_window(),
            Duration::from_secs(config.vault.poll_cooldown_secs),
            finished,
        ));

        let state = Self {
            db,
            config: Arc::new(config),
            store,
            reveals,
        };
        Ok((state, notifier))
    }
}
