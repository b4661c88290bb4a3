use std::path::PathBuf;

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Queue transport settings shared by the server and `cams-worker`.
#[derive(Debug, Deserialize, Clone)]
pub struct MqAppConfig {
    /// Use the Redis-backed queue. When false the server runs jobs itself
    /// through an in-process channel. Default: false.
    /// Note: `cams-worker` ignores this field (it always consumes from Redis).
    #[serde(default = "default_mq_enabled")]
    pub enabled: bool,
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Server publishes `WatermarkJob`s here. Default: "watermark_jobs".
    #[serde(default = "default_mq_queue_name")]
    pub queue_name: String,
    /// Workers publish `JobEvent`s here. Default: "watermark_events".
    #[serde(default = "default_mq_event_queue_name")]
    pub event_queue_name: String,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_mq_enabled() -> bool {
    false
}
fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_mq_queue_name() -> String {
    "watermark_jobs".into()
}
fn default_mq_event_queue_name() -> String {
    "watermark_events".into()
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            enabled: default_mq_enabled(),
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            queue_name: default_mq_queue_name(),
            event_queue_name: default_mq_event_queue_name(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Content store location.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root of the object tree. Default: "./data/objects".
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Hard ceiling for one stored object. Default: 1 GiB.
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,
    /// Prefix for source URLs handed to remote workers that do not share the
    /// volume, e.g. "https://cams.internal/objects". When unset, workers are
    /// given `file://` URLs.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/objects")
}
fn default_max_object_size() -> u64 {
    1024 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            max_object_size: default_max_object_size(),
            public_base_url: None,
        }
    }
}

/// Dead-letter and stuck-job settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DlqConfig {
    /// Jobs queued or active for longer than this are failed. Default: 1800.
    #[serde(default = "default_stuck_job_timeout_secs")]
    pub stuck_job_timeout_secs: u64,
    /// Default: 60.
    #[serde(default = "default_stuck_job_scan_interval_secs")]
    pub stuck_job_scan_interval_secs: u64,
    /// Default: 300.
    #[serde(default = "default_retry_cleanup_interval_secs")]
    pub retry_cleanup_interval_secs: u64,
    /// Default: 3600.
    #[serde(default = "default_retry_max_age_secs")]
    pub retry_max_age_secs: u64,
}

fn default_stuck_job_timeout_secs() -> u64 {
    1800
}
fn default_stuck_job_scan_interval_secs() -> u64 {
    60
}
fn default_retry_cleanup_interval_secs() -> u64 {
    300
}
fn default_retry_max_age_secs() -> u64 {
    3600
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            stuck_job_timeout_secs: default_stuck_job_timeout_secs(),
            stuck_job_scan_interval_secs: default_stuck_job_scan_interval_secs(),
            retry_cleanup_interval_secs: default_retry_cleanup_interval_secs(),
            retry_max_age_secs: default_retry_max_age_secs(),
        }
    }
}
