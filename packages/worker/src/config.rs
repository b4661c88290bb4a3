use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

pub use common::config::{DlqConfig, MqAppConfig, StorageConfig};

use crate::models::render::EmphasisPlacement;
use crate::models::video::VideoStrategy;

/// How sources are fetched into a task directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Default: 5.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Default: 300.
    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,
    /// Default: 1 GiB.
    #[serde(default = "default_download_max_bytes")]
    pub max_bytes: u64,
}

fn default_max_redirects() -> usize {
    5
}
fn default_download_timeout_secs() -> u64 {
    300
}
fn default_download_max_bytes() -> u64 {
    1024 * 1024 * 1024
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_redirects: default_max_redirects(),
            timeout_secs: default_download_timeout_secs(),
            max_bytes: default_download_max_bytes(),
        }
    }
}

/// Transcoder invocation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoOptions {
    #[serde(default)]
    pub strategy: VideoStrategy,
    /// Default: "ffmpeg".
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    /// Default: "ffprobe".
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: String,
    /// x264 preset. Default: "fast".
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Default: 23.
    #[serde(default = "default_crf")]
    pub crf: u8,
    /// Cells per side for the `draw_text` strategy. Default: 4.
    #[serde(default = "default_grid")]
    pub grid: u32,
    /// Let the emphasis mark drift over time (`draw_text` only). Default: false.
    #[serde(default)]
    pub animate_emphasis: bool,
    /// Encoder thread cap; unset lets ffmpeg decide.
    #[serde(default)]
    pub threads: Option<u32>,
    /// Trailing stderr kept on failure. Default: 500.
    #[serde(default = "default_diag_tail_bytes")]
    pub diag_tail_bytes: usize,
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".into()
}
fn default_ffprobe_bin() -> String {
    "ffprobe".into()
}
fn default_preset() -> String {
    "fast".into()
}
fn default_crf() -> u8 {
    23
}
fn default_grid() -> u32 {
    4
}
fn default_diag_tail_bytes() -> usize {
    500
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            strategy: VideoStrategy::default(),
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
            preset: default_preset(),
            crf: default_crf(),
            grid: default_grid(),
            animate_emphasis: false,
            threads: None,
            diag_tail_bytes: default_diag_tail_bytes(),
        }
    }
}

/// Everything the task process needs besides the task itself. Sent with each
/// task so the child never reads configuration on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOptions {
    #[serde(default)]
    pub emphasis: EmphasisPlacement,
    #[serde(default)]
    pub video: VideoOptions,
    #[serde(default)]
    pub download: DownloadOptions,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Default: "worker-1".
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Jobs executed in parallel. Default: 2.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Wall-clock limit per attempt. Default: 600.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Parent of the per-task scratch directories. Default: `$TMPDIR/cams`.
    #[serde(default)]
    pub temp_root: Option<PathBuf>,
    /// Executable started for each task. Default: the running binary.
    #[serde(default)]
    pub task_program: Option<PathBuf>,
    #[serde(default)]
    pub transform: TransformOptions,
}

fn default_worker_id() -> String {
    "worker-1".into()
}
fn default_concurrency() -> usize {
    2
}
fn default_task_timeout_secs() -> u64 {
    600
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            concurrency: default_concurrency(),
            task_timeout_secs: default_task_timeout_secs(),
            temp_root: None,
            task_program: None,
            transform: TransformOptions::default(),
        }
    }
}

impl WorkerConfig {
    pub fn temp_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("cams"))
    }
}

/// `cams-worker` configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dlq: DlqConfig,
}

impl WorkerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CAMS_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("worker.id", "worker-1")?
            .set_default("worker.concurrency", 2_i64)?
            .set_default("mq.url", "redis://localhost:6379")?
            .set_default("mq.queue_name", "watermark_jobs")?
            .set_default("mq.event_queue_name", "watermark_events")?
            .add_source(File::with_name(&config_path).required(false))
            // e.g. CAMS__WORKER__TRANSFORM__VIDEO__FFMPEG_BIN=/opt/ffmpeg/bin/ffmpeg
            .add_source(Environment::with_prefix("CAMS").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
