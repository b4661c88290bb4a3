//! Child side of the process boundary.
//!
//! The worker binary re-executes itself with [`TASK_SUBCOMMAND`]; the child
//! reads one [`TaskMessage`] from stdin, performs the transform and writes one
//! [`TaskReply`] line to stdout. Logs go to stderr so they never corrupt the
//! reply.

use std::path::PathBuf;

use anyhow::Context;
use common::{FailureInfo, WatermarkTask};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info};

use crate::config::TransformOptions;
use crate::error::ProcessingError;
use crate::models::{render, source, video};

pub const TASK_SUBCOMMAND: &str = "watermark-task";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task: WatermarkTask,
    /// Scratch directory owned by the dispatcher.
    pub work_dir: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub options: TransformOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
}

impl TaskReply {
    pub fn ok(content_type: impl Into<String>) -> Self {
        Self {
            success: true,
            content_type: Some(content_type.into()),
            error: None,
        }
    }

    pub fn failed(error: FailureInfo) -> Self {
        Self {
            success: false,
            content_type: None,
            error: Some(error),
        }
    }
}

pub fn is_task_invocation() -> bool {
    std::env::args().nth(1).as_deref() == Some(TASK_SUBCOMMAND)
}

/// Perform one transform; returns the content type of `msg.output_path`.
pub async fn execute(msg: &TaskMessage) -> Result<&'static str, ProcessingError> {
    match &msg.task {
        WatermarkTask::Image {
            source_url,
            watermark_text,
        } => {
            let input = msg.work_dir.join("source");
            source::fetch(source_url, &input, &msg.options.download).await?;

            let output = msg.output_path.clone();
            let text = watermark_text.clone();
            let placement = msg.options.emphasis;
            let (width, height) = tokio::task::spawn_blocking(move || {
                render::watermark_image_file(&input, &output, &text, placement)
            })
            .await
            .map_err(|e| ProcessingError::Io(std::io::Error::other(e)))??;
            info!(width, height, "Image watermarked");
            Ok("image/png")
        }
        WatermarkTask::Video {
            source_url,
            watermark_text,
        } => {
            let input = msg.work_dir.join("source");
            source::fetch(source_url, &input, &msg.options.download).await?;
            let dims = video::watermark_video(
                &input,
                &msg.output_path,
                watermark_text,
                &msg.options,
                &msg.work_dir,
            )
            .await?;
            info!(width = dims.width, height = dims.height, "Video watermarked");
            Ok("video/mp4")
        }
    }
}

/// Entry point of the child process.
pub async fn run_stdio() -> anyhow::Result<()> {
    let mut raw = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut raw)
        .await
        .context("Failed to read task message")?;

    let reply = match serde_json::from_slice::<TaskMessage>(&raw) {
        Ok(msg) => match execute(&msg).await {
            Ok(content_type) => TaskReply::ok(content_type),
            Err(e) => {
                error!(code = e.code(), error = %e, "Task failed");
                TaskReply::failed(e.to_failure_info())
            }
        },
        Err(e) => TaskReply::failed(FailureInfo {
            code: "PROTOCOL_ERROR".into(),
            message: format!("invalid task message: {e}"),
            retryable: false,
        }),
    };

    let mut line = serde_json::to_vec(&reply)?;
    line.push(b'\n');
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}
