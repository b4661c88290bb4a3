use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::storage::BlobStore;
use common::{ProcessedArtifact, WatermarkTask};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{TransformOptions, WorkerConfig};
use crate::error::ProcessingError;
use crate::handlers::task::{TASK_SUBCOMMAND, TaskMessage, TaskReply};
use crate::models::video::{describe_status, tail};

const REPLY_LIMIT: u64 = 64 * 1024;

/// Name of the artifact file inside a task directory. Extension-less, so
/// writers must name the output format explicitly.
pub const OUTPUT_FILE: &str = "output";

/// Runs one watermark task somewhere the caller's process cannot be hurt by it.
#[async_trait]
pub trait TaskBoundary: Send + Sync {
    async fn run(
        &self,
        job_id: &str,
        task: &WatermarkTask,
    ) -> Result<ProcessedArtifact, ProcessingError>;
}

/// Per-invocation scratch directory, removed when dropped.
struct TaskDir {
    path: PathBuf,
}

impl TaskDir {
    async fn create(root: &Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let path = root.join(format!("cams-task-{}", Uuid::new_v4()));
        tokio::fs::create_dir(&path).await?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TaskDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove task directory");
        }
    }
}

/// Spawns a child process per task and talks to it over stdin/stdout.
///
/// The child runs in its own process group; on timeout or once it exits, the
/// whole group is killed so stray transcoder processes die with it.
pub struct ProcessBoundary {
    program: PathBuf,
    args: Vec<String>,
    temp_root: PathBuf,
    timeout: Duration,
    options: TransformOptions,
    store: Arc<dyn BlobStore>,
}

impl ProcessBoundary {
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        temp_root: PathBuf,
        timeout: Duration,
        options: TransformOptions,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            program,
            args,
            temp_root,
            timeout,
            options,
            store,
        }
    }

    /// Re-executes the running binary unless `task_program` is configured.
    pub fn from_config(config: &WorkerConfig, store: Arc<dyn BlobStore>) -> std::io::Result<Self> {
        let program = match &config.task_program {
            Some(p) => p.clone(),
            None => std::env::current_exe()?,
        };
        Ok(Self::new(
            program,
            vec![TASK_SUBCOMMAND.to_string()],
            config.temp_root(),
            Duration::from_secs(config.task_timeout_secs),
            config.transform.clone(),
            store,
        ))
    }

    fn diag_tail_bytes(&self) -> usize {
        self.options.video.diag_tail_bytes
    }
}

fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // ESRCH just means the group is already gone.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

async fn read_head<R: AsyncRead + Unpin>(reader: R, limit: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = reader.take(limit).read_to_end(&mut buf).await;
    buf
}

/// Drain `reader`, keeping only its last `keep` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, keep: usize) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                kept.extend_from_slice(&chunk[..n]);
                if kept.len() > keep * 2 {
                    kept.drain(..kept.len() - keep);
                }
            }
        }
    }
    let start = kept.len().saturating_sub(keep);
    kept.split_off(start)
}

fn parse_reply(stdout: &[u8]) -> Option<Result<TaskReply, serde_json::Error>> {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().rev().find(|l| !l.trim().is_empty())?;
    Some(serde_json::from_str(line))
}

#[async_trait]
impl TaskBoundary for ProcessBoundary {
    async fn run(
        &self,
        job_id: &str,
        task: &WatermarkTask,
    ) -> Result<ProcessedArtifact, ProcessingError> {
        let dir = TaskDir::create(&self.temp_root).await?;
        let output_path = dir.path().join(OUTPUT_FILE);
        let message = TaskMessage {
            task: task.clone(),
            work_dir: dir.path().to_path_buf(),
            output_path: output_path.clone(),
            options: self.options.clone(),
        };
        let payload =
            serde_json::to_vec(&message).map_err(|e| ProcessingError::Protocol(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("CAMS_TASK_DIR", dir.path())
            .env("TMPDIR", dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id();
        debug!(job_id, pid, work_dir = %dir.path().display(), "Spawned task process");

        // Drain both pipes before feeding stdin so a chatty child cannot block.
        let stdout = child.stdout.take().map(|out| tokio::spawn(read_head(out, REPLY_LIMIT)));
        let keep = self.diag_tail_bytes();
        let stderr = child.stderr.take().map(|err| tokio::spawn(read_tail(err, keep)));

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload).await
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                kill_group(pid);
                return Err(e.into());
            }
        }

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(job_id, pid, timeout = ?self.timeout, "Task timed out, killing process group");
                kill_group(pid);
                let _ = child.kill().await;
                return Err(ProcessingError::Timeout(self.timeout));
            }
        };
        // Descendants may outlive the child; none of them are wanted.
        kill_group(pid);
        let status = status?;

        let stdout = match stdout {
            Some(h) => h.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr = match stderr {
            Some(h) => h.await.unwrap_or_default(),
            None => Vec::new(),
        };

        let reply = match parse_reply(&stdout) {
            None => {
                return Err(ProcessingError::WorkerCrash {
                    status: describe_status(status),
                    stderr_tail: tail(&stderr, keep),
                });
            }
            Some(Err(e)) => return Err(ProcessingError::Protocol(e.to_string())),
            Some(Ok(reply)) => reply,
        };

        if !reply.success {
            let info = reply
                .error
                .ok_or_else(|| ProcessingError::Protocol("failure reply without error".into()))?;
            return Err(ProcessingError::Reported(info));
        }

        let content_type = reply
            .content_type
            .ok_or_else(|| ProcessingError::Protocol("success reply without content type".into()))?;
        let hash = self.store.put_file(&output_path).await?;
        let size = self.store.size(&hash).await?;
        debug!(job_id, %hash, size, "Stored artifact");

        Ok(ProcessedArtifact {
            hash,
            size,
            content_type,
        })
    }
}
