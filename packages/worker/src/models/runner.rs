use std::sync::Arc;

use common::retry::{RetryCleanupGuard, RetryDecision, RetryPolicy, RetryTracker};
use common::{JobEvent, JobEventSink, ProcessedArtifact, WatermarkJob};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::models::boundary::TaskBoundary;

/// How a job ended after all attempts.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed {
        artifact: ProcessedArtifact,
        attempts: u32,
    },
    Failed {
        code: String,
        attempts: u32,
    },
}

/// Executes jobs through a [`TaskBoundary`], retrying retryable failures with
/// backoff and reporting progress to a [`JobEventSink`].
pub struct JobRunner {
    boundary: Arc<dyn TaskBoundary>,
    events: Arc<dyn JobEventSink>,
    policy: RetryPolicy,
    tracker: Arc<Mutex<RetryTracker>>,
}

impl JobRunner {
    pub fn new(
        boundary: Arc<dyn TaskBoundary>,
        events: Arc<dyn JobEventSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            boundary,
            events,
            policy,
            tracker: Arc::new(Mutex::new(RetryTracker::new(policy.max_attempts))),
        }
    }

    pub fn tracker(&self) -> Arc<Mutex<RetryTracker>> {
        Arc::clone(&self.tracker)
    }

    async fn emit(&self, event: JobEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Failed to publish job event");
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id, item_id = %job.item_id))]
    pub async fn run(&self, job: &WatermarkJob) -> JobOutcome {
        let job_id = job.job_id.as_str();
        let mut cleanup_guard = RetryCleanupGuard::new(&self.tracker, job_id);

        loop {
            let attempt = self.tracker.lock().await.next_attempt(job_id);
            self.emit(JobEvent::Started {
                job_id: job_id.to_string(),
                attempt,
            })
            .await;

            match self.boundary.run(job_id, &job.task).await {
                Ok(artifact) => {
                    self.tracker.lock().await.clear(job_id);
                    cleanup_guard.defuse();
                    info!(attempt, hash = %artifact.hash, size = artifact.size, "Job completed");
                    self.emit(JobEvent::Completed {
                        job_id: job_id.to_string(),
                        artifact: artifact.clone(),
                        attempts: attempt,
                    })
                    .await;
                    return JobOutcome::Completed {
                        artifact,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    let failure = e.to_failure_info();
                    let decision = self.tracker.lock().await.record_failure(
                        job_id,
                        &failure.code,
                        &failure.message,
                        failure.retryable,
                    );

                    match decision {
                        RetryDecision::Retry { attempt, .. } => {
                            let delay = self.policy.backoff(attempt);
                            warn!(
                                attempt,
                                code = %failure.code,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "Retrying watermark job"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::Exhausted { history } => {
                            cleanup_guard.defuse();
                            let attempts = history.len() as u32;
                            error!(
                                attempts,
                                code = %failure.code,
                                retryable = failure.retryable,
                                error = %e,
                                "Watermark job failed"
                            );
                            let code = failure.code.clone();
                            self.emit(JobEvent::Failed {
                                job_id: job_id.to_string(),
                                error: failure,
                                retry_history: history,
                            })
                            .await;
                            return JobOutcome::Failed { code, attempts };
                        }
                    }
                }
            }
        }
    }
}

/// Drain jobs from an in-process channel, running at most `concurrency` at
/// once. Used when no broker is configured.
pub fn spawn_local_runner(
    mut rx: mpsc::Receiver<WatermarkJob>,
    runner: Arc<JobRunner>,
    concurrency: usize,
) -> JoinHandle<()> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                runner.run(&job).await;
                drop(permit);
            });
        }
        info!("Local job channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformOptions;
    use crate::error::ProcessingError;
    use crate::models::boundary::ProcessBoundary;
    use async_trait::async_trait;
    use common::storage::{BlobStore, FilesystemBlobStore};
    use common::WatermarkTask;
    use common::storage::ContentHash;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        events: std::sync::Mutex<Vec<JobEvent>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<JobEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobEventSink for RecordingSink {
        async fn publish(&self, event: JobEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    /// Fails with the given errors in order, then succeeds.
    struct ScriptedBoundary {
        failures: std::sync::Mutex<Vec<ProcessingError>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskBoundary for ScriptedBoundary {
        async fn run(
            &self,
            _job_id: &str,
            _task: &WatermarkTask,
        ) -> Result<ProcessedArtifact, ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                Ok(ProcessedArtifact {
                    hash: ContentHash::compute(b"out"),
                    size: 3,
                    content_type: "image/png".into(),
                })
            } else {
                Err(failures.remove(0))
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    fn job() -> WatermarkJob {
        WatermarkJob {
            job_id: "job-1".into(),
            item_id: "item-1".into(),
            viewer_id: "42".into(),
            task: WatermarkTask::Image {
                source_url: "file:///x".into(),
                watermark_text: "G#1".into(),
            },
        }
    }

    fn crash() -> ProcessingError {
        ProcessingError::WorkerCrash {
            status: "signal 9".into(),
            stderr_tail: String::new(),
        }
    }

    #[tokio::test]
    async fn retries_then_completes() {
        let boundary = Arc::new(ScriptedBoundary {
            failures: std::sync::Mutex::new(vec![crash()]),
            calls: AtomicU32::new(0),
        });
        let sink = Arc::new(RecordingSink::default());
        let runner = JobRunner::new(boundary.clone(), sink.clone(), fast_policy(3));

        let outcome = runner.run(&job()).await;
        assert!(matches!(outcome, JobOutcome::Completed { attempts: 2, .. }));
        assert_eq!(boundary.calls.load(Ordering::SeqCst), 2);

        let events = sink.events();
        assert!(matches!(events[0], JobEvent::Started { attempt: 1, .. }));
        assert!(matches!(events[1], JobEvent::Started { attempt: 2, .. }));
        assert!(matches!(events[2], JobEvent::Completed { attempts: 2, .. }));
        assert!(runner.tracker().lock().await.is_empty());
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let boundary = Arc::new(ScriptedBoundary {
            failures: std::sync::Mutex::new(vec![crash(), crash(), crash(), crash()]),
            calls: AtomicU32::new(0),
        });
        let sink = Arc::new(RecordingSink::default());
        let runner = JobRunner::new(boundary.clone(), sink.clone(), fast_policy(3));

        let outcome = runner.run(&job()).await;
        assert!(matches!(outcome, JobOutcome::Failed { attempts: 3, .. }));
        assert_eq!(boundary.calls.load(Ordering::SeqCst), 3);

        let failed = sink.events().pop().unwrap();
        match failed {
            JobEvent::Failed {
                error,
                retry_history,
                ..
            } => {
                assert_eq!(error.code, "WORKER_CRASH");
                assert_eq!(retry_history.len(), 3);
                assert_eq!(retry_history[2].attempt, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let boundary = Arc::new(ScriptedBoundary {
            failures: std::sync::Mutex::new(vec![ProcessingError::ToolMissing {
                tool: "ffmpeg".into(),
                detail: "not found".into(),
            }]),
            calls: AtomicU32::new(0),
        });
        let sink = Arc::new(RecordingSink::default());
        let runner = JobRunner::new(boundary.clone(), sink.clone(), fast_policy(3));

        let outcome = runner.run(&job()).await;
        match outcome {
            JobOutcome::Failed { code, attempts } => {
                assert_eq!(code, "TOOL_MISSING");
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(boundary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sigkilled_task_process_is_retried_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let temp_root = dir.path().join("tasks");
        let marker = dir.path().join("crashed-once");
        let store = Arc::new(
            FilesystemBlobStore::new(dir.path().join("objects"), 1 << 20)
                .await
                .unwrap(),
        );
        let script = format!(
            r#"cat >/dev/null
if [ -e '{m}' ]; then
  printf 'ok' > "$CAMS_TASK_DIR/output"
  echo '{{"success":true,"content_type":"image/png"}}'
else
  touch '{m}' "$CAMS_TASK_DIR/partial"
  kill -9 $$
fi"#,
            m = marker.display()
        );
        let boundary = Arc::new(ProcessBoundary::new(
            PathBuf::from("sh"),
            vec!["-c".into(), script],
            temp_root.clone(),
            Duration::from_secs(10),
            TransformOptions::default(),
            store.clone(),
        ));
        let sink = Arc::new(RecordingSink::default());
        let runner = JobRunner::new(boundary, sink.clone(), fast_policy(3));

        let outcome = runner.run(&job()).await;
        let JobOutcome::Completed { artifact, attempts } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(attempts, 2);
        assert_eq!(store.get(&artifact.hash).await.unwrap(), b"ok");
        assert_eq!(std::fs::read_dir(&temp_root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn local_runner_processes_channel() {
        let boundary = Arc::new(ScriptedBoundary {
            failures: std::sync::Mutex::new(vec![]),
            calls: AtomicU32::new(0),
        });
        let sink = Arc::new(RecordingSink::default());
        let runner = Arc::new(JobRunner::new(boundary.clone(), sink.clone(), fast_policy(3)));

        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_local_runner(rx, runner, 2);
        for i in 0..4 {
            let mut j = job();
            j.job_id = format!("job-{i}");
            tx.send(j).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        for _ in 0..50 {
            if boundary.calls.load(Ordering::SeqCst) == 4
                && sink
                    .events()
                    .iter()
                    .filter(|e| matches!(e, JobEvent::Completed { .. }))
                    .count()
                    == 4
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("not all jobs completed");
    }
}
