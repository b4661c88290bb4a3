use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

/// One failed execution of a watermark job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based.
    pub attempt: u32,
    /// Stable error code, e.g. `TOOL_FAILED`.
    pub code: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl RetryAttempt {
    pub fn new(attempt: u32, code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            attempt,
            code: code.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Backoff schedule shared by the dispatcher and the queue configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total executions allowed per job, including the first. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt. Default: 2000 ms.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling for any single delay. Default: 60 s.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }
}

#[derive(Debug, Clone)]
pub enum RetryDecision {
    /// Run the job again after backing off; `attempt` is the one that just failed.
    Retry {
        attempt: u32,
        history: Vec<RetryAttempt>,
    },
    /// Terminal: either attempts ran out or the error is not worth retrying.
    Exhausted { history: Vec<RetryAttempt> },
}

#[derive(Debug, Clone)]
struct JobAttempts {
    history: Vec<RetryAttempt>,
    last_updated: Instant,
}

/// Per-job attempt bookkeeping, keyed by job id.
///
/// Retries reuse the job id, so the history accumulated here is what ends up
/// in the `Failed` event and the dead-letter row.
#[derive(Debug, Default)]
pub struct RetryTracker {
    jobs: HashMap<String, JobAttempts>,
    max_attempts: u32,
}

impl RetryTracker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            jobs: HashMap::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Number the next execution of `job_id` will carry.
    pub fn next_attempt(&self, job_id: &str) -> u32 {
        self.attempts(job_id) + 1
    }

    pub fn record_failure(
        &mut self,
        job_id: &str,
        code: &str,
        error: &str,
        retryable: bool,
    ) -> RetryDecision {
        let entry = self
            .jobs
            .entry(job_id.to_string())
            .or_insert_with(|| JobAttempts {
                history: Vec::new(),
                last_updated: Instant::now(),
            });

        let attempt = entry.history.len() as u32 + 1;
        entry.history.push(RetryAttempt::new(attempt, code, error));
        entry.last_updated = Instant::now();

        if retryable && attempt < self.max_attempts {
            RetryDecision::Retry {
                attempt,
                history: entry.history.clone(),
            }
        } else {
            let history = self
                .jobs
                .remove(job_id)
                .map(|s| s.history)
                .unwrap_or_default();
            RetryDecision::Exhausted { history }
        }
    }

    pub fn clear(&mut self, job_id: &str) {
        self.jobs.remove(job_id);
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self, job_id: &str) -> u32 {
        self.jobs
            .get(job_id)
            .map(|s| s.history.len() as u32)
            .unwrap_or(0)
    }

    pub fn cleanup_stale(&mut self, max_age: Duration) {
        let now = Instant::now();
        self.jobs
            .retain(|_, s| now.duration_since(s.last_updated) < max_age);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// `min(base * 2^(attempt-1) + jitter, max)` with 0-25% jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(factor);
    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

/// Drops tracker state for a job when the processing future is cancelled.
pub struct RetryCleanupGuard<'a> {
    tracker: &'a Arc<Mutex<RetryTracker>>,
    job_id: String,
    defused: bool,
}

impl<'a> RetryCleanupGuard<'a> {
    pub fn new(tracker: &'a Arc<Mutex<RetryTracker>>, job_id: impl Into<String>) -> Self {
        Self {
            tracker,
            job_id: job_id.into(),
            defused: false,
        }
    }

    pub fn defuse(&mut self) {
        self.defused = true;
    }
}

impl Drop for RetryCleanupGuard<'_> {
    fn drop(&mut self) {
        if !self.defused
            && let Ok(mut tracker) = self.tracker.try_lock()
        {
            tracker.clear(&self.job_id);
        }
    }
}

/// Periodically evict tracker entries for jobs nobody is processing anymore.
pub fn spawn_cleanup_task(
    tracker: Arc<Mutex<RetryTracker>>,
    every: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let removed = {
                let mut guard = tracker.lock().await;
                let before = guard.len();
                guard.cleanup_stale(max_age);
                before - guard.len()
            };
            if removed > 0 {
                info!(removed, "Evicted stale retry state");
            }
        }
    })
}
