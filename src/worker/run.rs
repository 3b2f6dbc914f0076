//! The worker loop: claim the next eligible job, run it, record the outcome.
//!
//! Workers never talk to each other. The store's claim is the only
//! synchronization point, so any number of them (in this process or others)
//! can poll the same database.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

use crate::error::{Error, Result};
use crate::model::{Job, JobId, timestamp_now};
use crate::retry::RetryPolicy;
use crate::storage::JobStore;
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;

use super::exec::{CommandExecutor, Execution};

/// How many times a worker tries to record an outcome before giving up on a
/// transient store error. Giving up leaves the job in `processing`.
const RECORD_ATTEMPTS: u32 = 3;

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pause after a poll that found nothing eligible.
    pub idle_interval: Duration,
    /// Pause after a store error. Longer than `idle_interval`.
    pub error_backoff: Duration,
    /// Base of the exponential retry delay.
    pub backoff_base: u32,
    /// Shell used to run job commands.
    pub shell: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(2),
            error_backoff: Duration::from_secs(5),
            backoff_base: 3,
            shell: "sh".to_string(),
        }
    }
}

/// What one iteration of the loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nothing was eligible (or the candidate was claimed by someone else).
    Idle,
    Completed(JobId),
    Retrying { id: JobId, run_at: DateTime<Utc> },
    Dead(JobId),
}

/// Decision taken after an execution.
#[derive(Debug, Clone, Copy)]
enum Outcome {
    Complete,
    Retry { run_at: DateTime<Utc> },
    Dead,
}

/// A single worker. Owns its own store connection.
pub struct Worker {
    id: usize,
    store: Arc<Mutex<JobStore>>,
    executor: CommandExecutor,
    retry: RetryPolicy,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(id: usize, store: JobStore, config: WorkerConfig) -> Self {
        Self {
            id,
            store: Arc::new(Mutex::new(store)),
            executor: CommandExecutor::new(config.shell.clone()),
            retry: RetryPolicy::new(config.backoff_base),
            config,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Errors from a single iteration are logged and followed by the error
    /// backoff; they never end the loop. A job already claimed is always run
    /// to completion before shutdown is honoured.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker = self.id, "worker started");

        while !shutdown.is_cancelled() {
            let pause = match self.run_once().await {
                Ok(Tick::Idle) => Some(self.config.idle_interval),
                Ok(_) => None,
                Err(e) if e.is_transient() => {
                    warn!(worker = self.id, error = %e, "job store busy, backing off");
                    Some(self.config.error_backoff)
                }
                Err(e) => {
                    error!(worker = self.id, error = %e, "worker iteration failed, backing off");
                    Some(self.config.error_backoff)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!(worker = self.id, "worker stopped");
    }

    /// One iteration: claim, execute, record.
    pub async fn run_once(&self) -> Result<Tick> {
        let Some(job) = self.with_store(|store| store.claim_next()).await? else {
            return Ok(Tick::Idle);
        };

        let attempt = job.attempts + 1;
        let span = start_job_span(self.id, &job.id, attempt);
        record_state_transition(&span, "pending", "processing");

        async {
            info!(
                command = %job.command,
                max_retries = job.max_retries,
                "processing job (attempt {attempt}/{})",
                job.max_retries
            );

            let execution = self.executor.execute(&job, attempt).await;
            metrics::job_duration_ms().record(
                execution.duration_ms as f64,
                &[KeyValue::new(
                    "outcome",
                    if execution.success { "success" } else { "failure" },
                )],
            );

            let outcome = self.decide(&job, &execution);
            self.report(&job, &execution, outcome);
            self.record(&job.id, attempt, outcome).await?;

            let to = match outcome {
                Outcome::Complete => "completed",
                Outcome::Retry { .. } => "pending",
                Outcome::Dead => "dead",
            };
            record_state_transition(&span, "processing", to);

            Ok::<_, Error>(match outcome {
                Outcome::Complete => Tick::Completed(job.id.clone()),
                Outcome::Retry { run_at } => Tick::Retrying {
                    id: job.id.clone(),
                    run_at,
                },
                Outcome::Dead => Tick::Dead(job.id.clone()),
            })
        }
        .instrument(span.clone())
        .await
    }

    fn decide(&self, job: &Job, execution: &Execution) -> Outcome {
        let attempt = job.attempts + 1;
        if execution.success {
            Outcome::Complete
        } else if attempt < job.max_retries {
            Outcome::Retry {
                run_at: self.retry.next_run_at(attempt, timestamp_now()),
            }
        } else {
            Outcome::Dead
        }
    }

    fn report(&self, job: &Job, execution: &Execution, outcome: Outcome) {
        match outcome {
            Outcome::Complete => {
                info!(duration_ms = execution.duration_ms, "job completed");
                let output = execution.stdout.trim();
                if !output.is_empty() {
                    info!(output, "job output");
                }
            }
            Outcome::Retry { run_at } => {
                warn!(
                    exit_code = ?execution.exit_code,
                    reason = %execution.failure_reason(),
                    "job failed, retrying at {run_at}"
                );
            }
            Outcome::Dead => {
                warn!(
                    exit_code = ?execution.exit_code,
                    reason = %execution.failure_reason(),
                    attempts = job.attempts + 1,
                    "job failed, moved to dead-letter queue"
                );
            }
        }
    }

    /// Write the outcome, retrying transient store errors a few times.
    async fn record(&self, id: &JobId, attempt: u32, outcome: Outcome) -> Result<()> {
        let mut tries = 0;
        loop {
            tries += 1;
            let id = id.clone();
            let result = self
                .with_store(move |store| match outcome {
                    Outcome::Complete => store.complete(&id, attempt),
                    Outcome::Retry { run_at } => store.fail_for_retry(&id, attempt, run_at),
                    Outcome::Dead => store.fail_terminal(&id, attempt),
                })
                .await;

            match result {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() && tries < RECORD_ATTEMPTS => {
                    warn!(error = %e, tries, "could not record outcome, retrying");
                    tokio::time::sleep(self.config.error_backoff).await;
                }
                Err(e) => {
                    error!(error = %e, "giving up on recording outcome; job left in processing");
                    return Err(e);
                }
            }
        }
    }

    /// Run a store operation on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut JobStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let mut guard = store
                .lock()
                .map_err(|_| Error::Other("job store lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Other(format!("job store task failed: {e}")))?
    }
}
