//! # Job Worker
//!
//! Executes queued [`SyncTask`]s and applies the retry policy.
//!
//! ## Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            JobWorker::run                               │
//! │                                                                         │
//! │  start ──► requeue jobs left `started` by a previous process            │
//! │                                                                         │
//! │  every poll_interval:                                                   │
//! │    claim_next(now) ──► runner.run_task(task)                            │
//! │        Ok(result)                    ──► done                           │
//! │        Err(retryable), attempts left ──► pending, eta = now + backoff   │
//! │        Err(_)                        ──► failed                         │
//! │    ... up to batch_size jobs per tick                                   │
//! │                                                                         │
//! │  shutdown signal ──► finish the current job, stop                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Backoff
//! `initial_backoff * 2^(attempts - 1)`, capped at `max_backoff`, no jitter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use magento_core::{Job, SyncTask};
use magento_db::Database;

use crate::config::WorkerSettings;
use crate::error::{SyncError, SyncResult};

/// Executes the body of a task.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Runs a task, returning an optional human-readable result.
    async fn run_task(&self, task: &SyncTask) -> SyncResult<Option<String>>;
}

/// Counters of one worker pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub claimed: usize,
    pub done: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Polls the durable queue and runs due jobs.
pub struct JobWorker {
    db: Database,
    runner: Arc<dyn TaskRunner>,
    settings: WorkerSettings,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a running worker.
#[derive(Clone)]
pub struct JobWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl JobWorkerHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }
}

impl JobWorker {
    pub fn new(
        db: Database,
        runner: Arc<dyn TaskRunner>,
        settings: WorkerSettings,
    ) -> (Self, JobWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = JobWorker {
            db,
            runner,
            settings,
            shutdown_rx,
        };
        (worker, JobWorkerHandle { shutdown_tx })
    }

    /// Runs the worker loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!("Job worker starting");

        match self.db.jobs().requeue_interrupted().await {
            Ok(0) => {}
            Ok(count) => info!(count, "Requeued interrupted jobs"),
            Err(e) => error!(?e, "Failed to requeue interrupted jobs"),
        }

        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(?e, "Failed to process job batch");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Job worker shutting down");
                    break;
                }
            }
        }

        info!("Job worker stopped");
    }

    /// Runs the jobs due now, up to `batch_size`.
    pub async fn run_once(&self) -> SyncResult<WorkerReport> {
        self.run_due(Utc::now()).await
    }

    /// Runs the jobs due at `now`, up to `batch_size`.
    pub async fn run_due(&self, now: DateTime<Utc>) -> SyncResult<WorkerReport> {
        let mut report = WorkerReport::default();

        while report.claimed < self.settings.batch_size {
            let Some(job) = self.db.jobs().claim_next(now).await? else {
                break;
            };
            report.claimed += 1;

            match self.execute(job, now).await? {
                Settled::Done => report.done += 1,
                Settled::Retried => report.retried += 1,
                Settled::Failed => report.failed += 1,
            }
        }

        if report.claimed > 0 {
            debug!(?report, "Job batch processed");
        }
        Ok(report)
    }

    #[instrument(skip(self, job, now), fields(job_id = %job.id, task = job.task.name(), attempt = job.attempts))]
    async fn execute(&self, job: Job, now: DateTime<Utc>) -> SyncResult<Settled> {
        match self.runner.run_task(&job.task).await {
            Ok(result) => {
                self.db.jobs().mark_done(&job.id, result.as_deref()).await?;
                info!("Job done");
                Ok(Settled::Done)
            }
            Err(e) if e.is_retryable() && job.attempts < job.max_attempts => {
                let delay = self.retry_delay(job.attempts);
                let eta = now
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Job will be retried");
                self.db.jobs().reschedule(&job.id, &e.to_string(), eta).await?;
                Ok(Settled::Retried)
            }
            Err(e) => {
                self.db.jobs().mark_failed(&job.id, &e.to_string()).await?;
                Ok(Settled::Failed)
            }
        }
    }

    /// Delay before the next run of a job that failed `attempts` times.
    fn retry_delay(&self, attempts: i64) -> Duration {
        let mut backoff = self.create_backoff();
        let mut delay = backoff.initial_interval;
        for _ in 0..attempts.max(1) {
            if let Some(next) = backoff.next_backoff() {
                delay = next;
            }
        }
        delay
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.settings.initial_backoff(),
            max_interval: self.settings.max_backoff(),
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

enum Settled {
    Done,
    Retried,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobQueue;
    use magento_core::{BackendId, EntityKind, ExternalId, JobState};
    use magento_db::DbConfig;
    use std::sync::Mutex;

    /// Pops one scripted answer per call; `Ok` once the script is empty.
    struct Scripted {
        answers: Mutex<Vec<SyncResult<Option<String>>>>,
        runs: Mutex<usize>,
    }

    impl Scripted {
        fn new(mut answers: Vec<SyncResult<Option<String>>>) -> Arc<Self> {
            answers.reverse();
            Arc::new(Scripted {
                answers: Mutex::new(answers),
                runs: Mutex::new(0),
            })
        }

        fn runs(&self) -> usize {
            *self.runs.lock().unwrap()
        }
    }

    #[async_trait]
    impl TaskRunner for Scripted {
        async fn run_task(&self, _task: &SyncTask) -> SyncResult<Option<String>> {
            *self.runs.lock().unwrap() += 1;
            self.answers
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(Some("ok".into())))
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            initial_backoff_ms: 1000,
            max_backoff_secs: 4,
            batch_size: 10,
            ..WorkerSettings::default()
        }
    }

    fn task(id: &str) -> SyncTask {
        SyncTask::ImportRecord {
            backend_id: BackendId::new("mage"),
            kind: EntityKind::Partner,
            external_id: ExternalId::new(id),
            force: false,
        }
    }

    #[tokio::test]
    async fn test_successful_job_is_done() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = JobQueue::new(db.clone());
        let handle = queue.enqueue(task("1"), 10).await.unwrap();
        let runner = Scripted::new(vec![Ok(Some("imported".into()))]);
        let (worker, _handle) = JobWorker::new(db.clone(), runner.clone(), settings());

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.done, 1);

        let job = queue.status(&handle).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.result.as_deref(), Some("imported"));
    }

    #[tokio::test]
    async fn test_retryable_failure_is_rescheduled_then_fails() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = JobQueue::new(db.clone()).with_max_attempts(2);
        let handle = queue.enqueue(task("1"), 10).await.unwrap();
        let runner = Scripted::new(vec![
            Err(SyncError::Transport("connection reset".into())),
            Err(SyncError::Transport("connection reset".into())),
        ]);
        let (worker, _handle) = JobWorker::new(db.clone(), runner.clone(), settings());

        let t0 = Utc::now();
        let report = worker.run_due(t0).await.unwrap();
        assert_eq!(report.retried, 1);

        let job = queue.status(&handle).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.eta > t0);
        assert!(job.last_error.unwrap().contains("connection reset"));

        // not due yet
        let report = worker.run_due(t0).await.unwrap();
        assert_eq!(report.claimed, 0);

        let report = worker
            .run_due(t0 + chrono::Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(runner.runs(), 2);

        let job = queue.status(&handle).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = JobQueue::new(db.clone());
        let handle = queue.enqueue(task("1"), 10).await.unwrap();
        let runner = Scripted::new(vec![Err(SyncError::RecordNotFound {
            kind: EntityKind::Partner,
            external_id: ExternalId::new("1"),
        })]);
        let (worker, _handle) = JobWorker::new(db.clone(), runner, settings());

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        let job = queue.status(&handle).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_job_is_never_run() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = JobQueue::new(db.clone());
        let handle = queue.enqueue(task("1"), 10).await.unwrap();
        queue.cancel(&handle).await.unwrap();
        let runner = Scripted::new(Vec::new());
        let (worker, _handle) = JobWorker::new(db.clone(), runner.clone(), settings());

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.claimed, 0);
        assert_eq!(runner.runs(), 0);
    }

    #[tokio::test]
    async fn test_jobs_run_in_priority_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = JobQueue::new(db.clone());
        let low = queue.enqueue(task("low"), 20).await.unwrap();
        queue.enqueue(task("high"), 5).await.unwrap();

        let runner = Scripted::new(Vec::new());
        let mut limited = settings();
        limited.batch_size = 1;
        let (worker, _handle) = JobWorker::new(db.clone(), runner, limited);

        worker.run_once().await.unwrap();
        let job = queue.status(&low).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
    }

    #[tokio::test]
    async fn test_retry_delay_doubles_and_caps() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (worker, _handle) = JobWorker::new(db, Scripted::new(Vec::new()), settings());
        assert_eq!(worker.retry_delay(1), Duration::from_secs(1));
        assert_eq!(worker.retry_delay(2), Duration::from_secs(2));
        assert_eq!(worker.retry_delay(3), Duration::from_secs(4));
        assert_eq!(worker.retry_delay(6), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (worker, handle) = JobWorker::new(db, Scripted::new(Vec::new()), settings());
        let task = tokio::spawn(worker.run());
        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
