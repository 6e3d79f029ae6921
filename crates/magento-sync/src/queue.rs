//! # Job Queue Client
//!
//! Explicit enqueueing of [`SyncTask`]s into the durable queue.
//!
//! ```text
//! listener / batch ──enqueue(task, priority)──► jobs table ──► JobWorker
//!        │                    │
//!        │                    └── returns a JobHandle immediately
//!        └── enqueue_in(tx, ..) commits with the caller's binding write
//! ```
//!
//! A pending job can be cancelled through its handle. A started job runs to
//! completion.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use magento_core::{Job, SyncTask, DEFAULT_MAX_ATTEMPTS};
use magento_db::{Database, JobSpec, SyncTx};

use crate::error::SyncResult;

/// Reference to an enqueued job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    id: String,
    name: &'static str,
    priority: i64,
}

impl JobHandle {
    fn from_job(job: &Job) -> Self {
        JobHandle {
            id: job.id.clone(),
            name: job.task.name(),
            priority: job.priority,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Task name (`import_record`, `export_invoice`, ...).
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }
}

/// Enqueues tasks with the configured attempt budget.
#[derive(Debug, Clone)]
pub struct JobQueue {
    db: Database,
    max_attempts: i64,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        JobQueue {
            db,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn spec(&self, task: SyncTask, priority: i64) -> JobSpec {
        JobSpec::new(task)
            .priority(priority)
            .max_attempts(self.max_attempts)
    }

    /// Enqueues a task, runnable now.
    pub async fn enqueue(&self, task: SyncTask, priority: i64) -> SyncResult<JobHandle> {
        let job = self.db.jobs().enqueue(&self.spec(task, priority)).await?;
        info!(job_id = %job.id, task = job.task.name(), priority, "Job enqueued");
        Ok(JobHandle::from_job(&job))
    }

    /// Enqueues a task not runnable before `eta`.
    pub async fn enqueue_at(
        &self,
        task: SyncTask,
        priority: i64,
        eta: DateTime<Utc>,
    ) -> SyncResult<JobHandle> {
        let job = self
            .db
            .jobs()
            .enqueue(&self.spec(task, priority).eta(eta))
            .await?;
        info!(job_id = %job.id, task = job.task.name(), %eta, "Job scheduled");
        Ok(JobHandle::from_job(&job))
    }

    /// Enqueues inside the caller's transaction; visible on commit.
    pub async fn enqueue_in(
        &self,
        tx: &mut SyncTx,
        task: SyncTask,
        priority: i64,
    ) -> SyncResult<JobHandle> {
        let job = tx.enqueue_job(&self.spec(task, priority)).await?;
        debug!(job_id = %job.id, task = job.task.name(), "Job enqueued in transaction");
        Ok(JobHandle::from_job(&job))
    }

    /// Withdraws a pending job. Returns false when it already started.
    pub async fn cancel(&self, handle: &JobHandle) -> SyncResult<bool> {
        let cancelled = self.db.jobs().cancel(&handle.id).await?;
        if cancelled {
            info!(job_id = %handle.id, "Job cancelled");
        } else {
            debug!(job_id = %handle.id, "Job not cancellable");
        }
        Ok(cancelled)
    }

    /// Current state of a job.
    pub async fn status(&self, handle: &JobHandle) -> SyncResult<Option<Job>> {
        Ok(self.db.jobs().get(&handle.id).await?)
    }
}
