//! # Job Repository
//!
//! The durable job queue. Jobs survive restarts; a worker claims the next
//! runnable one atomically.
//!
//! ## Claim Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  runnable = state 'pending' AND eta_ms <= now                           │
//! │                                                                         │
//! │  ORDER BY priority ASC, created_at ASC                                  │
//! │           └── lower runs first   └── FIFO among equals                  │
//! │                                                                         │
//! │  UPDATE ... SET state = 'started', attempts = attempts + 1              │
//! │  WHERE id = (SELECT ... LIMIT 1) RETURNING *                            │
//! │  └── a single statement, so two workers never claim the same job       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use magento_core::{Job, JobState, SyncTask, DEFAULT_JOB_PRIORITY, DEFAULT_MAX_ATTEMPTS};

use crate::error::{DbError, DbResult};

// =============================================================================
// Job Spec
// =============================================================================

/// A job about to be enqueued.
///
/// ## Example
/// ```rust,ignore
/// let spec = JobSpec::new(task).priority(12).max_attempts(3);
/// db.jobs().enqueue(&spec).await?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub task: SyncTask,
    pub priority: i64,
    pub eta: Option<DateTime<Utc>>,
    pub max_attempts: i64,
}

impl JobSpec {
    /// A job with default priority, runnable immediately.
    pub fn new(task: SyncTask) -> Self {
        JobSpec {
            task,
            priority: DEFAULT_JOB_PRIORITY,
            eta: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Not runnable before `eta`.
    pub fn eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    task: String,
    priority: i64,
    state: JobState,
    attempts: i64,
    max_attempts: i64,
    eta_ms: i64,
    last_error: Option<String>,
    result: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Self> {
        let task: SyncTask =
            serde_json::from_str(&row.task).map_err(|e| DbError::json("jobs.task", e))?;
        Ok(Job {
            id: row.id,
            task,
            priority: row.priority,
            state: row.state,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            eta: from_millis(row.eta_ms),
            last_error: row.last_error,
            result: row.result,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

const JOB_COLUMNS: &str = r#"
    id, task, priority, state, attempts, max_attempts, eta_ms,
    last_error, result, created_at, started_at, finished_at
"#;

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

// =============================================================================
// Query Helpers
// =============================================================================

pub(crate) async fn insert<'e, E>(executor: E, spec: &JobSpec) -> DbResult<Job>
where
    E: SqliteExecutor<'e>,
{
    let now = Utc::now();
    let eta = spec.eta.unwrap_or(now);
    let payload =
        serde_json::to_string(&spec.task).map_err(|e| DbError::json("jobs.task", e))?;

    let job = Job {
        id: Uuid::new_v4().to_string(),
        task: spec.task.clone(),
        priority: spec.priority,
        state: JobState::Pending,
        attempts: 0,
        max_attempts: spec.max_attempts,
        eta,
        last_error: None,
        result: None,
        created_at: now,
        started_at: None,
        finished_at: None,
    };

    debug!(
        job_id = %job.id,
        task = spec.task.name(),
        priority = spec.priority,
        "Enqueuing job"
    );

    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, name, task, priority, state, attempts, max_attempts,
            eta_ms, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8)
        "#,
    )
    .bind(&job.id)
    .bind(spec.task.name())
    .bind(payload)
    .bind(job.priority)
    .bind(JobState::Pending)
    .bind(job.max_attempts)
    .bind(eta.timestamp_millis())
    .bind(job.created_at)
    .execute(executor)
    .await?;

    Ok(job)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the job queue.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    /// Creates a new JobRepository.
    pub fn new(pool: SqlitePool) -> Self {
        JobRepository { pool }
    }

    /// Adds a job to the queue.
    pub async fn enqueue(&self, spec: &JobSpec) -> DbResult<Job> {
        insert(&self.pool, spec).await
    }

    /// Gets a job by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    /// Claims the next runnable job, marking it started.
    ///
    /// ## Returns
    /// * `Ok(Some(job))` - job now `Started`, `attempts` incremented
    /// * `Ok(None)` - nothing runnable at `now`
    pub async fn claim_next(&self, now: DateTime<Utc>) -> DbResult<Option<Job>> {
        let sql = format!(
            r#"
            UPDATE jobs SET
                state = 'started',
                attempts = attempts + 1,
                started_at = ?2
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'pending' AND eta_ms <= ?1
                ORDER BY priority ASC, created_at ASC, rowid ASC
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now.timestamp_millis())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    /// Marks a started job done.
    pub async fn mark_done(&self, id: &str, result: Option<&str>) -> DbResult<()> {
        let outcome = sqlx::query(
            r#"
            UPDATE jobs SET state = 'done', result = ?2, finished_at = ?3
            WHERE id = ?1 AND state = 'started'
            "#,
        )
        .bind(id)
        .bind(result)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(DbError::not_found("Started job", id));
        }
        Ok(())
    }

    /// Marks a started job failed for good.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        warn!(job_id = %id, error = %error, "Job failed");

        let outcome = sqlx::query(
            r#"
            UPDATE jobs SET state = 'failed', last_error = ?2, finished_at = ?3
            WHERE id = ?1 AND state = 'started'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(DbError::not_found("Started job", id));
        }
        Ok(())
    }

    /// Puts a started job back in the queue, runnable from `eta`.
    pub async fn reschedule(&self, id: &str, error: &str, eta: DateTime<Utc>) -> DbResult<()> {
        let outcome = sqlx::query(
            r#"
            UPDATE jobs SET state = 'pending', last_error = ?2, eta_ms = ?3
            WHERE id = ?1 AND state = 'started'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(eta.timestamp_millis())
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(DbError::not_found("Started job", id));
        }
        Ok(())
    }

    /// Cancels a job that has not started yet.
    ///
    /// Returns `false` when the job is unknown or already running/finished.
    pub async fn cancel(&self, id: &str) -> DbResult<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE jobs SET state = 'cancelled', finished_at = ?2
            WHERE id = ?1 AND state = 'pending'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Returns jobs left `started` by a crashed worker to the queue.
    pub async fn requeue_interrupted(&self) -> DbResult<u64> {
        let outcome = sqlx::query("UPDATE jobs SET state = 'pending' WHERE state = 'started'")
            .execute(&self.pool)
            .await?;
        let count = outcome.rows_affected();
        if count > 0 {
            info!(count, "Requeued interrupted jobs");
        }
        Ok(count)
    }

    /// Lists jobs in a state, in claim order.
    pub async fn list_by_state(&self, state: JobState) -> DbResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY priority ASC, created_at ASC, rowid ASC"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(state)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    /// Counts jobs in a state.
    pub async fn count_by_state(&self, state: JobState) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state = ?1")
            .bind(state)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Lists pending jobs with the given task name.
    pub async fn list_pending_named(&self, name: &str) -> DbResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state = 'pending' AND name = ?1 ORDER BY priority ASC, created_at ASC, rowid ASC"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(name)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Job::try_from).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::Duration;

    fn export(binding: &str) -> SyncTask {
        SyncTask::ExportInvoice {
            binding_id: binding.to_string(),
        }
    }

    #[tokio::test]
    async fn test_claim_respects_priority_then_fifo() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let jobs = db.jobs();

        jobs.enqueue(&JobSpec::new(export("late")).priority(12)).await.unwrap();
        jobs.enqueue(&JobSpec::new(export("first")).priority(10)).await.unwrap();
        jobs.enqueue(&JobSpec::new(export("second")).priority(10)).await.unwrap();

        let now = Utc::now();
        let order: Vec<SyncTask> = vec![
            jobs.claim_next(now).await.unwrap().unwrap().task,
            jobs.claim_next(now).await.unwrap().unwrap().task,
            jobs.claim_next(now).await.unwrap().unwrap().task,
        ];
        assert_eq!(order, vec![export("first"), export("second"), export("late")]);
        assert!(jobs.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eta_delays_claim() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let jobs = db.jobs();
        let now = Utc::now();

        jobs.enqueue(&JobSpec::new(export("b")).eta(now + Duration::seconds(60)))
            .await
            .unwrap();

        assert!(jobs.claim_next(now).await.unwrap().is_none());
        let claimed = jobs
            .claim_next(now + Duration::seconds(61))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.state, JobState::Started);
        assert_eq!(claimed.attempts, 1);
    }

    #[tokio::test]
    async fn test_reschedule_then_fail() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let jobs = db.jobs();
        let job = jobs.enqueue(&JobSpec::new(export("b")).max_attempts(2)).await.unwrap();
        let now = Utc::now();

        jobs.claim_next(now).await.unwrap().unwrap();
        jobs.reschedule(&job.id, "timeout", now).await.unwrap();

        let again = jobs.claim_next(now).await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);
        assert_eq!(again.last_error.as_deref(), Some("timeout"));

        jobs.mark_failed(&job.id, "timeout").await.unwrap();
        let stored = jobs.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_only_pending() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let jobs = db.jobs();

        let pending = jobs.enqueue(&JobSpec::new(export("a"))).await.unwrap();
        assert!(jobs.cancel(&pending.id).await.unwrap());
        assert!(!jobs.cancel(&pending.id).await.unwrap());

        let running = jobs.enqueue(&JobSpec::new(export("b"))).await.unwrap();
        jobs.claim_next(Utc::now()).await.unwrap().unwrap();
        assert!(!jobs.cancel(&running.id).await.unwrap());

        jobs.mark_done(&running.id, Some("ok")).await.unwrap();
        assert_eq!(jobs.count_by_state(JobState::Done).await.unwrap(), 1);
        assert_eq!(jobs.count_by_state(JobState::Cancelled).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_requeue_interrupted() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let jobs = db.jobs();

        jobs.enqueue(&JobSpec::new(export("a"))).await.unwrap();
        jobs.claim_next(Utc::now()).await.unwrap().unwrap();

        assert_eq!(jobs.requeue_interrupted().await.unwrap(), 1);
        assert_eq!(jobs.list_by_state(JobState::Pending).await.unwrap().len(), 1);
        assert_eq!(jobs.list_pending_named("export_invoice").await.unwrap().len(), 1);
    }
}
