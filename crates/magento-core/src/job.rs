//! # Deferred Tasks
//!
//! Descriptions of the work the job queue executes later, possibly on a
//! different worker and after unrelated jobs.
//!
//! ## Job Lifecycle
//! ```text
//!   enqueue ──► PENDING ──claim──► STARTED ──ok──► DONE
//!                  │  ▲                │
//!          cancel  │  │ retryable      │ permanent / attempts exhausted
//!                  ▼  └────────────────┤
//!              CANCELLED               ▼
//!                                    FAILED
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::FieldMap;
use crate::types::{BackendId, EntityKind, ExternalId};

/// Date range and extra filters of a batch import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchFilter {
    /// Inclusive lower bound on the remote modification date.
    #[serde(default)]
    pub from_date: Option<DateTime<Utc>>,

    /// Inclusive upper bound on the remote modification date.
    #[serde(default)]
    pub to_date: Option<DateTime<Utc>>,

    /// Additional equality filters passed through to the remote search.
    #[serde(default)]
    pub filters: FieldMap,
}

impl BatchFilter {
    pub fn between(from_date: Option<DateTime<Utc>>, to_date: Option<DateTime<Utc>>) -> Self {
        BatchFilter {
            from_date,
            to_date,
            filters: FieldMap::new(),
        }
    }

    /// Whether a date range restricts the batch.
    pub fn has_date_range(&self) -> bool {
        self.from_date.is_some() || self.to_date.is_some()
    }
}

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum SyncTask {
    /// Import one remote record.
    ImportRecord {
        backend_id: BackendId,
        kind: EntityKind,
        external_id: ExternalId,
        #[serde(default)]
        force: bool,
    },

    /// Enumerate remote records and schedule their imports.
    ImportBatch {
        backend_id: BackendId,
        kind: EntityKind,
        #[serde(default)]
        filter: BatchFilter,
    },

    /// Create the remote invoice for an invoice binding.
    ExportInvoice { binding_id: String },

    /// Create the remote shipment for a picking binding.
    ExportPickingDone {
        binding_id: String,
        #[serde(default)]
        with_tracking: bool,
    },

    /// Attach the tracking number to an exported shipment.
    ExportTrackingNumber { binding_id: String },
}

impl SyncTask {
    /// Short name used in logs and the `jobs.name` column.
    pub fn name(&self) -> &'static str {
        match self {
            SyncTask::ImportRecord { .. } => "import_record",
            SyncTask::ImportBatch { .. } => "import_batch",
            SyncTask::ExportInvoice { .. } => "export_invoice",
            SyncTask::ExportPickingDone { .. } => "export_picking_done",
            SyncTask::ExportTrackingNumber { .. } => "export_tracking_number",
        }
    }
}

impl fmt::Display for SyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTask::ImportRecord {
                backend_id,
                kind,
                external_id,
                ..
            } => write!(f, "import {} {} from {}", kind, external_id, backend_id),
            SyncTask::ImportBatch {
                backend_id, kind, ..
            } => write!(f, "batch import of {} from {}", kind, backend_id),
            SyncTask::ExportInvoice { binding_id } => write!(f, "export invoice {}", binding_id),
            SyncTask::ExportPickingDone { binding_id, .. } => {
                write!(f, "export picking {}", binding_id)
            }
            SyncTask::ExportTrackingNumber { binding_id } => {
                write!(f, "export tracking of {}", binding_id)
            }
        }
    }
}

/// The state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker (or for its eta).
    Pending,
    /// Claimed by a worker.
    Started,
    /// Finished successfully.
    Done,
    /// Finished with a permanent error or out of attempts.
    Failed,
    /// Withdrawn before execution.
    Cancelled,
}

impl JobState {
    /// Whether the job will not change state again.
    pub fn is_final(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }
}

/// A job as stored in the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub task: SyncTask,

    /// Lower runs first.
    pub priority: i64,

    pub state: JobState,
    pub attempts: i64,
    pub max_attempts: i64,

    /// Not executed before this instant.
    pub eta: DateTime<Utc>,

    pub last_error: Option<String>,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_is_internally_tagged() {
        let task = SyncTask::ExportPickingDone {
            binding_id: "b-1".into(),
            with_tracking: false,
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(
            value,
            json!({"task": "export_picking_done", "binding_id": "b-1", "with_tracking": false})
        );

        let back: SyncTask = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_import_task_defaults_force() {
        let task: SyncTask = serde_json::from_value(json!({
            "task": "import_record",
            "backend_id": "mage",
            "kind": "product_category",
            "external_id": "41"
        }))
        .unwrap();
        assert!(matches!(task, SyncTask::ImportRecord { force: false, .. }));
        assert_eq!(task.to_string(), "import product_category 41 from mage");
    }

    #[test]
    fn test_final_states() {
        assert!(!JobState::Pending.is_final());
        assert!(!JobState::Started.is_final());
        assert!(JobState::Done.is_final());
        assert!(JobState::Cancelled.is_final());
    }
}
