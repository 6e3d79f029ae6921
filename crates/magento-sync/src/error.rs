//! # Sync Error Types
//!
//! Error types for import, export and job execution.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Remote        │  │     Import              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport  (R) │  │  Mapping                │ │
//! │  │  InvalidUrl     │  │  RecordNotFound │  │  CyclicDependency       │ │
//! │  │  UnknownBackend │  │  RemoteFault    │  │  DependencyTooDeep      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Binding      │  │     Export      │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Ambiguous      │  │  Precondition   │  │  Database (R when       │ │
//! │  │  Conflict   (R) │  │  NotYetExp. (R) │  │   pool/connection)      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  (R) = retryable: the job worker reschedules with backoff               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use magento_core::{CoreError, EntityKind, ExternalId};
use magento_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all import/export failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid connector configuration.
    #[error("Invalid connector configuration: {0}")]
    InvalidConfig(String),

    /// Invalid backend location.
    #[error("Invalid backend location: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// A task names a backend that is not configured.
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Network or protocol failure talking to the remote platform.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote platform reports the record does not exist.
    #[error("{kind} {external_id} does not exist on the remote platform")]
    RecordNotFound {
        kind: EntityKind,
        external_id: ExternalId,
    },

    /// The remote platform rejected the call.
    #[error("Remote fault {code}: {message}")]
    RemoteFault { code: i64, message: String },

    // =========================================================================
    // Import Errors
    // =========================================================================
    /// A remote record cannot be mapped to local fields.
    #[error("Cannot map {kind} {external_id}: {reason}")]
    Mapping {
        kind: EntityKind,
        external_id: ExternalId,
        reason: String,
    },

    /// A dependency import re-entered a record already being imported.
    #[error("Cyclic dependency importing {kind} {external_id} (chain: {chain})")]
    CyclicDependency {
        kind: EntityKind,
        external_id: ExternalId,
        chain: String,
    },

    /// Dependency imports nested deeper than allowed.
    #[error("Dependency chain deeper than {max} importing {kind} {external_id}")]
    DependencyTooDeep {
        kind: EntityKind,
        external_id: ExternalId,
        max: usize,
    },

    // =========================================================================
    // Binding Errors
    // =========================================================================
    /// The remote id is bound to another local record.
    #[error("{kind} {external_id} is already bound to {bound_to}, cannot bind {requested}")]
    AmbiguousBinding {
        kind: EntityKind,
        external_id: ExternalId,
        bound_to: String,
        requested: String,
    },

    /// A concurrent import bound the same remote id first.
    #[error("Concurrent binding of {kind} {external_id}")]
    BindingConflict {
        kind: EntityKind,
        external_id: ExternalId,
    },

    // =========================================================================
    // Export Errors
    // =========================================================================
    /// An export job's binding or record is not in an exportable state.
    #[error("Cannot export: {0}")]
    ExportPrecondition(String),

    /// The record an export builds on has no remote id yet.
    #[error("Binding {binding_id} has no remote id yet")]
    NotYetExported { binding_id: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[source] DbError),

    /// Invalid domain value.
    #[error("Invalid value: {0}")]
    Core(#[from] CoreError),

    /// Failed to (de)serialize a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Worker is shutting down.
    #[error("Job worker is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        SyncError::Database(err)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Builds a mapping error.
    pub fn mapping(kind: EntityKind, external_id: &ExternalId, reason: impl Into<String>) -> Self {
        SyncError::Mapping {
            kind,
            external_id: external_id.clone(),
            reason: reason.into(),
        }
    }

    /// Returns true if the job should be retried later.
    ///
    /// ## Retryable Errors
    /// - Transport failures
    /// - Binding conflicts (the winner's binding is visible on retry)
    /// - Exports waiting for an earlier export (shipment before tracking)
    /// - Pool exhaustion and lost connections
    /// - Busy or stale-snapshot writes (a concurrent import committed first)
    ///
    /// ## Non-Retryable Errors
    /// - Missing remote records
    /// - Malformed remote data (cycles, mapping failures)
    /// - Ambiguous bindings (need an operator)
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_)
            | SyncError::BindingConflict { .. }
            | SyncError::NotYetExported { .. } => true,
            SyncError::Database(db) => matches!(
                db,
                DbError::PoolExhausted
                    | DbError::Busy(_)
                    | DbError::ConnectionFailed(_)
                    | DbError::TransactionFailed(_)
            ),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
                | SyncError::UnknownBackend(_)
        )
    }

    /// Returns true for `RecordNotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::RecordNotFound { .. })
    }
}
