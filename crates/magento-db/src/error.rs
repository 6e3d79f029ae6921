//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError (magento-sync) ← Unique violations on bindings become       │
//! │       │                     retryable BindingConflict; Busy stays       │
//! │       │                     retryable                                   │
//! │       ▼                                                                 │
//! │  Job Queue retries or marks the job failed                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use magento_core::CoreError;
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Two imports of the same remote id race to create a binding
    /// - A record is bound twice for the same backend
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Binding a record id that does not exist
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Another connection holds the write lock, or this transaction's
    /// read snapshot went stale before its first write.
    ///
    /// ## When This Occurs
    /// - Two imports of the same remote id both read "unbound", one commits
    ///   first and the other's write is refused (SQLITE_BUSY_SNAPSHOT)
    #[error("Database busy: {0}")]
    Busy(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A JSON column could not be encoded or decoded.
    #[error("Invalid JSON column {column}: {message}")]
    InvalidJson { column: String, message: String },

    /// A stored value does not fit the domain model.
    #[error("Corrupt row: {0}")]
    Corrupt(#[from] CoreError),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates an InvalidJson error for a column.
    pub fn json(column: impl Into<String>, err: serde_json::Error) -> Self {
        DbError::InvalidJson {
            column: column.into(),
            message: err.to_string(),
        }
    }

    /// Returns true for unique constraint violations.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation { .. })
    }

    /// Returns true when the write lost a lock or snapshot race.
    pub fn is_busy(&self) -> bool {
        matches!(self, DbError::Busy(_))
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and their extended codes
/// (BUSY_RECOVERY, LOCKED_SHAREDCACHE, BUSY_SNAPSHOT).
const BUSY_CODES: [&str; 5] = ["5", "6", "261", "262", "517"];

fn is_busy_error(code: Option<&str>, msg: &str) -> bool {
    code.is_some_and(|c| BUSY_CODES.contains(&c))
        || msg.contains("database is locked")
        || msg.contains("database table is locked")
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type,
///                               busy/locked codes → DbError::Busy
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // SQLite error messages for constraints:
                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>, ..."
                // FK constraint: "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if is_busy_error(db_err.code().as_deref(), msg) {
                    DbError::Busy(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_helper() {
        assert!(DbError::duplicate("bindings.external_id", "41").is_unique_violation());
        assert!(!DbError::not_found("Binding", "b-1").is_unique_violation());
    }

    #[test]
    fn test_busy_codes_detected() {
        assert!(is_busy_error(Some("517"), "database is locked"));
        assert!(is_busy_error(Some("5"), ""));
        assert!(is_busy_error(None, "database table is locked: records"));
        assert!(!is_busy_error(Some("1"), "no such table: records"));
        assert!(!is_busy_error(Some("2067"), "UNIQUE constraint failed: bindings.external_id"));
    }

    #[test]
    fn test_busy_helper() {
        assert!(DbError::Busy("database is locked".into()).is_busy());
        assert!(!DbError::QueryFailed("database is locked".into()).is_busy());
    }

    #[test]
    fn test_core_error_converts() {
        let err: DbError = CoreError::UnknownKind("magento.foo".into()).into();
        assert!(matches!(err, DbError::Corrupt(_)));
    }
}
