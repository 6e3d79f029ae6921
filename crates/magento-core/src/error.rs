//! # Error Types
//!
//! Domain-specific error types for magento-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  magento-core errors (this file)                                       │
//! │  └── CoreError        - Malformed values, kind mismatches              │
//! │                                                                         │
//! │  magento-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  magento-sync errors (separate crate)                                  │
//! │  └── SyncError        - Transport, mapping, binding, job failures      │
//! │                                                                         │
//! │  Flow: CoreError → DbError → SyncError → Job Queue (retry or fail)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Core domain errors.
///
/// These never involve I/O; they describe values that cannot be interpreted.
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    /// A field holds a value the domain cannot interpret.
    #[error("{field} has invalid value: {reason}")]
    InvalidValue { field: String, reason: String },

    /// A required field is absent from an external record.
    #[error("{field} is missing")]
    MissingField { field: String },

    /// A binding was read for one model but used as another.
    ///
    /// ## When This Occurs
    /// - `Binding::<Invoice>::try_from_record` given a picking binding row
    #[error("Binding model mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: String, actual: String },

    /// An entity kind name that is not known to the connector.
    #[error("Unknown entity kind: {0}")]
    UnknownKind(String),

    /// An API version string that is not supported.
    #[error("Unsupported API version: '{0}'. Valid options: 1.7, 2.0")]
    UnknownVersion(String),

    /// The remote category tree could not be understood.
    #[error("Malformed category tree: {0}")]
    MalformedTree(String),
}

impl CoreError {
    /// Creates an InvalidValue error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a MissingField error.
    pub fn missing(field: impl Into<String>) -> Self {
        CoreError::MissingField {
            field: field.into(),
        }
    }
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::KindMismatch {
            expected: "magento.account.move".to_string(),
            actual: "magento.stock.picking".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Binding model mismatch: expected magento.account.move, got magento.stock.picking"
        );

        assert_eq!(CoreError::missing("parent_id").to_string(), "parent_id is missing");
    }
}
