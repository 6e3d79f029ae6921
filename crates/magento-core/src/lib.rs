//! # magento-core: Pure Synchronization Model
//!
//! This crate holds the data model shared by every layer of the connector.
//! It performs no I/O: no database, no network, no file system.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Magento Connector Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                magento-sync (orchestration)                     │   │
//! │  │  Importer ─ BatchImporter ─ Exporters ─ Listeners ─ JobWorker   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ magento-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  backend  │  │ category  │  │  trigger  │  │   │
//! │  │   │ Binding<M>│  │ ApiVersion│  │   tree    │  │  picking  │  │   │
//! │  │   │ EntityKind│  │  Stores   │  │ priority  │  │    job    │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 magento-db (SQLite layer)                       │   │
//! │  │        records, bindings, durable job queue, migrations         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Identifiers, entity kinds, `Binding<M>`
//! - [`backend`] - Backend connection configuration types
//! - [`record`] - External record accessors
//! - [`category`] - Category tree parsing and traversal
//! - [`trigger`] - Invoice export trigger rules
//! - [`picking`] - Picking classification and shipment items
//! - [`job`] - Deferred task descriptions and job states
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use magento_core::trigger::{resolve_invoice_trigger, InvoiceStatus, InvoiceState, PaymentState};
//! use magento_core::InvoiceTrigger;
//!
//! // A payment mode override beats the store setting.
//! let trigger = resolve_invoice_trigger(
//!     Some(InvoiceTrigger::Open),
//!     Some(InvoiceTrigger::Paid),
//!     InvoiceTrigger::Paid,
//! );
//! assert_eq!(trigger, InvoiceTrigger::Open);
//!
//! let validated = InvoiceStatus::new(InvoiceState::Posted, PaymentState::NotPaid);
//! assert!(trigger.matches(&validated));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backend;
pub mod category;
pub mod error;
pub mod job;
pub mod picking;
pub mod record;
pub mod trigger;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use backend::{
    ApiVersion, BackendConfig, Credentials, InvoiceTrigger, PaymentModePolicy, StoreSettings,
    StoreviewSettings,
};
pub use error::{CoreError, CoreResult};
pub use job::{BatchFilter, Job, JobState, SyncTask};
pub use record::{ExternalRecord, FieldMap};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Priority given to jobs when the caller has no opinion.
///
/// Lower values run first.
pub const DEFAULT_JOB_PRIORITY: i64 = 10;

/// Base priority of category import jobs; each tree level adds one.
pub const CATEGORY_BASE_PRIORITY: i64 = 10;

/// Deepest dependency chain an import may open before giving up.
pub const MAX_DEPENDENCY_DEPTH: usize = 32;

/// Attempts a job gets before it is marked failed.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;
