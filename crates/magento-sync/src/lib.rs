//! # magento-sync: Import/Export Orchestration
//!
//! This crate moves records between the local record store and a remote
//! Magento platform (1.7 RPC or 2.0 REST).
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Connector Architecture                           │
//! │                                                                         │
//! │  IMPORT                                                                 │
//! │  ──────                                                                 │
//! │  BatchImporter ──search / tree──► one ImportRecord job per id           │
//! │                                                                         │
//! │  Importer::import(kind, id)                                             │
//! │    read ──► dependencies (recursive, cycle/depth guarded)               │
//! │         ──► mapper ──► record + binding in one SyncTx ──► hooks         │
//! │                                                                         │
//! │  EXPORT                                                                 │
//! │  ──────                                                                 │
//! │  host ──DomainEvent──► EventBus ──► InvoiceExportListener               │
//! │                                 └─► PickingExportListener               │
//! │                 pending binding + export job (one transaction)          │
//! │                                                                         │
//! │  JobWorker ──claim──► Exporter ──create_invoice / create_shipment──►    │
//! │            retryable errors rescheduled with exponential backoff        │
//! │                                                                         │
//! │  SEAM                                                                   │
//! │  ────                                                                   │
//! │  RemoteApi::call(RemoteCall) is supplied by the host (HTTP, XML-RPC).   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`adapter`] - Remote resources per entity kind, 1.7 and 2.0 strategies
//! - [`batch`] - Batch importers (category tree, flat search)
//! - [`binder`] - Binding registry and typed binders
//! - [`config`] - Connector configuration (TOML)
//! - [`connector`] - Facade wiring everything together
//! - [`error`] - Sync error types
//! - [`events`] - Domain events and the event bus
//! - [`exporter`] - Invoice, shipment and tracking exports
//! - [`hooks`] - After-import hooks (category translations)
//! - [`importer`] - Per-record import state machine
//! - [`listeners`] - Export triggers
//! - [`mapper`] - Remote to local field mapping
//! - [`queue`] - Job queue client
//! - [`remote`] - Remote API seam
//! - [`worker`] - Job worker with retry policy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use magento_sync::{Connector, ConnectorConfig, DomainEvent};
//! use magento_db::{Database, DbConfig};
//!
//! let config = ConnectorConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//! let connector = Arc::new(Connector::new(db, config, transport));
//!
//! let (worker, worker_handle) = connector.worker();
//! tokio::spawn(worker.run());
//!
//! connector.publish(DomainEvent::InvoicePaid { invoice_id }).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod adapter;
pub mod batch;
pub mod binder;
pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod exporter;
pub mod hooks;
pub mod importer;
pub mod listeners;
pub mod mapper;
pub mod queue;
pub mod remote;
pub mod worker;

#[cfg(test)]
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use adapter::{AdapterStrategy, MagentoAdapter};
pub use batch::{BatchFailure, BatchImporter, BatchMode, BatchReport};
pub use binder::{Binder, BindingRegistry};
pub use config::{ConnectorConfig, DatabaseSettings, WorkerSettings};
pub use connector::Connector;
pub use error::{SyncError, SyncResult};
pub use events::{DomainEvent, EventBus, EventHandler};
pub use exporter::{ExportOutcome, Exporter, TrackingOutcome};
pub use hooks::{AfterImportHook, CategoryTranslationHook, HookContext};
pub use importer::{ImportAction, ImportOutcome, Importer};
pub use listeners::{register_export_listeners, InvoiceExportListener, PickingExportListener};
pub use mapper::{ImportMapper, MapContext, MappedRecord};
pub use queue::{JobHandle, JobQueue};
pub use remote::{CallArgs, HttpMethod, RemoteApi, RemoteCall, RemoteFault};
pub use worker::{JobWorker, JobWorkerHandle, TaskRunner, WorkerReport};
