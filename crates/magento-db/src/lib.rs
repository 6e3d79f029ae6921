//! # magento-db: Database Layer for the Magento Connector
//!
//! Local persistence for the connector: the record store the importers
//! write into, the binding table linking local records to remote ids, and
//! the durable job queue.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Connector Data Flow                              │
//! │                                                                         │
//! │  Importer / Listener / Job Worker (magento-sync)                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    magento-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ RecordRepo    │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ BindingRepo   │    │ 001_initial  │  │   │
//! │  │   │ SyncTx        │    │ JobRepo       │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database (connector.db)                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Record, binding and job repositories
//! - [`tx`] - Transactional unit of work
//!
//! ## Usage
//!
//! ```rust,ignore
//! use magento_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("connector.db")).await?;
//!
//! let mut tx = db.begin().await?;
//! let record = tx.insert_record("product.category", fields).await?;
//! tx.insert_binding(&binding).await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod tx;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use tx::SyncTx;

pub use repository::binding::{new_binding, BindingRepository};
pub use repository::job::{JobRepository, JobSpec};
pub use repository::record::RecordRepository;
