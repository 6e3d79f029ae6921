//! # Repository Module
//!
//! Database repository implementations for the connector.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Importer                                                               │
//! │       │  db.bindings().find_by_external(&backend, kind, &id)            │
//! │       ▼                                                                 │
//! │  BindingRepository ──┐                                                  │
//! │                      ├──► query helpers (generic over SqliteExecutor)   │
//! │  SyncTx ─────────────┘            │                                     │
//! │                                   ▼                                     │
//! │                            SQLite Database                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every query lives once, in a crate-private helper taking any
//! `SqliteExecutor`. Repositories call it with the pool, [`SyncTx`] with its
//! open transaction.
//!
//! ## Available Repositories
//!
//! - [`RecordRepository`] - Local record store
//! - [`BindingRepository`] - Local ↔ remote id bindings
//! - [`JobRepository`] - Durable job queue
//!
//! [`SyncTx`]: crate::tx::SyncTx
//! [`RecordRepository`]: record::RecordRepository
//! [`BindingRepository`]: binding::BindingRepository
//! [`JobRepository`]: job::JobRepository

pub mod binding;
pub mod job;
pub mod record;

use magento_core::FieldMap;

use crate::error::{DbError, DbResult};

/// Decodes a JSON object column.
pub(crate) fn decode_map(column: &str, raw: &str) -> DbResult<FieldMap> {
    serde_json::from_str(raw).map_err(|e| DbError::json(column, e))
}

/// Encodes a JSON object column.
pub(crate) fn encode_map(column: &str, map: &FieldMap) -> DbResult<String> {
    serde_json::to_string(map).map_err(|e| DbError::json(column, e))
}
