//! # Binding Registry
//!
//! Resolves local record ids to remote ids and back, per backend and kind,
//! and owns the rule that one remote id is bound to at most one local record.
//!
//! ## Bind Decision
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  bind(internal, external) inside a SyncTx                              │
//! │                                                                         │
//! │  external bound?  ── yes, other internal ──► AmbiguousBinding          │
//! │        │          ── yes, same internal  ──► refresh sync_date, data   │
//! │        no                                                               │
//! │        ▼                                                                │
//! │  internal bound? ── yes ──► set external id (pending export resolved)  │
//! │        │                                                                │
//! │        no ──► insert (unique violation ⇒ BindingConflict, retryable)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lookups go through the pool; `bind` writes through the caller's
//! transaction so the binding and the record commit together.

use std::marker::PhantomData;

use chrono::Utc;
use tracing::debug;

use magento_core::{
    BackendId, Binding, BindingModel, BindingRecord, EntityKind, ExternalId, FieldMap, InternalId,
};
use magento_db::{new_binding, Database, DbError, SyncTx};

use crate::error::{SyncError, SyncResult};

/// Binding lookups and writes for one backend and kind.
#[derive(Debug, Clone)]
pub struct BindingRegistry {
    db: Database,
    backend_id: BackendId,
    kind: EntityKind,
}

impl BindingRegistry {
    pub fn new(db: Database, backend_id: BackendId, kind: EntityKind) -> Self {
        BindingRegistry {
            db,
            backend_id,
            kind,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn backend_id(&self) -> &BackendId {
        &self.backend_id
    }

    /// The same backend, another kind.
    pub fn for_kind(&self, kind: EntityKind) -> Self {
        BindingRegistry {
            db: self.db.clone(),
            backend_id: self.backend_id.clone(),
            kind,
        }
    }

    /// Binding owning a remote id.
    pub async fn to_internal(&self, external_id: &ExternalId) -> SyncResult<Option<BindingRecord>> {
        Ok(self
            .db
            .bindings()
            .find_by_external(&self.backend_id, self.kind, external_id)
            .await?)
    }

    /// Remote id of a local record, `None` when unbound or pending export.
    pub async fn to_external(&self, internal_id: &InternalId) -> SyncResult<Option<ExternalId>> {
        Ok(self
            .db
            .bindings()
            .find_by_internal(&self.backend_id, self.kind, internal_id)
            .await?
            .and_then(|b| b.external_id))
    }

    /// Creates or refreshes the pairing of `internal_id` and `external_id`.
    ///
    /// `data` is merged into the binding's data.
    pub async fn bind(
        &self,
        tx: &mut SyncTx,
        internal_id: &InternalId,
        external_id: &ExternalId,
        data: FieldMap,
    ) -> SyncResult<BindingRecord> {
        let now = Utc::now();

        if let Some(mut existing) = tx
            .find_binding_by_external(&self.backend_id, self.kind, external_id)
            .await?
        {
            if &existing.internal_id != internal_id {
                return Err(SyncError::AmbiguousBinding {
                    kind: self.kind,
                    external_id: external_id.clone(),
                    bound_to: existing.internal_id.to_string(),
                    requested: internal_id.to_string(),
                });
            }
            existing.data.extend(data);
            existing.sync_date = Some(now);
            existing.updated_at = now;
            tx.update_binding(&existing).await?;
            return Ok(existing);
        }

        if let Some(mut existing) = tx
            .find_binding_by_internal(&self.backend_id, self.kind, internal_id)
            .await?
        {
            debug!(binding = %existing.id, external_id = %external_id, "Rebinding record");
            existing.external_id = Some(external_id.clone());
            existing.data.extend(data);
            existing.sync_date = Some(now);
            existing.updated_at = now;
            tx.update_binding(&existing)
                .await
                .map_err(|e| self.conflict(e, external_id))?;
            return Ok(existing);
        }

        let mut binding = new_binding(
            &self.backend_id,
            self.kind,
            internal_id,
            Some(external_id.clone()),
            data,
        );
        binding.sync_date = Some(now);
        tx.insert_binding(&binding)
            .await
            .map_err(|e| self.conflict(e, external_id))?;
        debug!(binding = %binding.id, external_id = %external_id, "Binding created");
        Ok(binding)
    }

    /// Creates a binding without remote id, awaiting export.
    ///
    /// Returns `None` when the record already has a binding on this backend.
    pub async fn bind_pending(
        &self,
        tx: &mut SyncTx,
        internal_id: &InternalId,
        data: FieldMap,
    ) -> SyncResult<Option<BindingRecord>> {
        if tx
            .find_binding_by_internal(&self.backend_id, self.kind, internal_id)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let binding = new_binding(&self.backend_id, self.kind, internal_id, None, data);
        match tx.insert_binding(&binding).await {
            Ok(()) => Ok(Some(binding)),
            Err(e) if e.is_unique_violation() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn conflict(&self, err: DbError, external_id: &ExternalId) -> SyncError {
        if err.is_unique_violation() {
            SyncError::BindingConflict {
                kind: self.kind,
                external_id: external_id.clone(),
            }
        } else {
            err.into()
        }
    }
}

// =============================================================================
// Typed Facade
// =============================================================================

/// Binding registry narrowed to one binding model.
#[derive(Debug, Clone)]
pub struct Binder<M: BindingModel> {
    registry: BindingRegistry,
    _model: PhantomData<fn() -> M>,
}

impl<M: BindingModel> Binder<M> {
    pub fn new(db: Database, backend_id: BackendId) -> Self {
        Binder {
            registry: BindingRegistry::new(db, backend_id, M::KIND),
            _model: PhantomData,
        }
    }

    pub fn registry(&self) -> &BindingRegistry {
        &self.registry
    }

    pub async fn to_internal(&self, external_id: &ExternalId) -> SyncResult<Option<Binding<M>>> {
        self.registry
            .to_internal(external_id)
            .await?
            .map(Binding::try_from_record)
            .transpose()
            .map_err(SyncError::from)
    }

    pub async fn to_external(&self, internal_id: &InternalId) -> SyncResult<Option<ExternalId>> {
        self.registry.to_external(internal_id).await
    }

    pub async fn bind(
        &self,
        tx: &mut SyncTx,
        internal_id: &InternalId,
        external_id: &ExternalId,
        data: FieldMap,
    ) -> SyncResult<Binding<M>> {
        let record = self.registry.bind(tx, internal_id, external_id, data).await?;
        Ok(Binding::try_from_record(record)?)
    }
}
