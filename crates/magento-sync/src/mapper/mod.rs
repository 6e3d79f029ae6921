//! # Import Mappers
//!
//! Turn a remote record into local field values.
//!
//! ## Field Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ExternalRecord ──► ImportMapper::to_internal ──► MappedRecord          │
//! │                                                                         │
//! │  direct copy     description ─────────────► description                │
//! │  computed        firstname + lastname ─────► name                       │
//! │  relational      parent_id "3" ── registry ► parent_id "<uuid>"         │
//! │                                  └── unbound ⇒ SyncError::Mapping       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `dependencies` lists the remote ids the relational rules need. The
//! importer imports the unbound ones before mapping, so a `Mapping` error
//! raised by `to_internal` means a dependency could not be brought in.

pub mod category;
pub mod partner;
pub mod product;
pub mod sale_order;

use std::sync::Arc;

use async_trait::async_trait;

use magento_core::{BackendConfig, BindingRecord, EntityKind, ExternalId, ExternalRecord, FieldMap, InternalId};

use crate::binder::BindingRegistry;
use crate::error::{SyncError, SyncResult};

pub use category::CategoryMapper;
pub use partner::PartnerMapper;
pub use product::ProductMapper;
pub use sale_order::SaleOrderMapper;

/// Local values produced from one remote record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRecord {
    /// Fields of the local record.
    pub fields: FieldMap,
    /// Values kept on the binding (store id, remote entity id).
    pub binding_data: FieldMap,
}

/// What a mapper may look at besides the record itself.
pub struct MapContext<'a> {
    pub backend: &'a BackendConfig,
    pub external_id: &'a ExternalId,
    /// Binding of the record when it was imported before.
    pub existing: Option<&'a BindingRecord>,
    registry: &'a BindingRegistry,
}

impl<'a> MapContext<'a> {
    pub fn new(
        backend: &'a BackendConfig,
        registry: &'a BindingRegistry,
        external_id: &'a ExternalId,
        existing: Option<&'a BindingRecord>,
    ) -> Self {
        MapContext {
            backend,
            external_id,
            existing,
            registry,
        }
    }

    /// Resolves a required relation; unbound ⇒ `Mapping`.
    pub async fn resolve(&self, kind: EntityKind, external_id: &ExternalId) -> SyncResult<InternalId> {
        self.resolve_optional(kind, external_id).await?.ok_or_else(|| {
            SyncError::mapping(
                self.registry.kind(),
                self.external_id,
                format!("{} {} is not imported", kind, external_id),
            )
        })
    }

    /// Resolves a relation that may legitimately be missing.
    pub async fn resolve_optional(
        &self,
        kind: EntityKind,
        external_id: &ExternalId,
    ) -> SyncResult<Option<InternalId>> {
        Ok(self
            .registry
            .for_kind(kind)
            .to_internal(external_id)
            .await?
            .map(|b| b.internal_id))
    }
}

/// Remote-to-local mapping of one entity kind.
#[async_trait]
pub trait ImportMapper: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Remote records this one refers to, which must be bound before mapping.
    fn dependencies(&self, record: &ExternalRecord, backend: &BackendConfig) -> Vec<(EntityKind, ExternalId)>;

    async fn to_internal(&self, record: &ExternalRecord, ctx: &MapContext<'_>) -> SyncResult<MappedRecord>;
}

/// The mapper of an importable kind.
pub fn mapper_for(kind: EntityKind) -> SyncResult<Arc<dyn ImportMapper>> {
    match kind {
        EntityKind::ProductCategory => Ok(Arc::new(CategoryMapper)),
        EntityKind::Product => Ok(Arc::new(ProductMapper)),
        EntityKind::Partner => Ok(Arc::new(PartnerMapper)),
        EntityKind::SaleOrder => Ok(Arc::new(SaleOrderMapper)),
        EntityKind::Invoice | EntityKind::Picking => Err(SyncError::InvalidConfig(format!(
            "{} records are exported, not imported",
            kind
        ))),
    }
}

/// A remote reference, `None` for absent, empty or `0`.
pub(crate) fn reference(record: &ExternalRecord, key: &str) -> Option<ExternalId> {
    record.get_id(key).filter(|id| id.as_str() != "0")
}
