//! # Domain Types
//!
//! Identifiers, entity kinds and the generic binding type.
//!
//! ## Two Identifier Spaces
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Binding = one bridge per backend                    │
//! │                                                                         │
//! │   Local record store                          Remote platform           │
//! │  ┌───────────────────┐    ┌──────────────┐   ┌───────────────────┐     │
//! │  │ InternalId (UUID) │◄──►│  Binding<M>  │◄─►│ ExternalId (text) │     │
//! │  │ product.category  │    │ backend_id   │   │ "41", "100000201" │     │
//! │  └───────────────────┘    │ sync_date    │   └───────────────────┘     │
//! │                           └──────────────┘                              │
//! │                                                                         │
//! │  (backend, model, external_id) unique                                   │
//! │  (backend, model, internal_id) unique                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! External ids are text because `0` is a valid remote id and some kinds
//! (sale orders) use increment ids such as `"100000201"`.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CoreError;
use crate::record::FieldMap;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a record on the remote platform, scoped by backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    /// Wraps a remote identifier.
    pub fn new(id: impl Into<String>) -> Self {
        ExternalId(id.into())
    }

    /// Reads an identifier out of a JSON value.
    ///
    /// Numbers are rendered as text; empty strings and nulls yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(ExternalId(s.clone())),
            Value::Number(n) => Some(ExternalId(n.to_string())),
            _ => None,
        }
    }

    /// Returns the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExternalId {
    fn from(s: &str) -> Self {
        ExternalId(s.to_string())
    }
}

impl From<String> for ExternalId {
    fn from(s: String) -> Self {
        ExternalId(s)
    }
}

/// Identifier of a record in the local record store (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InternalId(String);

impl InternalId {
    /// Generates a fresh identifier.
    pub fn generate() -> Self {
        InternalId(Uuid::new_v4().to_string())
    }

    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        InternalId(id.into())
    }

    /// Returns the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InternalId {
    fn from(s: &str) -> Self {
        InternalId(s.to_string())
    }
}

/// Identifier of a configured backend connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    pub fn new(id: impl Into<String>) -> Self {
        BackendId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(s: &str) -> Self {
        BackendId(s.to_string())
    }
}

// =============================================================================
// Entity Kind
// =============================================================================

/// The kinds of records the connector synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ProductCategory,
    Product,
    Partner,
    SaleOrder,
    Invoice,
    Picking,
}

impl EntityKind {
    /// All kinds, in dependency order.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::ProductCategory,
        EntityKind::Product,
        EntityKind::Partner,
        EntityKind::SaleOrder,
        EntityKind::Invoice,
        EntityKind::Picking,
    ];

    /// Name of the binding model, stored in the `bindings.model` column.
    pub fn binding_model(&self) -> &'static str {
        match self {
            EntityKind::ProductCategory => "magento.product.category",
            EntityKind::Product => "magento.product.product",
            EntityKind::Partner => "magento.res.partner",
            EntityKind::SaleOrder => "magento.sale.order",
            EntityKind::Invoice => "magento.account.move",
            EntityKind::Picking => "magento.stock.picking",
        }
    }

    /// Name of the local model the binding points at.
    pub fn internal_model(&self) -> &'static str {
        match self {
            EntityKind::ProductCategory => "product.category",
            EntityKind::Product => "product.product",
            EntityKind::Partner => "res.partner",
            EntityKind::SaleOrder => "sale.order",
            EntityKind::Invoice => "account.move",
            EntityKind::Picking => "stock.picking",
        }
    }

    /// Short snake_case name used in logs and job payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::ProductCategory => "product_category",
            EntityKind::Product => "product",
            EntityKind::Partner => "partner",
            EntityKind::SaleOrder => "sale_order",
            EntityKind::Invoice => "invoice",
            EntityKind::Picking => "picking",
        }
    }

    /// Resolves a kind from its binding model name.
    pub fn from_binding_model(model: &str) -> Result<Self, CoreError> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.binding_model() == model)
            .ok_or_else(|| CoreError::UnknownKind(model.to_string()))
    }

    /// Whether records of this kind are imported from the remote platform.
    pub fn is_importable(&self) -> bool {
        matches!(
            self,
            EntityKind::ProductCategory
                | EntityKind::Product
                | EntityKind::Partner
                | EntityKind::SaleOrder
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "product_category" | "category" => Ok(EntityKind::ProductCategory),
            "product" => Ok(EntityKind::Product),
            "partner" | "customer" => Ok(EntityKind::Partner),
            "sale_order" | "order" => Ok(EntityKind::SaleOrder),
            "invoice" => Ok(EntityKind::Invoice),
            "picking" | "shipment" => Ok(EntityKind::Picking),
            other => EntityKind::from_binding_model(other),
        }
    }
}

// =============================================================================
// Binding Models
// =============================================================================

/// Marker trait tying a binding type to its entity kind.
pub trait BindingModel: Send + Sync + 'static {
    const KIND: EntityKind;
}

/// Marker types, one per binding model.
pub mod model {
    use super::{BindingModel, EntityKind};

    macro_rules! binding_model {
        ($name:ident, $kind:expr) => {
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name;

            impl BindingModel for $name {
                const KIND: EntityKind = $kind;
            }
        };
    }

    binding_model!(ProductCategory, EntityKind::ProductCategory);
    binding_model!(Product, EntityKind::Product);
    binding_model!(Partner, EntityKind::Partner);
    binding_model!(SaleOrder, EntityKind::SaleOrder);
    binding_model!(Invoice, EntityKind::Invoice);
    binding_model!(Picking, EntityKind::Picking);
}

// =============================================================================
// Binding
// =============================================================================

/// A binding row as stored, without compile-time knowledge of its model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingRecord {
    /// Binding identifier (UUID v4).
    pub id: String,

    /// Backend the binding belongs to.
    pub backend_id: BackendId,

    /// Entity kind of the bound record.
    pub kind: EntityKind,

    /// Local record this binding owns.
    pub internal_id: InternalId,

    /// Remote identifier; `None` until a pending export succeeds.
    pub external_id: Option<ExternalId>,

    /// Last time the record was synchronized.
    pub sync_date: Option<DateTime<Utc>>,

    /// Binding-specific values (store id, picking method, order binding).
    pub data: FieldMap,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BindingRecord {
    /// Returns a string value from the binding data.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// A binding whose model is known at compile time.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding<M: BindingModel> {
    record: BindingRecord,
    _model: PhantomData<fn() -> M>,
}

impl<M: BindingModel> Binding<M> {
    /// Narrows an untyped binding row, checking its kind.
    pub fn try_from_record(record: BindingRecord) -> Result<Self, CoreError> {
        if record.kind != M::KIND {
            return Err(CoreError::KindMismatch {
                expected: M::KIND.binding_model().to_string(),
                actual: record.kind.binding_model().to_string(),
            });
        }
        Ok(Binding {
            record,
            _model: PhantomData,
        })
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn backend_id(&self) -> &BackendId {
        &self.record.backend_id
    }

    pub fn internal_id(&self) -> &InternalId {
        &self.record.internal_id
    }

    pub fn external_id(&self) -> Option<&ExternalId> {
        self.record.external_id.as_ref()
    }

    pub fn data(&self) -> &FieldMap {
        &self.record.data
    }

    /// Returns the untyped row.
    pub fn record(&self) -> &BindingRecord {
        &self.record
    }

    pub fn into_record(self) -> BindingRecord {
        self.record
    }
}

// =============================================================================
// Internal Record
// =============================================================================

/// A record of the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalRecord {
    pub id: InternalId,

    /// Local model name (`product.category`, `account.move`, ...).
    pub model: String,

    pub fields: FieldMap,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InternalRecord {
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}
