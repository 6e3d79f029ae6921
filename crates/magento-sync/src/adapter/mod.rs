//! # Backend Adapters
//!
//! Remote calls for one entity kind, in the payload shape of the backend's
//! API version.
//!
//! ## Strategy Selection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BackendConfig.version ──► AdapterStrategy                              │
//! │                                                                         │
//! │           │ 1.7 (V1_7)                    │ 2.0 (V2_0)                  │
//! │  ─────────┼───────────────────────────────┼──────────────────────────── │
//! │  search   │ <model>.search [filters]      │ GET <list path>?searchCrit. │
//! │  read     │ <model>.info [id, storeview]  │ GET <path>/<id>             │
//! │  create   │ <model>.create [payload]      │ POST <path> {envelope}      │
//! │  update   │ <model>.update [id, payload]  │ PUT <path>/<id> {envelope}  │
//! │  missing  │ fault 100 / 101 / 102         │ HTTP 404                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both strategies normalize "does not exist" into
//! [`SyncError::RecordNotFound`] and connection failures into the retryable
//! [`SyncError::Transport`].

pub mod category;
pub mod invoice;
pub mod picking;

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, instrument};

use magento_core::record::format_remote_datetime;
use magento_core::{ApiVersion, BatchFilter, EntityKind, ExternalId, ExternalRecord, FieldMap};

use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteApi, RemoteCall, RemoteFault};

/// 1.7 fault codes meaning "no such record".
const NOT_FOUND_FAULTS: [i64; 3] = [100, 101, 102];

// =============================================================================
// Strategy
// =============================================================================

/// Payload shape of the remote API, chosen once from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStrategy {
    V1_7,
    V2_0,
}

impl From<ApiVersion> for AdapterStrategy {
    fn from(version: ApiVersion) -> Self {
        match version {
            ApiVersion::V1_7 => AdapterStrategy::V1_7,
            ApiVersion::V2_0 => AdapterStrategy::V2_0,
        }
    }
}

/// Remote names of one entity kind.
#[derive(Debug, Clone, Copy)]
struct Resource {
    /// 1.7 API model (`catalog_category`).
    model: &'static str,
    /// 2.0 path of single records (`categories`).
    path: &'static str,
    /// 2.0 path of searches (`categories/list`).
    search_path: &'static str,
    /// 2.0 key naming the record id in answers.
    key: &'static str,
    /// 2.0 body envelope of create/update payloads.
    envelope: &'static str,
}

fn resource(kind: EntityKind) -> Resource {
    match kind {
        EntityKind::ProductCategory => Resource {
            model: "catalog_category",
            path: "categories",
            search_path: "categories/list",
            key: "id",
            envelope: "category",
        },
        EntityKind::Product => Resource {
            model: "catalog_product",
            path: "products",
            search_path: "products",
            key: "sku",
            envelope: "product",
        },
        EntityKind::Partner => Resource {
            model: "customer",
            path: "customers",
            search_path: "customers/search",
            key: "id",
            envelope: "customer",
        },
        EntityKind::SaleOrder => Resource {
            model: "sales_order",
            path: "orders",
            search_path: "orders",
            key: "entity_id",
            envelope: "entity",
        },
        EntityKind::Invoice => Resource {
            model: "sales_order_invoice",
            path: "invoices",
            search_path: "invoices",
            key: "entity_id",
            envelope: "entity",
        },
        EntityKind::Picking => Resource {
            model: "sales_order_shipment",
            path: "shipments",
            search_path: "shipments",
            key: "entity_id",
            envelope: "entity",
        },
    }
}

/// 1.7 key naming the record id in search answers.
fn v1_key(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::ProductCategory => "category_id",
        EntityKind::Product => "product_id",
        EntityKind::Partner => "customer_id",
        EntityKind::SaleOrder => "increment_id",
        EntityKind::Invoice | EntityKind::Picking => "increment_id",
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Remote operations on one entity kind of one backend.
#[derive(Clone)]
pub struct MagentoAdapter {
    api: Arc<dyn RemoteApi>,
    strategy: AdapterStrategy,
    kind: EntityKind,
}

impl std::fmt::Debug for MagentoAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MagentoAdapter")
            .field("strategy", &self.strategy)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl MagentoAdapter {
    pub fn new(api: Arc<dyn RemoteApi>, strategy: AdapterStrategy, kind: EntityKind) -> Self {
        MagentoAdapter {
            api,
            strategy,
            kind,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn strategy(&self) -> AdapterStrategy {
        self.strategy
    }

    /// The same transport and strategy, for another kind.
    pub fn for_kind(&self, kind: EntityKind) -> Self {
        MagentoAdapter {
            api: Arc::clone(&self.api),
            strategy: self.strategy,
            kind,
        }
    }

    /// Lists remote ids matching the filter.
    ///
    /// The date range bounds are inclusive.
    #[instrument(skip(self, filter), fields(kind = %self.kind))]
    pub async fn search(&self, filter: &BatchFilter) -> SyncResult<Vec<ExternalId>> {
        let res = resource(self.kind);
        let answer = match self.strategy {
            AdapterStrategy::V1_7 => {
                let call = RemoteCall::positional(
                    format!("{}.search", res.model),
                    vec![Value::Object(v1_filters(filter))],
                );
                self.call(call, None).await?
            }
            AdapterStrategy::V2_0 => {
                let call = RemoteCall::get(res.search_path, v2_search_criteria(filter));
                self.call(call, None).await?
            }
        };

        let ids = match self.strategy {
            AdapterStrategy::V1_7 => collect_ids(&answer, v1_key(self.kind)),
            AdapterStrategy::V2_0 => {
                let items = answer.get("items").cloned().unwrap_or(answer);
                collect_ids(&items, res.key)
            }
        };
        debug!(count = ids.len(), "Remote search done");
        Ok(ids)
    }

    /// Reads one record, optionally in a storeview's translation.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn read(
        &self,
        external_id: &ExternalId,
        storeview: Option<&ExternalId>,
    ) -> SyncResult<ExternalRecord> {
        let res = resource(self.kind);
        let answer = match self.strategy {
            AdapterStrategy::V1_7 => {
                let mut args = vec![json!(external_id.as_str())];
                if let Some(view) = storeview {
                    args.push(json!(view.as_str()));
                }
                let call = RemoteCall::positional(format!("{}.info", res.model), args);
                self.call(call, Some(external_id)).await?
            }
            AdapterStrategy::V2_0 => {
                let mut query = FieldMap::new();
                if let Some(view) = storeview {
                    query.insert("storeId".into(), json!(view.as_str()));
                }
                let call = RemoteCall::get(format!("{}/{}", res.path, external_id), query);
                self.call(call, Some(external_id)).await?
            }
        };

        if answer.is_null() {
            return Err(SyncError::RecordNotFound {
                kind: self.kind,
                external_id: external_id.clone(),
            });
        }

        let mut record = ExternalRecord::from_value(answer)?;
        if self.strategy == AdapterStrategy::V2_0 {
            flatten_custom_attributes(&mut record);
        }
        Ok(record)
    }

    /// Creates a remote record and returns its id.
    #[instrument(skip(self, payload), fields(kind = %self.kind))]
    pub async fn create(&self, payload: FieldMap) -> SyncResult<ExternalId> {
        let res = resource(self.kind);
        let answer = match self.strategy {
            AdapterStrategy::V1_7 => {
                let call =
                    RemoteCall::positional(format!("{}.create", res.model), vec![Value::Object(payload)]);
                self.call(call, None).await?
            }
            AdapterStrategy::V2_0 => {
                let call = RemoteCall::post(res.path, json!({ res.envelope: payload }));
                self.call(call, None).await?
            }
        };
        self.returned_id(&answer, res.key)
    }

    /// Updates a remote record.
    #[instrument(skip(self, payload), fields(kind = %self.kind))]
    pub async fn update(&self, external_id: &ExternalId, payload: FieldMap) -> SyncResult<()> {
        let res = resource(self.kind);
        match self.strategy {
            AdapterStrategy::V1_7 => {
                let call = RemoteCall::positional(
                    format!("{}.update", res.model),
                    vec![json!(external_id.as_str()), Value::Object(payload)],
                );
                self.call(call, Some(external_id)).await?;
            }
            AdapterStrategy::V2_0 => {
                let call = RemoteCall::put(
                    format!("{}/{}", res.path, external_id),
                    json!({ res.envelope: payload }),
                );
                self.call(call, Some(external_id)).await?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Performs a call, translating faults. `subject` is the id a
    /// "not found" fault refers to.
    async fn call(&self, call: RemoteCall, subject: Option<&ExternalId>) -> SyncResult<Value> {
        debug!(call = %call, "Remote call");
        self.api
            .call(call)
            .await
            .map_err(|fault| self.translate(fault, subject))
    }

    /// Same as [`call`](Self::call), with the not-found subject of another kind.
    async fn call_about(
        &self,
        call: RemoteCall,
        kind: EntityKind,
        subject: &ExternalId,
    ) -> SyncResult<Value> {
        debug!(call = %call, "Remote call");
        self.api
            .call(call)
            .await
            .map_err(|fault| translate_fault(fault, kind, Some(subject)))
    }

    fn translate(&self, fault: RemoteFault, subject: Option<&ExternalId>) -> SyncError {
        translate_fault(fault, self.kind, subject)
    }

    fn returned_id(&self, answer: &Value, key: &str) -> SyncResult<ExternalId> {
        ExternalId::from_value(answer)
            .or_else(|| answer.get(key).and_then(ExternalId::from_value))
            .ok_or_else(|| SyncError::RemoteFault {
                code: 0,
                message: format!("{} creation returned no id: {}", self.kind, answer),
            })
    }
}

/// Maps a transport failure onto the sync error taxonomy.
pub(crate) fn translate_fault(
    fault: RemoteFault,
    kind: EntityKind,
    subject: Option<&ExternalId>,
) -> SyncError {
    match (fault, subject) {
        (RemoteFault::Fault { code, .. }, Some(id)) if NOT_FOUND_FAULTS.contains(&code) => {
            SyncError::RecordNotFound {
                kind,
                external_id: id.clone(),
            }
        }
        (RemoteFault::Http { status: 404, .. }, Some(id)) => SyncError::RecordNotFound {
            kind,
            external_id: id.clone(),
        },
        (RemoteFault::Http { status, body }, _) if status == 429 || status >= 500 => {
            SyncError::Transport(format!("HTTP {}: {}", status, body))
        }
        (RemoteFault::Http { status, body }, _) => SyncError::RemoteFault {
            code: i64::from(status),
            message: body,
        },
        (RemoteFault::Fault { code, message }, _) => SyncError::RemoteFault { code, message },
        (RemoteFault::Transport(msg), _) => SyncError::Transport(msg),
    }
}

// =============================================================================
// Payload Builders
// =============================================================================

/// 1.7 filter object: extra equality filters plus an `updated_at` range.
fn v1_filters(filter: &BatchFilter) -> FieldMap {
    let mut filters = filter.filters.clone();
    if filter.has_date_range() {
        let mut range = FieldMap::new();
        if let Some(from) = &filter.from_date {
            range.insert("from".into(), json!(format_remote_datetime(from)));
        }
        if let Some(to) = &filter.to_date {
            range.insert("to".into(), json!(format_remote_datetime(to)));
        }
        filters.insert("updated_at".into(), Value::Object(range));
    }
    filters
}

/// 2.0 `searchCriteria` query parameters, one filter group per condition.
fn v2_search_criteria(filter: &BatchFilter) -> FieldMap {
    let mut conditions: Vec<(String, String, &str)> = Vec::new();
    if let Some(from) = &filter.from_date {
        conditions.push(("updated_at".into(), format_remote_datetime(from), "gteq"));
    }
    if let Some(to) = &filter.to_date {
        conditions.push(("updated_at".into(), format_remote_datetime(to), "lteq"));
    }
    for (field, value) in &filter.filters {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        conditions.push((field.clone(), rendered, "eq"));
    }

    let mut query = FieldMap::new();
    for (group, (field, value, condition)) in conditions.into_iter().enumerate() {
        let prefix = format!("searchCriteria[filter_groups][{}][filters][0]", group);
        query.insert(format!("{}[field]", prefix), json!(field));
        query.insert(format!("{}[value]", prefix), json!(value));
        query.insert(format!("{}[condition_type]", prefix), json!(condition));
    }
    if query.is_empty() {
        // Magento 2 refuses a search without criteria
        query.insert("searchCriteria".into(), json!(""));
    }
    query
}

/// Reads ids out of a search answer: a list of ids or of objects.
fn collect_ids(answer: &Value, key: &str) -> Vec<ExternalId> {
    answer
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(obj) => obj
                        .get(key)
                        .or_else(|| obj.get("id"))
                        .and_then(ExternalId::from_value),
                    other => ExternalId::from_value(other),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Lifts 2.0 `custom_attributes` entries to top-level fields.
///
/// Existing top-level fields win.
fn flatten_custom_attributes(record: &mut ExternalRecord) {
    let attributes: Vec<(String, Value)> = record
        .get_array("custom_attributes")
        .iter()
        .filter_map(|attr| {
            let code = attr.get("attribute_code")?.as_str()?.to_string();
            let value = attr.get("value").cloned().unwrap_or(Value::Null);
            Some((code, value))
        })
        .collect();

    for (code, value) in attributes {
        if record.get(&code).is_none() {
            record.insert(code, value);
        }
    }
}
