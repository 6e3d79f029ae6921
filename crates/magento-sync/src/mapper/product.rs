//! Product mapping.
//!
//! Category links are relational: every linked category must be bound.

use async_trait::async_trait;
use serde_json::{json, Value};

use magento_core::{BackendConfig, EntityKind, ExternalId, ExternalRecord, FieldMap};

use super::{ImportMapper, MapContext, MappedRecord};
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct ProductMapper;

/// Linked category ids, from `category_ids` (1.7, or 2.0 custom attribute)
/// or `extension_attributes.category_links` (2.0).
fn category_refs(record: &ExternalRecord) -> Vec<ExternalId> {
    let mut ids: Vec<ExternalId> = record
        .get_array("category_ids")
        .iter()
        .filter_map(ExternalId::from_value)
        .collect();

    let links = record
        .get("extension_attributes")
        .and_then(|ext| ext.get("category_links"))
        .and_then(Value::as_array);
    for link in links.into_iter().flatten() {
        if let Some(id) = link.get("category_id").and_then(ExternalId::from_value) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

#[async_trait]
impl ImportMapper for ProductMapper {
    fn kind(&self) -> EntityKind {
        EntityKind::Product
    }

    fn dependencies(&self, record: &ExternalRecord, _backend: &BackendConfig) -> Vec<(EntityKind, ExternalId)> {
        category_refs(record)
            .into_iter()
            .map(|id| (EntityKind::ProductCategory, id))
            .collect()
    }

    async fn to_internal(&self, record: &ExternalRecord, ctx: &MapContext<'_>) -> SyncResult<MappedRecord> {
        let sku = record.get_non_empty("sku").ok_or_else(|| {
            SyncError::mapping(EntityKind::Product, ctx.external_id, "product has no sku")
        })?;

        let mut fields = FieldMap::new();
        fields.insert(
            "name".into(),
            json!(record.get_non_empty("name").unwrap_or_else(|| sku.clone())),
        );
        fields.insert("default_code".into(), json!(sku));
        fields.insert("list_price".into(), json!(record.get_f64("price").unwrap_or(0.0)));
        if let Some(weight) = record.get_f64("weight") {
            fields.insert("weight".into(), json!(weight));
        }
        if let Some(description) = record.get("description") {
            fields.insert("description".into(), description.clone());
        }
        if let Some(status) = record.get_str("status") {
            fields.insert("active".into(), json!(status == "1"));
        }

        let mut categories = Vec::new();
        for category in category_refs(record) {
            let internal = ctx.resolve(EntityKind::ProductCategory, &category).await?;
            categories.push(json!(internal.as_str()));
        }
        fields.insert("categ_ids".into(), Value::Array(categories));

        let mut binding_data = FieldMap::new();
        if let Some(type_id) = record.get_str("type_id") {
            binding_data.insert("product_type".into(), json!(type_id));
        }
        if let Some(id) = record.get_id("product_id").or_else(|| record.get_id("id")) {
            binding_data.insert("magento_entity_id".into(), json!(id.as_str()));
        }

        Ok(MappedRecord {
            fields,
            binding_data,
        })
    }
}
