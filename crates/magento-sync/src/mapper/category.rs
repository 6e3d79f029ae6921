//! Category mapping.
//!
//! A record whose `level` is `0` is the remote root and takes the backend's
//! name. A `parent_id` of `0` (or none) marks a root.

use async_trait::async_trait;
use serde_json::{json, Value};

use magento_core::{BackendConfig, EntityKind, ExternalId, ExternalRecord, FieldMap};

use super::{reference, ImportMapper, MapContext, MappedRecord};
use crate::error::SyncResult;

#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryMapper;

fn is_root_level(record: &ExternalRecord) -> bool {
    record.get_str("level").as_deref() == Some("0")
}

#[async_trait]
impl ImportMapper for CategoryMapper {
    fn kind(&self) -> EntityKind {
        EntityKind::ProductCategory
    }

    fn dependencies(&self, record: &ExternalRecord, _backend: &BackendConfig) -> Vec<(EntityKind, ExternalId)> {
        reference(record, "parent_id")
            .map(|parent| vec![(EntityKind::ProductCategory, parent)])
            .unwrap_or_default()
    }

    async fn to_internal(&self, record: &ExternalRecord, ctx: &MapContext<'_>) -> SyncResult<MappedRecord> {
        let mut fields = FieldMap::new();

        if is_root_level(record) {
            let name = if ctx.backend.name.is_empty() {
                ctx.backend.id.to_string()
            } else {
                ctx.backend.name.clone()
            };
            fields.insert("name".into(), json!(name));
        } else if let Some(name) = record.get_non_empty("name") {
            fields.insert("name".into(), json!(name));
        }

        if let Some(description) = record.get("description") {
            fields.insert("description".into(), description.clone());
        }

        let parent = match reference(record, "parent_id") {
            Some(parent) => {
                let internal = ctx.resolve(EntityKind::ProductCategory, &parent).await?;
                json!(internal.as_str())
            }
            None => Value::Null,
        };
        fields.insert("parent_id".into(), parent);

        if let Some(active) = record.get_str("is_active") {
            fields.insert("active".into(), json!(active == "1" || active == "true"));
        }

        let mut binding_data = FieldMap::new();
        if let Some(position) = record.get_str("position") {
            binding_data.insert("position".into(), json!(position));
        }

        Ok(MappedRecord {
            fields,
            binding_data,
        })
    }
}
