//! Customer mapping.

use async_trait::async_trait;
use serde_json::json;

use magento_core::{BackendConfig, EntityKind, ExternalId, ExternalRecord, FieldMap};

use super::{ImportMapper, MapContext, MappedRecord};
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct PartnerMapper;

#[async_trait]
impl ImportMapper for PartnerMapper {
    fn kind(&self) -> EntityKind {
        EntityKind::Partner
    }

    fn dependencies(&self, _record: &ExternalRecord, _backend: &BackendConfig) -> Vec<(EntityKind, ExternalId)> {
        Vec::new()
    }

    async fn to_internal(&self, record: &ExternalRecord, ctx: &MapContext<'_>) -> SyncResult<MappedRecord> {
        let name = ["firstname", "middlename", "lastname"]
            .iter()
            .filter_map(|key| record.get_non_empty(key))
            .collect::<Vec<_>>()
            .join(" ");
        let email = record.get_non_empty("email");
        if name.is_empty() && email.is_none() {
            return Err(SyncError::mapping(
                EntityKind::Partner,
                ctx.external_id,
                "customer has neither a name nor an email",
            ));
        }

        let mut fields = FieldMap::new();
        fields.insert(
            "name".into(),
            json!(if name.is_empty() { email.clone().unwrap_or_default() } else { name }),
        );
        if let Some(email) = email {
            fields.insert("email".into(), json!(email));
        }
        if let Some(vat) = record.get_non_empty("taxvat") {
            fields.insert("vat".into(), json!(vat));
        }
        if let Some(dob) = record.get_non_empty("dob") {
            // "1980-05-04 00:00:00" and "1980-05-04" both keep the date part
            let date = dob.split_whitespace().next().unwrap_or_default().to_string();
            fields.insert("birthday".into(), json!(date));
        }
        fields.insert("customer".into(), json!(true));

        let mut binding_data = FieldMap::new();
        for key in ["website_id", "group_id", "created_in"] {
            if let Some(value) = record.get_str(key) {
                binding_data.insert(key.into(), json!(value));
            }
        }

        Ok(MappedRecord {
            fields,
            binding_data,
        })
    }
}
