//! Sale order mapping.
//!
//! Orders are keyed by increment id. Each local line keeps the remote order
//! item id so invoices and shipments can address it later. Child items of
//! configurable products are folded into their parent line.

use async_trait::async_trait;
use serde_json::{json, Value};

use magento_core::{ApiVersion, BackendConfig, EntityKind, ExternalId, ExternalRecord, FieldMap};

use super::{reference, ImportMapper, MapContext, MappedRecord};
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct SaleOrderMapper;

/// Key of the product reference on order items.
fn product_key(backend: &BackendConfig) -> &'static str {
    match backend.version {
        ApiVersion::V1_7 => "product_id",
        ApiVersion::V2_0 => "sku",
    }
}

/// Top-level order items.
fn lines(record: &ExternalRecord) -> impl Iterator<Item = &Value> {
    record.get_array("items").iter().filter(|item| {
        item.get("parent_item_id")
            .map(|parent| parent.is_null())
            .unwrap_or(true)
    })
}

fn item_str(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn item_f64(item: &Value, key: &str) -> f64 {
    match item.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[async_trait]
impl ImportMapper for SaleOrderMapper {
    fn kind(&self) -> EntityKind {
        EntityKind::SaleOrder
    }

    fn dependencies(&self, record: &ExternalRecord, backend: &BackendConfig) -> Vec<(EntityKind, ExternalId)> {
        let mut deps = Vec::new();
        if let Some(customer) = reference(record, "customer_id") {
            deps.push((EntityKind::Partner, customer));
        }
        let key = product_key(backend);
        for item in lines(record) {
            if let Some(product) = item_str(item, key).map(ExternalId::new) {
                let dep = (EntityKind::Product, product);
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
        }
        deps
    }

    async fn to_internal(&self, record: &ExternalRecord, ctx: &MapContext<'_>) -> SyncResult<MappedRecord> {
        let increment_id = record
            .get_non_empty("increment_id")
            .unwrap_or_else(|| ctx.external_id.to_string());

        let mut fields = FieldMap::new();
        fields.insert("name".into(), json!(increment_id));
        fields.insert("state".into(), json!("draft"));

        // guest orders have no customer
        let partner = match reference(record, "customer_id") {
            Some(customer) => json!(ctx.resolve(EntityKind::Partner, &customer).await?.as_str()),
            None => Value::Null,
        };
        fields.insert("partner_id".into(), partner);

        if let Some(date) = record.get_datetime("created_at") {
            fields.insert("date_order".into(), json!(date.to_rfc3339()));
        }
        if let Some(total) = record.get_f64("grand_total") {
            fields.insert("amount_total".into(), json!(total));
        }
        let payment = record
            .get("payment")
            .and_then(|p| p.get("method"))
            .and_then(Value::as_str);
        if let Some(method) = payment {
            fields.insert("payment_mode".into(), json!(method));
        }

        let key = product_key(ctx.backend);
        let mut order_lines = Vec::new();
        for item in lines(record) {
            let item_id = item_str(item, "item_id").ok_or_else(|| {
                SyncError::mapping(EntityKind::SaleOrder, ctx.external_id, "order item without item_id")
            })?;
            let product = match item_str(item, key) {
                Some(product) => json!(ctx.resolve(EntityKind::Product, &ExternalId::new(product)).await?.as_str()),
                None => Value::Null,
            };
            order_lines.push(json!({
                "magento_item_id": item_id,
                "product_id": product,
                "name": item_str(item, "name").unwrap_or_default(),
                "quantity": item_f64(item, "qty_ordered"),
                "price_unit": item_f64(item, "price"),
            }));
        }
        fields.insert("lines".into(), Value::Array(order_lines));

        let mut binding_data = FieldMap::new();
        if let Some(store) = record.get_id("store_id") {
            binding_data.insert("store_id".into(), json!(store.as_str()));
        }
        if let Some(entity) = record.get_id("order_id").or_else(|| record.get_id("entity_id")) {
            binding_data.insert("magento_order_id".into(), json!(entity.as_str()));
        }

        Ok(MappedRecord {
            fields,
            binding_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::BindingRegistry;
    use magento_core::BackendId;
    use magento_db::{Database, DbConfig};

    fn order() -> ExternalRecord {
        ExternalRecord::from_value(json!({
            "increment_id": "100000201",
            "order_id": "201",
            "store_id": "1",
            "customer_id": "12",
            "grand_total": "30.00",
            "payment": {"method": "checkmo"},
            "items": [
                {"item_id": "543", "product_id": "16", "qty_ordered": "1.0000", "price": "10.0", "parent_item_id": null},
                {"item_id": "544", "product_id": "17", "qty_ordered": "2.0000", "price": "10.0"},
                {"item_id": "545", "product_id": "18", "qty_ordered": "2.0000", "parent_item_id": "544"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_dependencies_skip_child_items() {
        let backend = BackendConfig::new("mage", "http://mage.test", ApiVersion::V1_7);
        assert_eq!(
            SaleOrderMapper.dependencies(&order(), &backend),
            vec![
                (EntityKind::Partner, ExternalId::new("12")),
                (EntityKind::Product, ExternalId::new("16")),
                (EntityKind::Product, ExternalId::new("17")),
            ]
        );
    }

    #[tokio::test]
    async fn test_order_lines_keep_item_ids() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let backend_id = BackendId::new("mage");
        let registry = BindingRegistry::new(db.clone(), backend_id.clone(), EntityKind::SaleOrder);

        let mut tx = db.begin().await.unwrap();
        for (kind, model, ext) in [
            (EntityKind::Partner, "res.partner", "12"),
            (EntityKind::Product, "product.product", "16"),
            (EntityKind::Product, "product.product", "17"),
        ] {
            let rec = tx.insert_record(model, FieldMap::new()).await.unwrap();
            registry
                .for_kind(kind)
                .bind(&mut tx, &rec.id, &ExternalId::new(ext), FieldMap::new())
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        let backend = BackendConfig::new("mage", "http://mage.test", ApiVersion::V1_7);
        let id = ExternalId::new("100000201");
        let ctx = MapContext::new(&backend, &registry, &id, None);
        let mapped = SaleOrderMapper.to_internal(&order(), &ctx).await.unwrap();

        let lines = mapped.fields.get("lines").and_then(Value::as_array).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["magento_item_id"], json!("543"));
        assert_eq!(lines[1]["quantity"], json!(2.0));
        assert_eq!(mapped.fields.get("payment_mode"), Some(&json!("checkmo")));
        assert_eq!(mapped.binding_data.get("store_id"), Some(&json!("1")));
        assert!(matches!(mapped.fields.get("partner_id"), Some(Value::String(_))));
    }
}
