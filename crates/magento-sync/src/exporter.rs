//! # Exporters
//!
//! Bodies of the export jobs. Each starts from a binding created by a
//! listener and ends by writing the remote id back onto it.
//!
//! ## Invoice
//! ```text
//! binding ──► invoice lines ──► {order_item_id: qty}
//!         ──► sale binding  ──► order increment id, store mail flag
//!         ──► create_invoice(order, items, "Invoice Created", mail, false)
//!         ──► bind(invoice, returned id)
//! ```
//!
//! ## Picking
//! ```text
//! binding ──► picking_method complete ⇒ {}      partial ⇒ {item: done qty}
//!         ──► create_shipment(order, items, "Shipping Created", mail, true)
//!         ──► bind(picking, returned id) ──► tracking when asked and set
//! ```
//!
//! An export whose binding already carries a remote id is not sent again.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use magento_core::picking::{classify, shipment_items, PickingMethod};
use magento_core::{
    BackendConfig, BindingRecord, EntityKind, ExternalId, FieldMap, InternalId, InternalRecord,
};
use magento_db::Database;

use crate::adapter::{AdapterStrategy, MagentoAdapter};
use crate::binder::BindingRegistry;
use crate::error::{SyncError, SyncResult};
use crate::listeners::picking_lines;
use crate::remote::RemoteApi;

pub const INVOICE_COMMENT: &str = "Invoice Created";
pub const SHIPMENT_COMMENT: &str = "Shipping Created";

/// Result of an invoice or shipment export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub binding_id: String,
    pub external_id: ExternalId,
    /// The binding had a remote id already; nothing was sent.
    pub already_exported: bool,
    /// Whether the tracking number went out with this export.
    pub tracking_sent: bool,
}

impl fmt::Display for ExportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.already_exported {
            write!(f, "already exported as {}", self.external_id)
        } else {
            write!(f, "exported as {}", self.external_id)
        }
    }
}

/// What happened to a tracking export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingOutcome {
    Sent,
    NoTrackingRef,
    NoCarrier,
}

impl fmt::Display for TrackingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingOutcome::Sent => write!(f, "tracking number sent"),
            TrackingOutcome::NoTrackingRef => write!(f, "no tracking number to send"),
            TrackingOutcome::NoCarrier => write!(f, "no carrier on the picking"),
        }
    }
}

/// Export jobs of one backend.
#[derive(Clone)]
pub struct Exporter {
    db: Database,
    backend: Arc<BackendConfig>,
    adapter: MagentoAdapter,
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exporter")
            .field("backend", &self.backend.id)
            .finish_non_exhaustive()
    }
}

impl Exporter {
    pub fn new(db: Database, backend: Arc<BackendConfig>, api: Arc<dyn RemoteApi>) -> Self {
        let adapter = MagentoAdapter::new(api, AdapterStrategy::from(backend.version), EntityKind::Invoice);
        Exporter { db, backend, adapter }
    }

    // =========================================================================
    // Invoice
    // =========================================================================

    #[instrument(skip(self), fields(backend = %self.backend.id))]
    pub async fn export_invoice(&self, binding_id: &str) -> SyncResult<ExportOutcome> {
        let binding = self.binding(binding_id, EntityKind::Invoice).await?;
        if let Some(existing) = already_exported(&binding) {
            return Ok(existing);
        }

        let invoice = self.db.records().get_required(&binding.internal_id).await?;
        let sale_binding = self.sale_binding(&binding, &invoice, "sale_order_ids").await?;
        let order_id = sale_binding.external_id.clone().ok_or_else(|| {
            SyncError::ExportPrecondition(format!("sale order binding {} has no remote id", sale_binding.id))
        })?;
        let items = invoice_items(&invoice);
        let email = self
            .store_of(&sale_binding)
            .map_or(false, |s| s.send_invoice_paid_mail);

        let remote_id = self
            .adapter
            .for_kind(EntityKind::Invoice)
            .create_invoice(&order_id, &items, INVOICE_COMMENT, email, false)
            .await?;

        self.bind(&binding, &remote_id).await?;
        info!(binding = %binding.id, remote_id = %remote_id, "Invoice exported");
        Ok(ExportOutcome {
            binding_id: binding.id,
            external_id: remote_id,
            already_exported: false,
            tracking_sent: false,
        })
    }

    // =========================================================================
    // Picking
    // =========================================================================

    #[instrument(skip(self), fields(backend = %self.backend.id))]
    pub async fn export_picking_done(
        &self,
        binding_id: &str,
        with_tracking: bool,
    ) -> SyncResult<ExportOutcome> {
        let binding = self.binding(binding_id, EntityKind::Picking).await?;
        if let Some(existing) = already_exported(&binding) {
            return Ok(existing);
        }

        let picking = self.db.records().get_required(&binding.internal_id).await?;
        let sale_binding = self.sale_binding(&binding, &picking, "sale_order_id").await?;
        let order_id = sale_binding.external_id.clone().ok_or_else(|| {
            SyncError::ExportPrecondition(format!("sale order binding {} has no remote id", sale_binding.id))
        })?;

        let lines = picking_lines(&picking)?;
        let method = match binding.data_str("picking_method") {
            Some(stored) => stored.parse::<PickingMethod>()?,
            None => classify(&lines),
        };
        let items = shipment_items(method, &lines);
        let email = self
            .store_of(&sale_binding)
            .map_or(false, |s| s.send_picking_done_mail);

        let remote_id = self
            .adapter
            .for_kind(EntityKind::Picking)
            .create_shipment(&order_id, &items, SHIPMENT_COMMENT, email, true)
            .await?;
        self.bind(&binding, &remote_id).await?;
        info!(binding = %binding.id, remote_id = %remote_id, method = %method, "Shipment exported");

        let mut tracking_sent = false;
        if with_tracking && picking.field_str("carrier_tracking_ref").is_some() {
            tracking_sent = self.export_tracking_number(&binding.id).await? == TrackingOutcome::Sent;
        }

        Ok(ExportOutcome {
            binding_id: binding.id,
            external_id: remote_id,
            already_exported: false,
            tracking_sent,
        })
    }

    #[instrument(skip(self), fields(backend = %self.backend.id))]
    pub async fn export_tracking_number(&self, binding_id: &str) -> SyncResult<TrackingOutcome> {
        let binding = self.binding(binding_id, EntityKind::Picking).await?;
        let shipment_id = binding
            .external_id
            .clone()
            .ok_or_else(|| SyncError::NotYetExported {
                binding_id: binding.id.clone(),
            })?;

        let picking = self.db.records().get_required(&binding.internal_id).await?;
        let Some(number) = picking
            .field_str("carrier_tracking_ref")
            .filter(|r| !r.trim().is_empty())
            .map(str::to_string)
        else {
            debug!(binding = %binding.id, "No tracking number");
            return Ok(TrackingOutcome::NoTrackingRef);
        };
        let Some(carrier) = picking.field_str("carrier_code").map(str::to_string) else {
            warn!(binding = %binding.id, "Picking has a tracking number but no carrier");
            return Ok(TrackingOutcome::NoCarrier);
        };

        let sale_binding = self.sale_binding(&binding, &picking, "sale_order_id").await?;
        let order_id = sale_binding.external_id.clone().ok_or_else(|| {
            SyncError::ExportPrecondition(format!("sale order binding {} has no remote id", sale_binding.id))
        })?;

        let adapter = self.adapter.for_kind(EntityKind::Picking);
        if let Some(allowed) = adapter.get_carriers(&order_id).await? {
            if !allowed.iter().any(|c| c == &carrier) {
                return Err(SyncError::ExportPrecondition(format!(
                    "carrier '{}' is not available for order {} (allowed: {})",
                    carrier,
                    order_id,
                    allowed.join(", ")
                )));
            }
        }

        adapter
            .add_tracking(&shipment_id, &order_id, &carrier, "", &number)
            .await?;
        Ok(TrackingOutcome::Sent)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn binding(&self, binding_id: &str, kind: EntityKind) -> SyncResult<BindingRecord> {
        let binding = self.db.bindings().get_required(binding_id).await?;
        if binding.kind != kind {
            return Err(SyncError::ExportPrecondition(format!(
                "binding {} is a {} binding, expected {}",
                binding_id, binding.kind, kind
            )));
        }
        if binding.backend_id != self.backend.id {
            return Err(SyncError::ExportPrecondition(format!(
                "binding {} belongs to backend {}",
                binding_id, binding.backend_id
            )));
        }
        Ok(binding)
    }

    /// Sale order binding on this backend: the one recorded by the listener,
    /// else the first bound order of the record.
    async fn sale_binding(
        &self,
        binding: &BindingRecord,
        record: &InternalRecord,
        order_field: &str,
    ) -> SyncResult<BindingRecord> {
        if let Some(id) = binding.data_str("sale_binding_id") {
            if let Some(sale) = self.db.bindings().get(id).await? {
                return Ok(sale);
            }
        }

        let orders: Vec<InternalId> = match record.fields.get(order_field) {
            Some(Value::String(id)) => vec![InternalId::new(id.as_str())],
            Some(Value::Array(ids)) => ids
                .iter()
                .filter_map(Value::as_str)
                .map(InternalId::new)
                .collect(),
            _ => Vec::new(),
        };
        for order in orders {
            if let Some(sale) = self
                .db
                .bindings()
                .find_by_internal(&self.backend.id, EntityKind::SaleOrder, &order)
                .await?
            {
                return Ok(sale);
            }
        }
        Err(SyncError::ExportPrecondition(format!(
            "{} {} has no sale order bound on backend {}",
            record.model, record.id, self.backend.id
        )))
    }

    fn store_of(&self, sale_binding: &BindingRecord) -> Option<&magento_core::StoreSettings> {
        sale_binding
            .data_str("store_id")
            .and_then(|id| self.backend.store(&ExternalId::new(id)))
    }

    /// Stores the id the remote assigned. A failure here leaves a remote
    /// document the binding does not know about, so the id is logged.
    async fn bind(&self, binding: &BindingRecord, remote_id: &ExternalId) -> SyncResult<()> {
        let result = self.write_external_id(binding.kind, &binding.internal_id, remote_id).await;
        if let Err(e) = &result {
            error!(
                binding = %binding.id,
                kind = %binding.kind,
                remote_id = %remote_id,
                error = %e,
                "Created remotely but not bound locally"
            );
        }
        result
    }

    async fn write_external_id(
        &self,
        kind: EntityKind,
        internal_id: &InternalId,
        remote_id: &ExternalId,
    ) -> SyncResult<()> {
        let registry = BindingRegistry::new(self.db.clone(), self.backend.id.clone(), kind);
        let mut tx = self.db.begin().await?;
        registry.bind(&mut tx, internal_id, remote_id, FieldMap::new()).await?;
        tx.commit().await?;
        Ok(())
    }
}

fn already_exported(binding: &BindingRecord) -> Option<ExportOutcome> {
    binding.external_id.as_ref().map(|external_id| {
        debug!(binding = %binding.id, external_id = %external_id, "Already exported");
        ExportOutcome {
            binding_id: binding.id.clone(),
            external_id: external_id.clone(),
            already_exported: true,
            tracking_sent: false,
        }
    })
}

/// `{order_item_id: qty}` of the invoice lines tied to an order item.
fn invoice_items(invoice: &InternalRecord) -> BTreeMap<String, f64> {
    let mut items = BTreeMap::new();
    let lines = invoice
        .fields
        .get("lines")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    for line in lines {
        let item = match line.get("order_item_id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        let qty = line.get("quantity").and_then(Value::as_f64).unwrap_or(0.0);
        *items.entry(item).or_insert(0.0) += qty;
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMagento;
    use magento_core::{ApiVersion, BackendId, StoreSettings};
    use magento_db::{new_binding, DbConfig};
    use serde_json::json;

    struct Fixture {
        db: Database,
        fake: FakeMagento,
        exporter: Exporter,
        sale_binding: BindingRecord,
    }

    async fn fixture(order_increment: &str) -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let fake = FakeMagento::new();
        let mut backend = BackendConfig::new("mage", "http://mage.test", ApiVersion::V1_7);
        backend.stores.push(StoreSettings {
            id: ExternalId::new("1"),
            name: "Main".into(),
            create_invoice_on: None,
            send_picking_done_mail: true,
            send_invoice_paid_mail: true,
        });

        let sale = db.records().insert("sale.order", FieldMap::new()).await.unwrap();
        let mut data = FieldMap::new();
        data.insert("store_id".into(), json!("1"));
        let sale_binding = new_binding(
            &BackendId::new("mage"),
            EntityKind::SaleOrder,
            &sale.id,
            Some(ExternalId::new(order_increment)),
            data,
        );
        db.bindings().insert(&sale_binding).await.unwrap();

        let exporter = Exporter::new(db.clone(), Arc::new(backend), fake.api());
        Fixture {
            db,
            fake,
            exporter,
            sale_binding,
        }
    }

    async fn pending(f: &Fixture, kind: EntityKind, model: &str, fields: serde_json::Value, data: FieldMap) -> BindingRecord {
        let fields = fields.as_object().cloned().unwrap();
        let record = f.db.records().insert(model, fields).await.unwrap();
        let binding = new_binding(&BackendId::new("mage"), kind, &record.id, None, data);
        f.db.bindings().insert(&binding).await.unwrap();
        binding
    }

    fn sale_data(f: &Fixture, method: Option<&str>) -> FieldMap {
        let mut data = FieldMap::new();
        data.insert("sale_binding_id".into(), json!(f.sale_binding.id));
        if let Some(method) = method {
            data.insert("picking_method".into(), json!(method));
        }
        data
    }

    #[tokio::test]
    async fn test_export_invoice() {
        let f = fixture("145000008").await;
        f.fake.respond("sales_order_invoice.create", json!("987654321"));
        let binding = pending(
            &f,
            EntityKind::Invoice,
            "account.move",
            json!({"lines": [
                {"order_item_id": "598", "quantity": 1.0},
                {"name": "Shipping", "quantity": 1.0}
            ]}),
            sale_data(&f, None),
        )
        .await;

        let outcome = f.exporter.export_invoice(&binding.id).await.unwrap();
        assert_eq!(outcome.external_id, ExternalId::new("987654321"));
        assert!(!outcome.already_exported);

        let calls = f.fake.calls_to("sales_order_invoice.create");
        assert_eq!(
            calls[0].positional_args(),
            &[
                json!("145000008"),
                json!({"598": 1.0}),
                json!("Invoice Created"),
                json!(true),
                json!(false)
            ]
        );

        let stored = f.db.bindings().get_required(&binding.id).await.unwrap();
        assert_eq!(stored.external_id, Some(ExternalId::new("987654321")));

        // a second run does not call the remote again
        let again = f.exporter.export_invoice(&binding.id).await.unwrap();
        assert!(again.already_exported);
        assert_eq!(f.fake.calls_to("sales_order_invoice.create").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_local_bind_after_remote_create_surfaces_error() {
        let f = fixture("145000008").await;
        f.fake.respond("sales_order_invoice.create", json!("987654321"));
        // the remote hands back an id another invoice is already bound to
        let other = f.db.records().insert("account.move", FieldMap::new()).await.unwrap();
        let taken = new_binding(
            &BackendId::new("mage"),
            EntityKind::Invoice,
            &other.id,
            Some(ExternalId::new("987654321")),
            FieldMap::new(),
        );
        f.db.bindings().insert(&taken).await.unwrap();
        let binding = pending(
            &f,
            EntityKind::Invoice,
            "account.move",
            json!({"lines": [{"order_item_id": "598", "quantity": 1.0}]}),
            sale_data(&f, None),
        )
        .await;

        let err = f.exporter.export_invoice(&binding.id).await.unwrap_err();
        assert!(matches!(err, SyncError::AmbiguousBinding { .. }));
        assert!(!err.is_retryable());
        assert_eq!(f.fake.calls_to("sales_order_invoice.create").len(), 1);

        let stored = f.db.bindings().get_required(&binding.id).await.unwrap();
        assert_eq!(stored.external_id, None);
    }

    #[tokio::test]
    async fn test_export_complete_picking() {
        let f = fixture("100000201").await;
        f.fake.respond("sales_order_shipment.create", json!("987654321"));
        let binding = pending(
            &f,
            EntityKind::Picking,
            "stock.picking",
            json!({"lines": [{"order_item_id": "543", "ordered_qty": 1.0, "done_qty": 1.0}]}),
            sale_data(&f, Some("complete")),
        )
        .await;

        f.exporter.export_picking_done(&binding.id, false).await.unwrap();
        assert_eq!(
            f.fake.calls_to("sales_order_shipment.create")[0].positional_args(),
            &[json!("100000201"), json!({}), json!("Shipping Created"), json!(true), json!(true)]
        );
    }

    #[tokio::test]
    async fn test_export_partial_picking() {
        let f = fixture("100000201").await;
        f.fake.respond("sales_order_shipment.create", json!(987654321));
        let binding = pending(
            &f,
            EntityKind::Picking,
            "stock.picking",
            json!({"lines": [
                {"order_item_id": "543", "ordered_qty": 1.0, "done_qty": 1.0},
                {"order_item_id": "544", "ordered_qty": 1.0, "done_qty": 0.0}
            ]}),
            sale_data(&f, Some("partial")),
        )
        .await;

        let outcome = f.exporter.export_picking_done(&binding.id, false).await.unwrap();
        assert_eq!(outcome.external_id, ExternalId::new("987654321"));
        assert_eq!(
            f.fake.calls_to("sales_order_shipment.create")[0].positional_args(),
            &[json!("100000201"), json!({"543": 1.0}), json!("Shipping Created"), json!(true), json!(true)]
        );
    }

    #[tokio::test]
    async fn test_export_tracking_number() {
        let f = fixture("100000201").await;
        f.fake.respond(
            "sales_order_shipment.getCarriers",
            json!({"custom": "Custom Value", "ups": "United Parcel Service"}),
        );
        f.fake.respond("sales_order_shipment.addTrack", json!(1));
        let picking = f
            .db
            .records()
            .insert(
                "stock.picking",
                json!({"state": "done", "carrier_tracking_ref": "XYZ", "carrier_code": "ups"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .await
            .unwrap();
        let binding = new_binding(
            &BackendId::new("mage"),
            EntityKind::Picking,
            &picking.id,
            Some(ExternalId::new("100000035")),
            sale_data(&f, Some("complete")),
        );
        f.db.bindings().insert(&binding).await.unwrap();

        let outcome = f.exporter.export_tracking_number(&binding.id).await.unwrap();
        assert_eq!(outcome, TrackingOutcome::Sent);

        let calls = f.fake.calls();
        assert_eq!(calls[0].method, "sales_order_shipment.getCarriers");
        assert_eq!(calls[0].positional_args(), &[json!("100000201")]);
        assert_eq!(calls[1].method, "sales_order_shipment.addTrack");
        assert_eq!(
            calls[1].positional_args(),
            &[json!("100000035"), json!("ups"), json!(""), json!("XYZ")]
        );
    }

    #[tokio::test]
    async fn test_tracking_waits_for_shipment_export() {
        let f = fixture("100000201").await;
        let binding = pending(
            &f,
            EntityKind::Picking,
            "stock.picking",
            json!({"carrier_tracking_ref": "XYZ", "carrier_code": "ups"}),
            sale_data(&f, Some("complete")),
        )
        .await;

        let err = f.exporter.export_tracking_number(&binding.id).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(f.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_carrier_is_rejected() {
        let f = fixture("100000201").await;
        f.fake.respond("sales_order_shipment.getCarriers", json!({"custom": "Custom Value"}));
        let picking = f
            .db
            .records()
            .insert(
                "stock.picking",
                json!({"carrier_tracking_ref": "XYZ", "carrier_code": "ups"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .await
            .unwrap();
        let binding = new_binding(
            &BackendId::new("mage"),
            EntityKind::Picking,
            &picking.id,
            Some(ExternalId::new("100000035")),
            sale_data(&f, None),
        );
        f.db.bindings().insert(&binding).await.unwrap();

        let err = f.exporter.export_tracking_number(&binding.id).await.unwrap_err();
        assert!(matches!(err, SyncError::ExportPrecondition(_)));
        assert!(f.fake.calls_to("sales_order_shipment.addTrack").is_empty());
    }

    #[tokio::test]
    async fn test_wrong_binding_kind_is_rejected() {
        let f = fixture("100000201").await;
        let err = f
            .exporter
            .export_invoice(&f.sale_binding.id)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ExportPrecondition(_)));
    }
}
