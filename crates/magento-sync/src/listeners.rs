//! # Export Listeners
//!
//! Decide, from configuration, whether a local transition creates an export
//! binding and its job.
//!
//! ## Invoice Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for each sale order of the invoice                                     │
//! │    for each backend binding of that order                               │
//! │      invoice already bound on this backend? ──► skip                    │
//! │      trigger = payment mode ?? store ?? backend default                 │
//! │      paid ⇒ payment_state == paid     open ⇒ state == posted            │
//! │      match ──► pending binding + ExportInvoice job (one transaction)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Picking Rule
//! `PickingDone` creates one pending binding per backend the order is bound
//! to, classified `complete` or `partial`, with an `ExportPickingDone` job.
//! `TrackingAssigned` on a done, bound picking enqueues
//! `ExportTrackingNumber` for each of its bindings.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use magento_core::picking::{classify, PickingLine};
use magento_core::trigger::{resolve_invoice_trigger, InvoiceStatus};
use magento_core::{
    BackendId, EntityKind, ExternalId, FieldMap, InternalId, InternalRecord, SyncTask,
    DEFAULT_JOB_PRIORITY,
};
use magento_db::{Database, SyncTx};

use crate::binder::BindingRegistry;
use crate::config::ConnectorConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{DomainEvent, EventBus, EventHandler};
use crate::queue::{JobHandle, JobQueue};

// =============================================================================
// Record Readers
// =============================================================================

fn ids_field(record: &InternalRecord, key: &str) -> Vec<InternalId> {
    record
        .fields
        .get(key)
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(InternalId::new)
                .collect()
        })
        .unwrap_or_default()
}

fn invoice_status(record: &InternalRecord) -> SyncResult<InvoiceStatus> {
    let state = record
        .fields
        .get("state")
        .cloned()
        .ok_or_else(|| SyncError::ExportPrecondition(format!("invoice {} has no state", record.id)))?;
    let payment_state = record
        .fields
        .get("payment_state")
        .cloned()
        .unwrap_or_else(|| json!("not_paid"));
    Ok(InvoiceStatus::new(
        serde_json::from_value(state)?,
        serde_json::from_value(payment_state)?,
    ))
}

pub(crate) fn picking_lines(record: &InternalRecord) -> SyncResult<Vec<PickingLine>> {
    match record.fields.get("lines") {
        Some(lines) => Ok(serde_json::from_value(lines.clone())?),
        None => Ok(Vec::new()),
    }
}

async fn required_record(tx: &mut SyncTx, id: &InternalId, what: &str) -> SyncResult<InternalRecord> {
    tx.get_record(id)
        .await?
        .ok_or_else(|| SyncError::ExportPrecondition(format!("{} {} does not exist", what, id)))
}

// =============================================================================
// Invoice Listener
// =============================================================================

/// Creates invoice export bindings when the configured trigger matches.
#[derive(Debug, Clone)]
pub struct InvoiceExportListener {
    db: Database,
    config: Arc<ConnectorConfig>,
    queue: JobQueue,
}

impl InvoiceExportListener {
    pub fn new(db: Database, config: Arc<ConnectorConfig>, queue: JobQueue) -> Self {
        InvoiceExportListener { db, config, queue }
    }

    async fn on_invoice(&self, invoice_id: &InternalId) -> SyncResult<Vec<JobHandle>> {
        let mut tx = self.db.begin().await?;
        let invoice = required_record(&mut tx, invoice_id, "invoice").await?;
        let status = invoice_status(&invoice)?;

        let mut jobs = Vec::new();
        for sale_id in ids_field(&invoice, "sale_order_ids") {
            let Some(sale) = tx.get_record(&sale_id).await? else {
                warn!(sale_order = %sale_id, "Invoiced sale order is missing");
                continue;
            };
            let payment_trigger = sale
                .field_str("payment_mode")
                .and_then(|name| self.config.payment_mode(name))
                .and_then(|mode| mode.create_invoice_on);

            for sale_binding in tx.find_bindings_for_internal(EntityKind::SaleOrder, &sale_id).await? {
                let Ok(backend) = self.config.backend(&sale_binding.backend_id) else {
                    warn!(backend = %sale_binding.backend_id, "Sale order bound to an unconfigured backend");
                    continue;
                };
                if tx
                    .find_binding_by_internal(&backend.id, EntityKind::Invoice, invoice_id)
                    .await?
                    .is_some()
                {
                    debug!(backend = %backend.id, invoice = %invoice_id, "Invoice already bound");
                    continue;
                }

                let store = sale_binding.data_str("store_id").map(ExternalId::new);
                let store_trigger = store
                    .as_ref()
                    .and_then(|id| backend.store(id))
                    .and_then(|s| s.create_invoice_on);
                let trigger =
                    resolve_invoice_trigger(payment_trigger, store_trigger, backend.create_invoice_on);
                if !trigger.matches(&status) {
                    debug!(backend = %backend.id, trigger = ?trigger, "Invoice trigger not reached");
                    continue;
                }

                let mut data = FieldMap::new();
                data.insert("sale_binding_id".into(), json!(sale_binding.id));
                let registry = self.registry(&backend.id);
                let Some(binding) = registry.bind_pending(&mut tx, invoice_id, data).await? else {
                    continue;
                };
                let handle = self
                    .queue
                    .enqueue_in(
                        &mut tx,
                        SyncTask::ExportInvoice {
                            binding_id: binding.id.clone(),
                        },
                        DEFAULT_JOB_PRIORITY,
                    )
                    .await?;
                info!(backend = %backend.id, invoice = %invoice_id, binding = %binding.id, "Invoice export scheduled");
                jobs.push(handle);
            }
        }

        tx.commit().await?;
        Ok(jobs)
    }

    fn registry(&self, backend_id: &BackendId) -> BindingRegistry {
        BindingRegistry::new(self.db.clone(), backend_id.clone(), EntityKind::Invoice)
    }
}

#[async_trait]
impl EventHandler for InvoiceExportListener {
    fn name(&self) -> &'static str {
        "invoice_export"
    }

    async fn handle(&self, event: &DomainEvent) -> SyncResult<Vec<JobHandle>> {
        match event {
            DomainEvent::InvoiceValidated { invoice_id } | DomainEvent::InvoicePaid { invoice_id } => {
                self.on_invoice(invoice_id).await
            }
            _ => Ok(Vec::new()),
        }
    }
}

// =============================================================================
// Picking Listener
// =============================================================================

/// Creates shipment export bindings and tracking jobs.
#[derive(Debug, Clone)]
pub struct PickingExportListener {
    db: Database,
    config: Arc<ConnectorConfig>,
    queue: JobQueue,
}

impl PickingExportListener {
    pub fn new(db: Database, config: Arc<ConnectorConfig>, queue: JobQueue) -> Self {
        PickingExportListener { db, config, queue }
    }

    async fn on_done(&self, picking_id: &InternalId) -> SyncResult<Vec<JobHandle>> {
        let mut tx = self.db.begin().await?;
        let picking = required_record(&mut tx, picking_id, "picking").await?;
        let sale_id = picking
            .field_str("sale_order_id")
            .map(InternalId::new)
            .ok_or_else(|| {
                SyncError::ExportPrecondition(format!("picking {} has no sale order", picking_id))
            })?;
        let method = classify(&picking_lines(&picking)?);

        let mut jobs = Vec::new();
        let mut seen: HashSet<BackendId> = HashSet::new();
        for sale_binding in tx.find_bindings_for_internal(EntityKind::SaleOrder, &sale_id).await? {
            let backend_id = sale_binding.backend_id.clone();
            if !seen.insert(backend_id.clone()) || self.config.backend(&backend_id).is_err() {
                continue;
            }

            let mut data = FieldMap::new();
            data.insert("picking_method".into(), json!(method.as_str()));
            data.insert("sale_binding_id".into(), json!(sale_binding.id));
            let registry = BindingRegistry::new(self.db.clone(), backend_id.clone(), EntityKind::Picking);
            let Some(binding) = registry.bind_pending(&mut tx, picking_id, data).await? else {
                debug!(backend = %backend_id, picking = %picking_id, "Picking already bound");
                continue;
            };

            let handle = self
                .queue
                .enqueue_in(
                    &mut tx,
                    SyncTask::ExportPickingDone {
                        binding_id: binding.id.clone(),
                        with_tracking: false,
                    },
                    DEFAULT_JOB_PRIORITY,
                )
                .await?;
            info!(backend = %backend_id, picking = %picking_id, method = %method, "Picking export scheduled");
            jobs.push(handle);
        }

        tx.commit().await?;
        Ok(jobs)
    }

    async fn on_tracking(&self, picking_id: &InternalId) -> SyncResult<Vec<JobHandle>> {
        let mut tx = self.db.begin().await?;
        let picking = required_record(&mut tx, picking_id, "picking").await?;

        let done = picking.field_str("state") == Some("done");
        let has_ref = picking
            .field_str("carrier_tracking_ref")
            .map_or(false, |r| !r.trim().is_empty());
        if !done || !has_ref {
            debug!(picking = %picking_id, done, has_ref, "Tracking not exportable yet");
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();
        for binding in tx.find_bindings_for_internal(EntityKind::Picking, picking_id).await? {
            let handle = self
                .queue
                .enqueue_in(
                    &mut tx,
                    SyncTask::ExportTrackingNumber {
                        binding_id: binding.id.clone(),
                    },
                    DEFAULT_JOB_PRIORITY,
                )
                .await?;
            info!(backend = %binding.backend_id, picking = %picking_id, "Tracking export scheduled");
            jobs.push(handle);
        }

        tx.commit().await?;
        Ok(jobs)
    }
}

#[async_trait]
impl EventHandler for PickingExportListener {
    fn name(&self) -> &'static str {
        "picking_export"
    }

    async fn handle(&self, event: &DomainEvent) -> SyncResult<Vec<JobHandle>> {
        match event {
            DomainEvent::PickingDone { picking_id } => self.on_done(picking_id).await,
            DomainEvent::TrackingAssigned { picking_id } => self.on_tracking(picking_id).await,
            _ => Ok(Vec::new()),
        }
    }
}

/// Subscribes the export listeners.
pub fn register_export_listeners(
    bus: &mut EventBus,
    db: Database,
    config: Arc<ConnectorConfig>,
    queue: JobQueue,
) {
    bus.subscribe(
        |e| e.entity() == EntityKind::Invoice,
        Arc::new(InvoiceExportListener::new(db.clone(), Arc::clone(&config), queue.clone())),
    );
    bus.subscribe(
        |e| e.entity() == EntityKind::Picking,
        Arc::new(PickingExportListener::new(db, config, queue)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use magento_core::{ApiVersion, BackendConfig, InvoiceTrigger, JobState, PaymentModePolicy, StoreSettings};
    use magento_db::{new_binding, DbConfig};

    struct Fixture {
        db: Database,
        bus: EventBus,
        sale_id: InternalId,
    }

    fn config(store_trigger: Option<InvoiceTrigger>, payment_trigger: Option<InvoiceTrigger>) -> ConnectorConfig {
        let mut backend = BackendConfig::new("mage", "http://mage.test", ApiVersion::V1_7);
        backend.create_invoice_on = InvoiceTrigger::Paid;
        backend.stores.push(StoreSettings {
            id: ExternalId::new("1"),
            name: "Main".into(),
            create_invoice_on: store_trigger,
            send_picking_done_mail: true,
            send_invoice_paid_mail: true,
        });
        let mut config = ConnectorConfig::new();
        config.backends.push(backend);
        config.payment_modes.push(PaymentModePolicy {
            name: "checkmo".into(),
            create_invoice_on: payment_trigger,
        });
        config
    }

    async fn fixture(config: ConnectorConfig) -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut sale_fields = FieldMap::new();
        sale_fields.insert("payment_mode".into(), json!("checkmo"));
        let sale = db.records().insert("sale.order", sale_fields).await.unwrap();

        let mut data = FieldMap::new();
        data.insert("store_id".into(), json!("1"));
        let binding = new_binding(
            &BackendId::new("mage"),
            EntityKind::SaleOrder,
            &sale.id,
            Some(ExternalId::new("100000201")),
            data,
        );
        db.bindings().insert(&binding).await.unwrap();

        let mut bus = EventBus::new();
        register_export_listeners(&mut bus, db.clone(), Arc::new(config), JobQueue::new(db.clone()));
        Fixture {
            db,
            bus,
            sale_id: sale.id,
        }
    }

    async fn invoice(f: &Fixture, state: &str, payment_state: &str) -> InternalId {
        let mut fields = FieldMap::new();
        fields.insert("state".into(), json!(state));
        fields.insert("payment_state".into(), json!(payment_state));
        fields.insert("sale_order_ids".into(), json!([f.sale_id.as_str()]));
        f.db.records().insert("account.move", fields).await.unwrap().id
    }

    async fn set_invoice(f: &Fixture, id: &InternalId, state: &str, payment_state: &str) {
        let mut changes = FieldMap::new();
        changes.insert("state".into(), json!(state));
        changes.insert("payment_state".into(), json!(payment_state));
        f.db.records().update_fields(id, changes).await.unwrap();
    }

    async fn export_jobs(f: &Fixture, name: &str) -> usize {
        f.db.jobs().list_pending_named(name).await.unwrap().len()
    }

    #[tokio::test]
    async fn test_payment_mode_open_wins_over_store_paid() {
        let f = fixture(config(Some(InvoiceTrigger::Paid), Some(InvoiceTrigger::Open))).await;
        let inv = invoice(&f, "posted", "not_paid").await;

        let jobs = f
            .bus
            .publish(DomainEvent::InvoiceValidated { invoice_id: inv.clone() })
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name(), "export_invoice");
    }

    #[tokio::test]
    async fn test_store_paid_waits_for_payment() {
        let f = fixture(config(Some(InvoiceTrigger::Paid), None)).await;
        let inv = invoice(&f, "posted", "not_paid").await;

        let jobs = f
            .bus
            .publish(DomainEvent::InvoiceValidated { invoice_id: inv.clone() })
            .await
            .unwrap();
        assert!(jobs.is_empty());

        set_invoice(&f, &inv, "posted", "paid").await;
        let jobs = f
            .bus
            .publish(DomainEvent::InvoicePaid { invoice_id: inv })
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_reversed_invoice_is_not_exported() {
        let f = fixture(config(Some(InvoiceTrigger::Paid), None)).await;
        let inv = invoice(&f, "posted", "reversed").await;

        let jobs = f
            .bus
            .publish(DomainEvent::InvoicePaid { invoice_id: inv.clone() })
            .await
            .unwrap();
        assert!(jobs.is_empty());

        set_invoice(&f, &inv, "posted", "invoicing_legacy").await;
        let jobs = f
            .bus
            .publish(DomainEvent::InvoicePaid { invoice_id: inv })
            .await
            .unwrap();
        assert!(jobs.is_empty());
        assert_eq!(export_jobs(&f, "export_invoice").await, 0);
    }

    #[tokio::test]
    async fn test_validate_then_pay_exports_once() {
        let f = fixture(config(Some(InvoiceTrigger::Open), None)).await;
        let inv = invoice(&f, "posted", "not_paid").await;

        f.bus
            .publish(DomainEvent::InvoiceValidated { invoice_id: inv.clone() })
            .await
            .unwrap();
        set_invoice(&f, &inv, "posted", "paid").await;
        let second = f
            .bus
            .publish(DomainEvent::InvoicePaid { invoice_id: inv.clone() })
            .await
            .unwrap();

        assert!(second.is_empty());
        assert_eq!(export_jobs(&f, "export_invoice").await, 1);
        let bindings = f
            .db
            .bindings()
            .find_for_internal(EntityKind::Invoice, &inv)
            .await
            .unwrap();
        assert_eq!(bindings.len(), 1);
        assert!(bindings[0].external_id.is_none());
    }

    #[tokio::test]
    async fn test_two_orders_on_one_backend_bind_invoice_once() {
        let f = fixture(config(Some(InvoiceTrigger::Open), None)).await;
        let other_sale = f.db.records().insert("sale.order", FieldMap::new()).await.unwrap();
        let mut data = FieldMap::new();
        data.insert("store_id".into(), json!("1"));
        f.db.bindings()
            .insert(&new_binding(
                &BackendId::new("mage"),
                EntityKind::SaleOrder,
                &other_sale.id,
                Some(ExternalId::new("100000202")),
                data,
            ))
            .await
            .unwrap();

        let mut fields = FieldMap::new();
        fields.insert("state".into(), json!("posted"));
        fields.insert("payment_state".into(), json!("not_paid"));
        fields.insert(
            "sale_order_ids".into(),
            json!([f.sale_id.as_str(), other_sale.id.as_str()]),
        );
        let inv = f.db.records().insert("account.move", fields).await.unwrap().id;

        let jobs = f
            .bus
            .publish(DomainEvent::InvoiceValidated { invoice_id: inv })
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }

    async fn picking(f: &Fixture, lines: Value, state: &str, tracking: Option<&str>) -> InternalId {
        let mut fields = FieldMap::new();
        fields.insert("sale_order_id".into(), json!(f.sale_id.as_str()));
        fields.insert("lines".into(), lines);
        fields.insert("state".into(), json!(state));
        if let Some(tracking) = tracking {
            fields.insert("carrier_tracking_ref".into(), json!(tracking));
        }
        f.db.records().insert("stock.picking", fields).await.unwrap().id
    }

    #[tokio::test]
    async fn test_partial_picking_binding() {
        let f = fixture(config(None, None)).await;
        let pick = picking(
            &f,
            json!([
                {"order_item_id": "543", "ordered_qty": 1.0, "done_qty": 1.0},
                {"order_item_id": "544", "ordered_qty": 1.0, "done_qty": 0.0}
            ]),
            "done",
            None,
        )
        .await;

        let jobs = f
            .bus
            .publish(DomainEvent::PickingDone { picking_id: pick.clone() })
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);

        let binding = &f
            .db
            .bindings()
            .find_for_internal(EntityKind::Picking, &pick)
            .await
            .unwrap()[0];
        assert_eq!(binding.data_str("picking_method"), Some("partial"));

        let job = f.db.jobs().get(jobs[0].id()).await.unwrap().unwrap();
        assert_eq!(
            job.task,
            SyncTask::ExportPickingDone {
                binding_id: binding.id.clone(),
                with_tracking: false
            }
        );
        assert_eq!(job.state, JobState::Pending);
    }

    #[tokio::test]
    async fn test_complete_picking_binding_is_created_once() {
        let f = fixture(config(None, None)).await;
        let pick = picking(
            &f,
            json!([{"order_item_id": "543", "ordered_qty": 2.0, "done_qty": 2.0}]),
            "done",
            None,
        )
        .await;

        f.bus
            .publish(DomainEvent::PickingDone { picking_id: pick.clone() })
            .await
            .unwrap();
        let again = f
            .bus
            .publish(DomainEvent::PickingDone { picking_id: pick.clone() })
            .await
            .unwrap();
        assert!(again.is_empty());

        let bindings = f
            .db
            .bindings()
            .find_for_internal(EntityKind::Picking, &pick)
            .await
            .unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].data_str("picking_method"), Some("complete"));
    }

    #[tokio::test]
    async fn test_tracking_needs_done_and_bound_picking() {
        let f = fixture(config(None, None)).await;
        let lines = json!([{"order_item_id": "543", "ordered_qty": 1.0, "done_qty": 1.0}]);

        let unbound = picking(&f, lines.clone(), "done", Some("XYZ")).await;
        let jobs = f
            .bus
            .publish(DomainEvent::TrackingAssigned { picking_id: unbound })
            .await
            .unwrap();
        assert!(jobs.is_empty());

        let waiting = picking(&f, lines.clone(), "assigned", Some("XYZ")).await;
        let jobs = f
            .bus
            .publish(DomainEvent::TrackingAssigned { picking_id: waiting })
            .await
            .unwrap();
        assert!(jobs.is_empty());

        let shipped = picking(&f, lines, "done", Some("XYZ")).await;
        f.bus
            .publish(DomainEvent::PickingDone { picking_id: shipped.clone() })
            .await
            .unwrap();
        let jobs = f
            .bus
            .publish(DomainEvent::TrackingAssigned { picking_id: shipped })
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name(), "export_tracking_number");
    }
}
