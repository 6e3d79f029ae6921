//! # Connector
//!
//! Entry point wiring the components together for a host application.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Connector                                  │
//! │                                                                         │
//! │   host events ──publish──► EventBus ──► listeners ──► JobQueue          │
//! │   operator    ──schedule_import / schedule_batch / import_since──►      │
//! │                                                          │              │
//! │                                                          ▼              │
//! │                     JobWorker ──claim──► Connector::run_task            │
//! │                                              │                          │
//! │              ┌───────────────────┬───────────┴──────────┐               │
//! │              ▼                   ▼                      ▼               │
//! │          Importer          BatchImporter            Exporter            │
//! │        (per backend)       (delayed mode)        (per binding's         │
//! │                                                     backend)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The connector owns no background task. `worker()` returns a
//! [`JobWorker`] the host spawns next to its own runtime.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument};

use magento_core::{BackendId, BatchFilter, EntityKind, ExternalId, SyncTask, DEFAULT_JOB_PRIORITY};
use magento_db::Database;

use crate::batch::{BatchImporter, BatchMode};
use crate::config::ConnectorConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{DomainEvent, EventBus};
use crate::exporter::Exporter;
use crate::importer::Importer;
use crate::listeners::register_export_listeners;
use crate::queue::{JobHandle, JobQueue};
use crate::remote::RemoteApi;
use crate::worker::{JobWorker, JobWorkerHandle, TaskRunner};

/// Orchestrates imports, exports and the job queue for every backend.
pub struct Connector {
    db: Database,
    config: Arc<ConnectorConfig>,
    api: Arc<dyn RemoteApi>,
    queue: JobQueue,
    bus: EventBus,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("backends", &self.config.backends.len())
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Creates a connector with the export listeners subscribed.
    pub fn new(db: Database, config: ConnectorConfig, api: Arc<dyn RemoteApi>) -> Self {
        let config = Arc::new(config);
        let queue = JobQueue::new(db.clone()).with_max_attempts(config.worker.max_attempts);

        let mut bus = EventBus::new();
        register_export_listeners(&mut bus, db.clone(), config.clone(), queue.clone());

        info!(
            backends = config.backends.len(),
            handlers = bus.len(),
            "Connector ready"
        );

        Connector {
            db,
            config,
            api,
            queue,
            bus,
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Bus for subscribing additional handlers.
    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    // =========================================================================
    // Components per Backend
    // =========================================================================

    pub fn importer(&self, backend_id: &BackendId) -> SyncResult<Importer> {
        let backend = self.config.backend(backend_id)?.clone();
        Ok(Importer::new(self.db.clone(), Arc::new(backend), self.api.clone()))
    }

    pub fn batch_importer(&self, backend_id: &BackendId, mode: BatchMode) -> SyncResult<BatchImporter> {
        Ok(BatchImporter::new(self.importer(backend_id)?, self.queue.clone()).with_mode(mode))
    }

    pub fn exporter(&self, backend_id: &BackendId) -> SyncResult<Exporter> {
        let backend = self.config.backend(backend_id)?.clone();
        Ok(Exporter::new(self.db.clone(), Arc::new(backend), self.api.clone()))
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Enqueues the import of one remote record.
    pub async fn schedule_import(
        &self,
        backend_id: &BackendId,
        kind: EntityKind,
        external_id: ExternalId,
        force: bool,
    ) -> SyncResult<JobHandle> {
        self.config.backend(backend_id)?;
        let task = SyncTask::ImportRecord {
            backend_id: backend_id.clone(),
            kind,
            external_id,
            force,
        };
        self.queue.enqueue(task, DEFAULT_JOB_PRIORITY).await
    }

    /// Enqueues a batch import with an explicit filter.
    pub async fn schedule_batch(
        &self,
        backend_id: &BackendId,
        kind: EntityKind,
        filter: BatchFilter,
    ) -> SyncResult<JobHandle> {
        self.config.backend(backend_id)?;
        if !kind.is_importable() {
            return Err(SyncError::InvalidConfig(format!("{} records are not imported", kind)));
        }
        let task = SyncTask::ImportBatch {
            backend_id: backend_id.clone(),
            kind,
            filter,
        };
        self.queue.enqueue(task, DEFAULT_JOB_PRIORITY).await
    }

    /// Enqueues a batch import of the records updated since the start date
    /// configured for `kind` on the backend.
    pub async fn import_since(&self, backend_id: &BackendId, kind: EntityKind) -> SyncResult<JobHandle> {
        let from = self.config.backend(backend_id)?.import_from_date(kind);
        let filter = BatchFilter::between(from, Some(Utc::now()));
        self.schedule_batch(backend_id, kind, filter).await
    }

    /// Dispatches a local state transition to the subscribed listeners.
    pub async fn publish(&self, event: DomainEvent) -> SyncResult<Vec<JobHandle>> {
        self.bus.publish(event).await
    }

    /// Worker executing this connector's jobs.
    pub fn worker(self: &Arc<Self>) -> (JobWorker, JobWorkerHandle) {
        JobWorker::new(self.db.clone(), self.clone(), self.config.worker.clone())
    }

    async fn binding_backend(&self, binding_id: &str) -> SyncResult<BackendId> {
        Ok(self.db.bindings().get_required(binding_id).await?.backend_id)
    }
}

#[async_trait]
impl TaskRunner for Connector {
    #[instrument(skip(self), fields(task = task.name()))]
    async fn run_task(&self, task: &SyncTask) -> SyncResult<Option<String>> {
        match task {
            SyncTask::ImportRecord {
                backend_id,
                kind,
                external_id,
                force,
            } => {
                let outcome = self
                    .importer(backend_id)?
                    .import(*kind, external_id, *force)
                    .await?;
                let mut result = format!("{} {} {}", outcome.action, kind, external_id);
                if let Some(hook_error) = outcome.hook_error {
                    result.push_str(&format!(" (hook failed: {})", hook_error));
                }
                Ok(Some(result))
            }
            SyncTask::ImportBatch {
                backend_id,
                kind,
                filter,
            } => {
                let report = self
                    .batch_importer(backend_id, BatchMode::Delayed)?
                    .run(*kind, filter)
                    .await?;
                Ok(Some(format!("{} {} records scheduled", report.jobs.len(), kind)))
            }
            SyncTask::ExportInvoice { binding_id } => {
                let backend_id = self.binding_backend(binding_id).await?;
                let outcome = self.exporter(&backend_id)?.export_invoice(binding_id).await?;
                Ok(Some(format!("invoice {}", outcome)))
            }
            SyncTask::ExportPickingDone {
                binding_id,
                with_tracking,
            } => {
                let backend_id = self.binding_backend(binding_id).await?;
                let outcome = self
                    .exporter(&backend_id)?
                    .export_picking_done(binding_id, *with_tracking)
                    .await?;
                Ok(Some(format!("shipment {}", outcome)))
            }
            SyncTask::ExportTrackingNumber { binding_id } => {
                let backend_id = self.binding_backend(binding_id).await?;
                let outcome = self
                    .exporter(&backend_id)?
                    .export_tracking_number(binding_id)
                    .await?;
                Ok(Some(outcome.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMagento;
    use magento_core::{ApiVersion, BackendConfig, FieldMap, InternalId, JobState, StoreSettings};
    use magento_db::{new_binding, DbConfig};
    use serde_json::json;

    async fn connector() -> (Arc<Connector>, FakeMagento) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let fake = FakeMagento::new();
        let mut backend = BackendConfig::new("mage", "http://mage.test", ApiVersion::V1_7);
        backend.stores.push(StoreSettings {
            id: ExternalId::new("1"),
            name: "Main".into(),
            create_invoice_on: None,
            send_picking_done_mail: false,
            send_invoice_paid_mail: true,
        });
        let mut config = ConnectorConfig::new();
        config.backends.push(backend);
        (Arc::new(Connector::new(db, config, fake.api())), fake)
    }

    async fn bound_sale(c: &Connector, increment: &str) -> InternalId {
        let sale = c.db().records().insert("sale.order", FieldMap::new()).await.unwrap();
        let mut data = FieldMap::new();
        data.insert("store_id".into(), json!("1"));
        let binding = new_binding(
            &BackendId::new("mage"),
            EntityKind::SaleOrder,
            &sale.id,
            Some(ExternalId::new(increment)),
            data,
        );
        c.db().bindings().insert(&binding).await.unwrap();
        sale.id
    }

    #[tokio::test]
    async fn test_paid_invoice_is_exported_by_worker() {
        let (c, fake) = connector().await;
        fake.respond("sales_order_invoice.create", json!("200000001"));
        let sale = bound_sale(&c, "145000008").await;

        let mut fields = FieldMap::new();
        fields.insert("state".into(), json!("posted"));
        fields.insert("payment_state".into(), json!("paid"));
        fields.insert("sale_order_ids".into(), json!([sale.as_str()]));
        fields.insert("lines".into(), json!([{"order_item_id": "598", "quantity": 2.0}]));
        let invoice = c.db().records().insert("account.move", fields).await.unwrap();

        let jobs = c
            .publish(DomainEvent::InvoicePaid {
                invoice_id: invoice.id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);

        let (worker, _handle) = c.worker();
        let report = worker.run_once().await.unwrap();
        assert_eq!(report.done, 1);

        let calls = fake.calls_to("sales_order_invoice.create");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].positional_args()[1], json!({"598": 2.0}));

        let remote = crate::binder::BindingRegistry::new(
            c.db().clone(),
            BackendId::new("mage"),
            EntityKind::Invoice,
        )
        .to_external(&invoice.id)
        .await
        .unwrap();
        assert_eq!(remote, Some(ExternalId::new("200000001")));
    }

    #[tokio::test]
    async fn test_scheduled_import_runs_through_worker() {
        let (c, fake) = connector().await;
        fake.record(
            "customer.info",
            "5",
            json!({"customer_id": "5", "firstname": "Ann", "lastname": "Lee", "email": "ann@example.com"}),
        );

        let handle = c
            .schedule_import(&BackendId::new("mage"), EntityKind::Partner, ExternalId::new("5"), false)
            .await
            .unwrap();
        let (worker, _handle) = c.worker();
        worker.run_once().await.unwrap();

        let job = c.queue().status(&handle).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(c.db().records().count_by_model("res.partner").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_record_fails_without_retry() {
        let (c, _fake) = connector().await;
        let handle = c
            .schedule_import(&BackendId::new("mage"), EntityKind::Partner, ExternalId::new("404"), false)
            .await
            .unwrap();
        let (worker, _handle) = c.worker();
        let report = worker.run_once().await.unwrap();
        assert_eq!(report.failed, 1);

        let job = c.queue().status(&handle).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn test_unknown_backend_is_rejected() {
        let (c, _fake) = connector().await;
        let err = c
            .schedule_import(&BackendId::new("other"), EntityKind::Partner, ExternalId::new("5"), false)
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_invoices_are_not_batch_imported() {
        let (c, _fake) = connector().await;
        let err = c
            .schedule_batch(&BackendId::new("mage"), EntityKind::Invoice, BatchFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_batch_job_schedules_record_jobs() {
        let (c, fake) = connector().await;
        fake.respond("customer.search", json!([{"customer_id": "5"}, {"customer_id": "6"}]));

        c.import_since(&BackendId::new("mage"), EntityKind::Partner)
            .await
            .unwrap();
        let batch = c.db().jobs().list_pending_named("import_batch").await.unwrap();
        assert_eq!(batch.len(), 1);
        let result = c.run_task(&batch[0].task).await.unwrap();
        assert_eq!(result.as_deref(), Some("2 partner records scheduled"));

        let pending = c.db().jobs().list_pending_named("import_record").await.unwrap();
        assert_eq!(pending.len(), 2);
    }
}
