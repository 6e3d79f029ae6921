//! # Sync Transaction
//!
//! A unit of work over records, bindings and jobs.
//!
//! ## Why One Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE TRANSACTION                                    │
//! │                                                                         │
//! │  Import:    INSERT records  +  INSERT bindings                          │
//! │  Listener:  INSERT bindings (external_id NULL)  +  INSERT jobs          │
//! │  Export:    UPDATE bindings SET external_id, sync_date                  │
//! │                                                                         │
//! │  COMMIT ← all succeed or none; a binding never exists without its      │
//! │           record, an export binding never exists without its job        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{Sqlite, SqliteConnection, Transaction};

use magento_core::{BackendId, BindingRecord, EntityKind, ExternalId, FieldMap, InternalId, InternalRecord, Job};

use crate::error::{DbError, DbResult};
use crate::repository::job::JobSpec;
use crate::repository::{binding, job, record};

/// An open database transaction.
///
/// Dropped without [`commit`](SyncTx::commit), it rolls back.
pub struct SyncTx {
    tx: Transaction<'static, Sqlite>,
}

impl std::fmt::Debug for SyncTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTx").finish_non_exhaustive()
    }
}

impl SyncTx {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        SyncTx { tx }
    }

    /// The underlying connection, for queries not covered here.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    // -------------------------------------------------------------------------
    // Records
    // -------------------------------------------------------------------------

    pub async fn get_record(&mut self, id: &InternalId) -> DbResult<Option<InternalRecord>> {
        record::fetch(&mut *self.tx, id).await
    }

    pub async fn get_record_required(&mut self, id: &InternalId) -> DbResult<InternalRecord> {
        self.get_record(id)
            .await?
            .ok_or_else(|| DbError::not_found("Record", id.as_str()))
    }

    pub async fn insert_record(&mut self, model: &str, fields: FieldMap) -> DbResult<InternalRecord> {
        record::insert(&mut *self.tx, model, fields).await
    }

    /// Merges `changes` into the record's fields.
    pub async fn update_record(&mut self, id: &InternalId, changes: FieldMap) -> DbResult<()> {
        let current = self.get_record_required(id).await?;
        let fields = record::merge(current.fields, changes);
        record::write_fields(&mut *self.tx, id, &fields).await
    }

    // -------------------------------------------------------------------------
    // Bindings
    // -------------------------------------------------------------------------

    pub async fn get_binding(&mut self, id: &str) -> DbResult<Option<BindingRecord>> {
        binding::fetch_by_id(&mut *self.tx, id).await
    }

    pub async fn find_binding_by_external(
        &mut self,
        backend_id: &BackendId,
        kind: EntityKind,
        external_id: &ExternalId,
    ) -> DbResult<Option<BindingRecord>> {
        binding::fetch_by_external(&mut *self.tx, backend_id, kind, external_id).await
    }

    pub async fn find_binding_by_internal(
        &mut self,
        backend_id: &BackendId,
        kind: EntityKind,
        internal_id: &InternalId,
    ) -> DbResult<Option<BindingRecord>> {
        binding::fetch_by_internal(&mut *self.tx, backend_id, kind, internal_id).await
    }

    /// All bindings of a local record, across backends.
    pub async fn find_bindings_for_internal(
        &mut self,
        kind: EntityKind,
        internal_id: &InternalId,
    ) -> DbResult<Vec<BindingRecord>> {
        binding::fetch_for_internal(&mut *self.tx, kind, internal_id).await
    }

    pub async fn insert_binding(&mut self, record: &BindingRecord) -> DbResult<()> {
        binding::insert(&mut *self.tx, record).await
    }

    pub async fn update_binding(&mut self, record: &BindingRecord) -> DbResult<()> {
        binding::update(&mut *self.tx, record).await
    }

    // -------------------------------------------------------------------------
    // Jobs
    // -------------------------------------------------------------------------

    /// Enqueues a job that becomes visible on commit.
    pub async fn enqueue_job(&mut self, spec: &JobSpec) -> DbResult<Job> {
        job::insert(&mut *self.tx, spec).await
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    pub async fn commit(self) -> DbResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))
    }

    pub async fn rollback(self) -> DbResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::binding::new_binding;
    use crate::{Database, DbConfig};
    use magento_core::{JobState, SyncTask};

    #[tokio::test]
    async fn test_commit_persists_all_rows() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let backend = BackendId::new("mage");

        let mut tx = db.begin().await.unwrap();
        let invoice = tx.insert_record("account.move", FieldMap::new()).await.unwrap();
        let binding = new_binding(&backend, EntityKind::Invoice, &invoice.id, None, FieldMap::new());
        tx.insert_binding(&binding).await.unwrap();
        tx.enqueue_job(&JobSpec::new(SyncTask::ExportInvoice {
            binding_id: binding.id.clone(),
        }))
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert!(db.bindings().get(&binding.id).await.unwrap().is_some());
        assert_eq!(db.jobs().count_by_state(JobState::Pending).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        {
            let mut tx = db.begin().await.unwrap();
            tx.insert_record("product.category", FieldMap::new()).await.unwrap();
            // dropped without commit
        }

        assert_eq!(db.records().count_by_model("product.category").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reads_see_own_writes() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let backend = BackendId::new("mage");

        let mut tx = db.begin().await.unwrap();
        let category = tx.insert_record("product.category", FieldMap::new()).await.unwrap();
        let binding = new_binding(
            &backend,
            EntityKind::ProductCategory,
            &category.id,
            Some(ExternalId::new("3")),
            FieldMap::new(),
        );
        tx.insert_binding(&binding).await.unwrap();

        let found = tx
            .find_binding_by_external(&backend, EntityKind::ProductCategory, &ExternalId::new("3"))
            .await
            .unwrap();
        assert_eq!(found.map(|b| b.internal_id), Some(category.id.clone()));

        let all = tx
            .find_bindings_for_internal(EntityKind::ProductCategory, &category.id)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        tx.rollback().await.unwrap();
    }
}
