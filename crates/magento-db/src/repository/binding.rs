//! # Binding Repository
//!
//! Rows of the `bindings` table: one per (backend, local record) pair.
//!
//! ## Uniqueness
//! ```text
//! (backend_id, model, external_id)  unique   ← one local record per remote id
//! (backend_id, model, internal_id)  unique   ← one remote id per local record
//! ```
//!
//! A second insert for the same pair fails with
//! [`DbError::UniqueViolation`]; callers racing on the same remote id see it
//! and retry.

use chrono::{DateTime, Utc};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::debug;

use magento_core::{BackendId, BindingRecord, EntityKind, ExternalId, FieldMap, InternalId};

use super::{decode_map, encode_map};
use crate::error::{DbError, DbResult};

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct BindingRow {
    id: String,
    backend_id: String,
    model: String,
    internal_id: String,
    external_id: Option<String>,
    sync_date: Option<DateTime<Utc>>,
    data: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BindingRow> for BindingRecord {
    type Error = DbError;

    fn try_from(row: BindingRow) -> DbResult<Self> {
        Ok(BindingRecord {
            id: row.id,
            backend_id: BackendId::new(row.backend_id),
            kind: EntityKind::from_binding_model(&row.model)?,
            internal_id: InternalId::new(row.internal_id),
            external_id: row.external_id.map(ExternalId::new),
            sync_date: row.sync_date,
            data: decode_map("bindings.data", &row.data)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_BINDING: &str = r#"
    SELECT id, backend_id, model, internal_id, external_id,
           sync_date, data, created_at, updated_at
    FROM bindings
"#;

// =============================================================================
// Query Helpers
// =============================================================================

pub(crate) async fn fetch_by_id<'e, E>(executor: E, id: &str) -> DbResult<Option<BindingRecord>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("{SELECT_BINDING} WHERE id = ?1");
    let row = sqlx::query_as::<_, BindingRow>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.map(BindingRecord::try_from).transpose()
}

pub(crate) async fn fetch_by_external<'e, E>(
    executor: E,
    backend_id: &BackendId,
    kind: EntityKind,
    external_id: &ExternalId,
) -> DbResult<Option<BindingRecord>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("{SELECT_BINDING} WHERE backend_id = ?1 AND model = ?2 AND external_id = ?3");
    let row = sqlx::query_as::<_, BindingRow>(&sql)
        .bind(backend_id.as_str())
        .bind(kind.binding_model())
        .bind(external_id.as_str())
        .fetch_optional(executor)
        .await?;
    row.map(BindingRecord::try_from).transpose()
}

pub(crate) async fn fetch_by_internal<'e, E>(
    executor: E,
    backend_id: &BackendId,
    kind: EntityKind,
    internal_id: &InternalId,
) -> DbResult<Option<BindingRecord>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("{SELECT_BINDING} WHERE backend_id = ?1 AND model = ?2 AND internal_id = ?3");
    let row = sqlx::query_as::<_, BindingRow>(&sql)
        .bind(backend_id.as_str())
        .bind(kind.binding_model())
        .bind(internal_id.as_str())
        .fetch_optional(executor)
        .await?;
    row.map(BindingRecord::try_from).transpose()
}

/// All bindings of a local record, across backends.
pub(crate) async fn fetch_for_internal<'e, E>(
    executor: E,
    kind: EntityKind,
    internal_id: &InternalId,
) -> DbResult<Vec<BindingRecord>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("{SELECT_BINDING} WHERE model = ?1 AND internal_id = ?2 ORDER BY backend_id ASC");
    let rows = sqlx::query_as::<_, BindingRow>(&sql)
        .bind(kind.binding_model())
        .bind(internal_id.as_str())
        .fetch_all(executor)
        .await?;
    rows.into_iter().map(BindingRecord::try_from).collect()
}

pub(crate) async fn insert<'e, E>(executor: E, binding: &BindingRecord) -> DbResult<()>
where
    E: SqliteExecutor<'e>,
{
    debug!(
        id = %binding.id,
        backend_id = %binding.backend_id,
        model = binding.kind.binding_model(),
        external_id = ?binding.external_id,
        "Inserting binding"
    );

    sqlx::query(
        r#"
        INSERT INTO bindings (
            id, backend_id, model, internal_id, external_id,
            sync_date, data, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&binding.id)
    .bind(binding.backend_id.as_str())
    .bind(binding.kind.binding_model())
    .bind(binding.internal_id.as_str())
    .bind(binding.external_id.as_ref().map(ExternalId::as_str))
    .bind(binding.sync_date)
    .bind(encode_map("bindings.data", &binding.data)?)
    .bind(binding.created_at)
    .bind(binding.updated_at)
    .execute(executor)
    .await
    .map_err(|e| match DbError::from(e) {
        DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
            field,
            value: binding
                .external_id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| binding.internal_id.to_string()),
        },
        other => other,
    })?;

    Ok(())
}

/// Writes the mutable columns of a binding back.
pub(crate) async fn update<'e, E>(executor: E, binding: &BindingRecord) -> DbResult<()>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE bindings SET
            external_id = ?2,
            sync_date = ?3,
            data = ?4,
            updated_at = ?5
        WHERE id = ?1
        "#,
    )
    .bind(&binding.id)
    .bind(binding.external_id.as_ref().map(ExternalId::as_str))
    .bind(binding.sync_date)
    .bind(encode_map("bindings.data", &binding.data)?)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Binding", binding.id.as_str()));
    }
    Ok(())
}

/// Builds an unsaved binding row with a fresh id.
pub fn new_binding(
    backend_id: &BackendId,
    kind: EntityKind,
    internal_id: &InternalId,
    external_id: Option<ExternalId>,
    data: FieldMap,
) -> BindingRecord {
    let now = Utc::now();
    BindingRecord {
        id: uuid::Uuid::new_v4().to_string(),
        backend_id: backend_id.clone(),
        kind,
        internal_id: internal_id.clone(),
        external_id,
        sync_date: None,
        data,
        created_at: now,
        updated_at: now,
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for binding rows.
#[derive(Debug, Clone)]
pub struct BindingRepository {
    pool: SqlitePool,
}

impl BindingRepository {
    /// Creates a new BindingRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BindingRepository { pool }
    }

    /// Gets a binding by its own id.
    pub async fn get(&self, id: &str) -> DbResult<Option<BindingRecord>> {
        fetch_by_id(&self.pool, id).await
    }

    /// Gets a binding by id, failing with `NotFound` when absent.
    pub async fn get_required(&self, id: &str) -> DbResult<BindingRecord> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Binding", id))
    }

    /// Finds the binding of a remote id.
    pub async fn find_by_external(
        &self,
        backend_id: &BackendId,
        kind: EntityKind,
        external_id: &ExternalId,
    ) -> DbResult<Option<BindingRecord>> {
        fetch_by_external(&self.pool, backend_id, kind, external_id).await
    }

    /// Finds the binding of a local record on one backend.
    pub async fn find_by_internal(
        &self,
        backend_id: &BackendId,
        kind: EntityKind,
        internal_id: &InternalId,
    ) -> DbResult<Option<BindingRecord>> {
        fetch_by_internal(&self.pool, backend_id, kind, internal_id).await
    }

    /// Lists the bindings of a local record on every backend.
    pub async fn find_for_internal(
        &self,
        kind: EntityKind,
        internal_id: &InternalId,
    ) -> DbResult<Vec<BindingRecord>> {
        fetch_for_internal(&self.pool, kind, internal_id).await
    }

    /// Lists a backend's bindings of one kind.
    pub async fn list(&self, backend_id: &BackendId, kind: EntityKind) -> DbResult<Vec<BindingRecord>> {
        let sql = format!("{SELECT_BINDING} WHERE backend_id = ?1 AND model = ?2 ORDER BY created_at ASC, id ASC");
        let rows = sqlx::query_as::<_, BindingRow>(&sql)
            .bind(backend_id.as_str())
            .bind(kind.binding_model())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(BindingRecord::try_from).collect()
    }

    /// Counts a backend's bindings of one kind.
    pub async fn count(&self, backend_id: &BackendId, kind: EntityKind) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM bindings WHERE backend_id = ?1 AND model = ?2")
                .bind(backend_id.as_str())
                .bind(kind.binding_model())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Inserts a binding row.
    pub async fn insert(&self, binding: &BindingRecord) -> DbResult<()> {
        insert(&self.pool, binding).await
    }

    /// Writes external id, sync date and data back.
    pub async fn update(&self, binding: &BindingRecord) -> DbResult<()> {
        update(&self.pool, binding).await
    }

    /// Deletes a binding row; the local record stays.
    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM bindings WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    async fn setup() -> (Database, InternalId) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let record = db
            .records()
            .insert("product.category", FieldMap::new())
            .await
            .unwrap();
        (db, record.id)
    }

    #[tokio::test]
    async fn test_insert_and_find_both_ways() {
        let (db, internal) = setup().await;
        let backend = BackendId::new("mage");
        let binding = new_binding(
            &backend,
            EntityKind::ProductCategory,
            &internal,
            Some(ExternalId::new("41")),
            FieldMap::new(),
        );
        db.bindings().insert(&binding).await.unwrap();

        let by_ext = db
            .bindings()
            .find_by_external(&backend, EntityKind::ProductCategory, &ExternalId::new("41"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ext.internal_id, internal);

        let by_int = db
            .bindings()
            .find_by_internal(&backend, EntityKind::ProductCategory, &internal)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_int.external_id, Some(ExternalId::new("41")));

        // Same remote id, other kind: no match
        let other = db
            .bindings()
            .find_by_external(&backend, EntityKind::Product, &ExternalId::new("41"))
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_external_id_is_rejected() {
        let (db, internal) = setup().await;
        let second = db
            .records()
            .insert("product.category", FieldMap::new())
            .await
            .unwrap();
        let backend = BackendId::new("mage");

        let first = new_binding(
            &backend,
            EntityKind::ProductCategory,
            &internal,
            Some(ExternalId::new("41")),
            FieldMap::new(),
        );
        db.bindings().insert(&first).await.unwrap();

        let clash = new_binding(
            &backend,
            EntityKind::ProductCategory,
            &second.id,
            Some(ExternalId::new("41")),
            FieldMap::new(),
        );
        let err = db.bindings().insert(&clash).await.unwrap_err();
        assert!(err.is_unique_violation());

        // Another backend may bind the same remote id
        let elsewhere = new_binding(
            &BackendId::new("mage-eu"),
            EntityKind::ProductCategory,
            &second.id,
            Some(ExternalId::new("41")),
            FieldMap::new(),
        );
        db.bindings().insert(&elsewhere).await.unwrap();
    }

    #[tokio::test]
    async fn test_record_bound_once_per_backend() {
        let (db, internal) = setup().await;
        let backend = BackendId::new("mage");

        let first = new_binding(
            &backend,
            EntityKind::ProductCategory,
            &internal,
            Some(ExternalId::new("41")),
            FieldMap::new(),
        );
        db.bindings().insert(&first).await.unwrap();

        let again = new_binding(
            &backend,
            EntityKind::ProductCategory,
            &internal,
            Some(ExternalId::new("42")),
            FieldMap::new(),
        );
        assert!(db.bindings().insert(&again).await.unwrap_err().is_unique_violation());
    }

    #[tokio::test]
    async fn test_pending_exports_share_null_external_id() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let backend = BackendId::new("mage");

        for _ in 0..2 {
            let invoice = db.records().insert("account.move", FieldMap::new()).await.unwrap();
            let binding = new_binding(&backend, EntityKind::Invoice, &invoice.id, None, FieldMap::new());
            db.bindings().insert(&binding).await.unwrap();
        }

        assert_eq!(db.bindings().count(&backend, EntityKind::Invoice).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_sets_external_id_and_sync_date() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let backend = BackendId::new("mage");
        let invoice = db.records().insert("account.move", FieldMap::new()).await.unwrap();

        let mut binding = new_binding(&backend, EntityKind::Invoice, &invoice.id, None, FieldMap::new());
        db.bindings().insert(&binding).await.unwrap();

        binding.external_id = Some(ExternalId::new("987654321"));
        binding.sync_date = Some(Utc::now());
        db.bindings().update(&binding).await.unwrap();

        let loaded = db.bindings().get_required(&binding.id).await.unwrap();
        assert_eq!(loaded.external_id, Some(ExternalId::new("987654321")));
        assert!(loaded.sync_date.is_some());
    }

    #[tokio::test]
    async fn test_bindings_cascade_with_record() {
        let (db, internal) = setup().await;
        let backend = BackendId::new("mage");
        let binding = new_binding(
            &backend,
            EntityKind::ProductCategory,
            &internal,
            Some(ExternalId::new("7")),
            FieldMap::new(),
        );
        db.bindings().insert(&binding).await.unwrap();

        assert!(db.records().delete(&internal).await.unwrap());
        assert!(db.bindings().get(&binding.id).await.unwrap().is_none());
    }
}
