//! # Record Repository
//!
//! The local record store. Each row is one record of a local model
//! (`product.category`, `sale.order`, `account.move`, ...) with its fields
//! kept as a JSON object.

use chrono::{DateTime, Utc};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::debug;

use magento_core::{FieldMap, InternalId, InternalRecord};

use super::{decode_map, encode_map};
use crate::error::{DbError, DbResult};

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: String,
    model: String,
    fields: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for InternalRecord {
    type Error = DbError;

    fn try_from(row: RecordRow) -> DbResult<Self> {
        Ok(InternalRecord {
            id: InternalId::new(row.id),
            model: row.model,
            fields: decode_map("records.fields", &row.fields)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_RECORD: &str = r#"
    SELECT id, model, fields, created_at, updated_at
    FROM records
"#;

// =============================================================================
// Query Helpers
// =============================================================================

pub(crate) async fn fetch<'e, E>(executor: E, id: &InternalId) -> DbResult<Option<InternalRecord>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("{SELECT_RECORD} WHERE id = ?1");
    let row = sqlx::query_as::<_, RecordRow>(&sql)
        .bind(id.as_str())
        .fetch_optional(executor)
        .await?;
    row.map(InternalRecord::try_from).transpose()
}

pub(crate) async fn insert<'e, E>(executor: E, model: &str, fields: FieldMap) -> DbResult<InternalRecord>
where
    E: SqliteExecutor<'e>,
{
    let now = Utc::now();
    let record = InternalRecord {
        id: InternalId::generate(),
        model: model.to_string(),
        fields,
        created_at: now,
        updated_at: now,
    };

    debug!(id = %record.id, model = %model, "Inserting record");

    sqlx::query(
        r#"
        INSERT INTO records (id, model, fields, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(record.id.as_str())
    .bind(&record.model)
    .bind(encode_map("records.fields", &record.fields)?)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(executor)
    .await?;

    Ok(record)
}

pub(crate) async fn write_fields<'e, E>(executor: E, id: &InternalId, fields: &FieldMap) -> DbResult<()>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE records SET fields = ?2, updated_at = ?3
        WHERE id = ?1
        "#,
    )
    .bind(id.as_str())
    .bind(encode_map("records.fields", fields)?)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Record", id.as_str()));
    }
    Ok(())
}

/// Overlays `changes` on `current`; keys absent from `changes` are kept.
pub(crate) fn merge(mut current: FieldMap, changes: FieldMap) -> FieldMap {
    for (key, value) in changes {
        current.insert(key, value);
    }
    current
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for local records.
#[derive(Debug, Clone)]
pub struct RecordRepository {
    pool: SqlitePool,
}

impl RecordRepository {
    /// Creates a new RecordRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RecordRepository { pool }
    }

    /// Gets a record by id.
    pub async fn get(&self, id: &InternalId) -> DbResult<Option<InternalRecord>> {
        fetch(&self.pool, id).await
    }

    /// Gets a record by id, failing with `NotFound` when absent.
    pub async fn get_required(&self, id: &InternalId) -> DbResult<InternalRecord> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Record", id.as_str()))
    }

    /// Lists the records of a model, oldest first.
    pub async fn list_by_model(&self, model: &str) -> DbResult<Vec<InternalRecord>> {
        let sql = format!("{SELECT_RECORD} WHERE model = ?1 ORDER BY created_at ASC, id ASC");
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(model)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(InternalRecord::try_from).collect()
    }

    /// Counts the records of a model.
    pub async fn count_by_model(&self, model: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE model = ?1")
            .bind(model)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Creates a record with a fresh id.
    pub async fn insert(&self, model: &str, fields: FieldMap) -> DbResult<InternalRecord> {
        insert(&self.pool, model, fields).await
    }

    /// Merges `changes` into the record's fields.
    pub async fn update_fields(&self, id: &InternalId, changes: FieldMap) -> DbResult<InternalRecord> {
        let current = self.get_required(id).await?;
        let fields = merge(current.fields, changes);
        write_fields(&self.pool, id, &fields).await?;
        self.get_required(id).await
    }

    /// Deletes a record; its bindings cascade.
    pub async fn delete(&self, id: &InternalId) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM records WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
