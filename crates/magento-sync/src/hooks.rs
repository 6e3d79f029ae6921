//! Post-import hooks.
//!
//! A hook runs after the import transaction committed. Its failure is
//! reported in the [`ImportOutcome`](crate::importer::ImportOutcome) and
//! never undoes the import.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use magento_core::{BackendConfig, EntityKind, ExternalId, FieldMap, InternalId};
use magento_db::Database;

use crate::adapter::MagentoAdapter;
use crate::error::SyncResult;

/// What a hook gets to work with.
pub struct HookContext<'a> {
    pub backend: &'a BackendConfig,
    pub db: &'a Database,
    /// Adapter of the imported kind.
    pub adapter: &'a MagentoAdapter,
    pub external_id: &'a ExternalId,
    pub internal_id: &'a InternalId,
}

/// Work done after a successful import of one kind.
#[async_trait]
pub trait AfterImportHook: Send + Sync {
    fn kind(&self) -> EntityKind;

    async fn after_import(&self, ctx: &HookContext<'_>) -> SyncResult<()>;
}

/// Imports category names and descriptions of every configured storeview.
///
/// Stored under the record's `translations` field, keyed by language.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryTranslationHook;

const TRANSLATABLE: [&str; 2] = ["name", "description"];

#[async_trait]
impl AfterImportHook for CategoryTranslationHook {
    fn kind(&self) -> EntityKind {
        EntityKind::ProductCategory
    }

    async fn after_import(&self, ctx: &HookContext<'_>) -> SyncResult<()> {
        if ctx.backend.storeviews.is_empty() {
            return Ok(());
        }

        let current = ctx.db.records().get_required(ctx.internal_id).await?;
        let mut translations = current
            .fields
            .get("translations")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        for view in &ctx.backend.storeviews {
            let record = ctx.adapter.read(ctx.external_id, Some(&view.id)).await?;
            let mut values = FieldMap::new();
            for key in TRANSLATABLE {
                if let Some(text) = record.get_non_empty(key) {
                    values.insert(key.into(), json!(text));
                }
            }
            debug!(lang = %view.lang, fields = values.len(), "Storeview values read");
            translations.insert(view.lang.clone(), Value::Object(values));
        }

        let mut changes = FieldMap::new();
        changes.insert("translations".into(), Value::Object(translations));
        ctx.db.records().update_fields(ctx.internal_id, changes).await?;
        Ok(())
    }
}
