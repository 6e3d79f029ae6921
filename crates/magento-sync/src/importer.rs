//! # Record Importer
//!
//! Imports one remote record, pulling in whatever it depends on.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Fetching ──► ResolvingDependencies ──► Mapping ──► Upserting ──► Done  │
//! │     │                  │                   │            │               │
//! │     │ RecordNotFound   │ Cyclic / TooDeep  │ Mapping    │ Conflict (R)  │
//! │     ▼                  ▼                   ▼            ▼               │
//! │  ───────────────────────────── Failed ──────────────────────────────    │
//! │                                                                         │
//! │  Fetching may also end in Done(Skipped) when the binding's sync date   │
//! │  is not older than the remote updated_at (unless forced).              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dependency Chain
//! Each dependency import runs inside the chain of its parent import:
//! ```text
//! import 41 ─► parent 40 unbound ─► import 40 ─► parent 3 unbound ─► ...
//! chain: [41]          [41, 40]             [41, 40, 3]
//! ```
//! Entering an id already on the chain fails with `CyclicDependency`; a
//! chain longer than the depth limit fails with `DependencyTooDeep`.
//!
//! The record write and the binding write share one transaction; no
//! partial write survives a failure.

use std::fmt;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use tracing::{debug, info, instrument, warn};

use magento_core::{
    BackendConfig, BindingRecord, EntityKind, ExternalId, InternalId, MAX_DEPENDENCY_DEPTH,
};
use magento_db::{Database, SyncTx};

use crate::adapter::{AdapterStrategy, MagentoAdapter};
use crate::binder::BindingRegistry;
use crate::error::{SyncError, SyncResult};
use crate::hooks::{AfterImportHook, CategoryTranslationHook, HookContext};
use crate::mapper::{mapper_for, MapContext, MappedRecord};
use crate::remote::RemoteApi;

// =============================================================================
// State and Outcome
// =============================================================================

/// Steps of a single import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Fetching,
    ResolvingDependencies,
    Mapping,
    Upserting,
    Done,
    Failed,
}

/// What the upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportAction {
    Created,
    Updated,
    /// The local copy was already up to date.
    Skipped,
}

impl fmt::Display for ImportAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportAction::Created => write!(f, "created"),
            ImportAction::Updated => write!(f, "updated"),
            ImportAction::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of a successful import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub kind: EntityKind,
    pub external_id: ExternalId,
    pub binding_id: String,
    pub internal_id: InternalId,
    pub action: ImportAction,
    /// Dependency records imported on the way.
    pub dependencies_imported: usize,
    /// Failure of a post-import hook; the import itself stands.
    pub hook_error: Option<String>,
}

// =============================================================================
// Import Chain
// =============================================================================

/// Records in progress along one dependency chain.
#[derive(Debug, Default)]
struct ImportChain {
    entries: Vec<(EntityKind, ExternalId)>,
    max_depth: usize,
}

impl ImportChain {
    fn new(max_depth: usize) -> Self {
        ImportChain {
            entries: Vec::new(),
            max_depth,
        }
    }

    fn enter(&mut self, kind: EntityKind, external_id: &ExternalId) -> SyncResult<()> {
        if self
            .entries
            .iter()
            .any(|(k, id)| *k == kind && id == external_id)
        {
            let mut chain: Vec<String> = self
                .entries
                .iter()
                .map(|(k, id)| format!("{}:{}", k, id))
                .collect();
            chain.push(format!("{}:{}", kind, external_id));
            return Err(SyncError::CyclicDependency {
                kind,
                external_id: external_id.clone(),
                chain: chain.join(" -> "),
            });
        }
        if self.entries.len() >= self.max_depth {
            return Err(SyncError::DependencyTooDeep {
                kind,
                external_id: external_id.clone(),
                max: self.max_depth,
            });
        }
        self.entries.push((kind, external_id.clone()));
        Ok(())
    }

    fn leave(&mut self) {
        self.entries.pop();
    }
}

// =============================================================================
// Importer
// =============================================================================

/// Imports remote records of one backend.
#[derive(Clone)]
pub struct Importer {
    db: Database,
    backend: Arc<BackendConfig>,
    adapter: MagentoAdapter,
    hooks: Vec<Arc<dyn AfterImportHook>>,
    max_depth: usize,
}

impl fmt::Debug for Importer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Importer")
            .field("backend", &self.backend.id)
            .field("hooks", &self.hooks.len())
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl Importer {
    /// Creates an importer with the category translation hook installed.
    pub fn new(db: Database, backend: Arc<BackendConfig>, api: Arc<dyn RemoteApi>) -> Self {
        let adapter = MagentoAdapter::new(
            api,
            AdapterStrategy::from(backend.version),
            EntityKind::ProductCategory,
        );
        Importer {
            db,
            backend,
            adapter,
            hooks: vec![Arc::new(CategoryTranslationHook)],
            max_depth: MAX_DEPENDENCY_DEPTH,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn AfterImportHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.hooks.clear();
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    /// Adapter for a kind of this backend.
    pub fn adapter(&self, kind: EntityKind) -> MagentoAdapter {
        self.adapter.for_kind(kind)
    }

    /// Imports one remote record.
    ///
    /// `force` re-imports even when the local copy is up to date.
    #[instrument(skip(self), fields(backend = %self.backend.id))]
    pub async fn import(
        &self,
        kind: EntityKind,
        external_id: &ExternalId,
        force: bool,
    ) -> SyncResult<ImportOutcome> {
        let mut chain = ImportChain::new(self.max_depth);
        let outcome = self
            .import_in_chain(kind, external_id.clone(), force, &mut chain)
            .await?;
        info!(
            kind = %kind,
            external_id = %external_id,
            action = %outcome.action,
            dependencies = outcome.dependencies_imported,
            "Import finished"
        );
        Ok(outcome)
    }

    fn import_in_chain<'a>(
        &'a self,
        kind: EntityKind,
        external_id: ExternalId,
        force: bool,
        chain: &'a mut ImportChain,
    ) -> BoxFuture<'a, SyncResult<ImportOutcome>> {
        async move {
            chain.enter(kind, &external_id)?;
            let result = self.run(kind, &external_id, force, chain).await;
            chain.leave();
            if let Err(e) = &result {
                debug!(kind = %kind, external_id = %external_id, state = ?ImportState::Failed, error = %e, "Import failed");
            }
            result
        }
        .boxed()
    }

    async fn run(
        &self,
        kind: EntityKind,
        external_id: &ExternalId,
        force: bool,
        chain: &mut ImportChain,
    ) -> SyncResult<ImportOutcome> {
        let mapper = mapper_for(kind)?;
        let adapter = self.adapter.for_kind(kind);
        let registry = BindingRegistry::new(self.db.clone(), self.backend.id.clone(), kind);

        // ---------------------------------------------------------------------
        // Fetching
        // ---------------------------------------------------------------------
        debug!(kind = %kind, external_id = %external_id, state = ?ImportState::Fetching, "Import step");
        let record = adapter.read(external_id, None).await?;
        let existing = registry.to_internal(external_id).await?;

        if let (false, Some(binding)) = (force, &existing) {
            let remote_updated = record.get_datetime("updated_at");
            if let (Some(synced), Some(updated)) = (binding.sync_date, remote_updated) {
                if updated <= synced {
                    debug!(kind = %kind, external_id = %external_id, "Already up to date");
                    return Ok(ImportOutcome {
                        kind,
                        external_id: external_id.clone(),
                        binding_id: binding.id.clone(),
                        internal_id: binding.internal_id.clone(),
                        action: ImportAction::Skipped,
                        dependencies_imported: 0,
                        hook_error: None,
                    });
                }
            }
        }

        // ---------------------------------------------------------------------
        // ResolvingDependencies
        // ---------------------------------------------------------------------
        debug!(kind = %kind, external_id = %external_id, state = ?ImportState::ResolvingDependencies, "Import step");
        let mut dependencies_imported = 0;
        for (dep_kind, dep_id) in mapper.dependencies(&record, &self.backend) {
            if registry.for_kind(dep_kind).to_internal(&dep_id).await?.is_some() {
                continue;
            }
            debug!(dependency = %dep_id, dependency_kind = %dep_kind, "Importing missing dependency");
            let outcome = self.import_in_chain(dep_kind, dep_id, false, chain).await?;
            dependencies_imported += 1 + outcome.dependencies_imported;
        }

        // ---------------------------------------------------------------------
        // Mapping
        // ---------------------------------------------------------------------
        debug!(kind = %kind, external_id = %external_id, state = ?ImportState::Mapping, "Import step");
        let ctx = MapContext::new(&self.backend, &registry, external_id, existing.as_ref());
        let mapped = mapper.to_internal(&record, &ctx).await?;

        // ---------------------------------------------------------------------
        // Upserting
        // ---------------------------------------------------------------------
        debug!(kind = %kind, external_id = %external_id, state = ?ImportState::Upserting, "Import step");
        let mut tx = self.db.begin().await?;
        let (binding, internal_id, action) = self
            .upsert(&mut tx, &registry, kind, external_id, mapped)
            .await?;
        tx.commit().await?;

        // ---------------------------------------------------------------------
        // Done
        // ---------------------------------------------------------------------
        let hook_error = self.run_hooks(kind, &adapter, external_id, &internal_id).await;

        Ok(ImportOutcome {
            kind,
            external_id: external_id.clone(),
            binding_id: binding.id,
            internal_id,
            action,
            dependencies_imported,
            hook_error,
        })
    }

    /// Writes the record and its binding inside `tx`.
    ///
    /// When a concurrent import commits first, the write here fails with a
    /// retryable busy error and the caller's transaction must be dropped.
    async fn upsert(
        &self,
        tx: &mut SyncTx,
        registry: &BindingRegistry,
        kind: EntityKind,
        external_id: &ExternalId,
        mapped: MappedRecord,
    ) -> SyncResult<(BindingRecord, InternalId, ImportAction)> {
        // Re-read inside the transaction: a concurrent import may have won.
        let current = tx
            .find_binding_by_external(&self.backend.id, kind, external_id)
            .await?;
        let (internal_id, action) = match current {
            Some(binding) => {
                tx.update_record(&binding.internal_id, mapped.fields).await?;
                (binding.internal_id, ImportAction::Updated)
            }
            None => {
                let created = tx.insert_record(kind.internal_model(), mapped.fields).await?;
                (created.id, ImportAction::Created)
            }
        };
        let binding = registry
            .bind(tx, &internal_id, external_id, mapped.binding_data)
            .await?;
        Ok((binding, internal_id, action))
    }

    async fn run_hooks(
        &self,
        kind: EntityKind,
        adapter: &MagentoAdapter,
        external_id: &ExternalId,
        internal_id: &InternalId,
    ) -> Option<String> {
        let ctx = HookContext {
            backend: &self.backend,
            db: &self.db,
            adapter,
            external_id,
            internal_id,
        };

        let mut errors = Vec::new();
        for hook in self.hooks.iter().filter(|h| h.kind() == kind) {
            if let Err(e) = hook.after_import(&ctx).await {
                warn!(kind = %kind, external_id = %external_id, error = %e, "Post-import hook failed");
                errors.push(e.to_string());
            }
        }
        if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        }
    }
}
