//! Kernel facade.
//!
//! Bundles the registry, loader, synchronizer and auditor over one shared
//! store. This is the surface the service layer and embedding
//! applications call.

use std::sync::Arc;

use crate::audit::{AuditError, AuditOptions, AuditReport, AuditState, ConsistencyAuditor, ScopeFilter};
use crate::config::KernelConfig;
use crate::loader::{GraphLoader, LoadOptions, LoaderError};
use crate::schema::RelationRegistry;
use crate::store::DocumentStore;
use crate::sync::{LinkSynchronizer, SyncAction, SyncError, SyncOutcome};
use crate::types::{DocumentId, GraphLoad};

/// Relation kernel over a document store.
pub struct RelationKernel<S: DocumentStore> {
    store: Arc<S>,
    registry: Arc<RelationRegistry>,
    loader: GraphLoader<S>,
    synchronizer: LinkSynchronizer<S>,
    auditor: ConsistencyAuditor<S>,
    default_options: LoadOptions,
}

impl<S: DocumentStore + 'static> RelationKernel<S> {
    /// Create a kernel with default load options.
    pub fn new(store: Arc<S>, registry: Arc<RelationRegistry>) -> Self {
        Self::with_options(store, registry, LoadOptions::default())
    }

    /// Create a kernel from configuration.
    pub fn from_config(store: Arc<S>, registry: Arc<RelationRegistry>, config: &KernelConfig) -> Self {
        Self::with_options(store, registry, config.load_options())
    }

    fn with_options(store: Arc<S>, registry: Arc<RelationRegistry>, default_options: LoadOptions) -> Self {
        Self {
            loader: GraphLoader::new(store.clone(), registry.clone()),
            synchronizer: LinkSynchronizer::new(store.clone(), registry.clone()),
            auditor: ConsistencyAuditor::new(store.clone(), registry.clone()),
            store,
            registry,
            default_options,
        }
    }

    /// The relation registry.
    pub fn registry(&self) -> &RelationRegistry {
        &self.registry
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Load options used when a caller supplies none.
    pub fn default_options(&self) -> &LoadOptions {
        &self.default_options
    }

    /// Load an entity with its relations.
    pub async fn load_entity_graph(
        &self,
        entity_type: &str,
        id: &DocumentId,
        options: &LoadOptions,
    ) -> Result<Option<GraphLoad>, LoaderError> {
        self.loader.load(entity_type, id, options).await
    }

    /// Connect or disconnect an edge on both sides.
    pub async fn synchronize_relation(
        &self,
        source_type: &str,
        source_id: &DocumentId,
        relation: &str,
        target_id: &DocumentId,
        action: SyncAction,
    ) -> Result<SyncOutcome, SyncError> {
        self.synchronizer
            .apply(source_type, source_id, relation, target_id, action)
            .await
    }

    /// Run a repairing audit over the scope.
    pub async fn run_consistency_audit(&self, scope: &ScopeFilter) -> Result<AuditReport, AuditError> {
        self.auditor.run(scope, &AuditOptions::default()).await
    }

    /// Run an audit with explicit options.
    pub async fn run_consistency_audit_with(
        &self,
        scope: &ScopeFilter,
        options: &AuditOptions,
    ) -> Result<AuditReport, AuditError> {
        self.auditor.run(scope, options).await
    }

    /// State of the auditor.
    pub fn audit_state(&self) -> AuditState {
        self.auditor.state()
    }
}
