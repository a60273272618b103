//! Bidirectional link synchronizer.
//!
//! One logical edge is stored twice: as the forward reference on the source
//! document and as the mirror reference on the target document. The
//! synchronizer applies both halves as two independent read-modify-write
//! patches, issued concurrently. There is no transaction: each half is
//! idempotent and the outcome reports exactly which halves landed, so a
//! retry (or the auditor) converges the pair.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::schema::{
    CachePolicy, CachedField, Cardinality, RelationDescriptor, RelationRegistry, SchemaError,
};
use crate::store::DocumentStore;
use crate::types::{Document, DocumentId, Edge, EdgeSide, FieldPatch, NodeKey};

/// Edge operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Create the edge on both sides.
    Connect,
    /// Remove the edge from both sides.
    Disconnect,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// A half of an edge that could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideFailure {
    /// Which half failed.
    pub side: EdgeSide,
    /// Document that was being patched.
    pub key: NodeKey,
    /// Failure detail.
    pub message: String,
}

impl std::fmt::Display for SideFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} side {}: {}", self.side, self.key, self.message)
    }
}

/// Result of a connect or disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// The edge operated on.
    pub edge: Edge,
    /// Both halves landed.
    pub ok: bool,
    /// The source document reflects the requested state.
    pub source_updated: bool,
    /// The target document reflects the requested state.
    pub target_updated: bool,
    /// Previous scalar peers displaced by a connect.
    pub detached: Vec<NodeKey>,
    /// Failed halves.
    pub errors: Vec<SideFailure>,
}

/// Error type for synchronizer operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Relation or type not declared.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    /// Empty document id.
    #[error("Empty {0} id")]
    EmptyId(EdgeSide),
    /// A single-side repair failed.
    #[error("Repair failed: {0}")]
    Side(SideFailure),
}

/// Everything needed to patch one document of the edge.
#[derive(Debug)]
struct SidePlan<'a> {
    side: EdgeSide,
    collection: &'a str,
    key: NodeKey,
    peer: NodeKey,
    peer_collection: &'a str,
    /// Embedded field and cardinality on this document.
    field: Option<(&'a str, Cardinality)>,
    caches: &'a [CachedField],
    cache_policy: CachePolicy,
    /// Field on a displaced peer that mirrors this document.
    peer_mirror: Option<(&'a str, Cardinality)>,
}

#[derive(Debug, Default)]
struct SideReport {
    updated: bool,
    detached: Vec<NodeKey>,
    failure: Option<SideFailure>,
}

impl SideReport {
    fn done() -> Self {
        Self {
            updated: true,
            ..Self::default()
        }
    }

    fn failed(plan: &SidePlan<'_>, message: impl Into<String>) -> Self {
        Self {
            updated: false,
            detached: Vec::new(),
            failure: Some(SideFailure {
                side: plan.side,
                key: plan.key.clone(),
                message: message.into(),
            }),
        }
    }
}

/// Stored items of an array relation field, untouched.
///
/// A missing or null field has no items; a lone scalar counts as one item.
fn stored_items(document: &Document, field: &str) -> Vec<Value> {
    match document.field(field) {
        Some(Value::Array(items)) => items.clone(),
        None | Some(Value::Null) => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}

fn refers_to(item: &Value, peer: &DocumentId) -> bool {
    DocumentId::from_value(item).as_ref() == Some(peer)
}

/// Compute the patch removing `peer` from `field`, if it is present.
fn removal_patch(document: &Document, field: &str, cardinality: Cardinality, peer: &DocumentId) -> Option<FieldPatch> {
    match cardinality {
        Cardinality::Array => {
            let mut items = stored_items(document, field);
            let before = items.len();
            items.retain(|item| !refers_to(item, peer));
            if items.len() == before {
                return None;
            }
            Some(FieldPatch::new().set(field, Value::Array(items)))
        }
        Cardinality::Scalar => {
            if document.scalar_ref(field).as_ref() != Some(peer) {
                return None;
            }
            Some(FieldPatch::new().clear(field))
        }
    }
}

/// Link synchronizer over a document store.
pub struct LinkSynchronizer<S: DocumentStore> {
    store: Arc<S>,
    registry: Arc<RelationRegistry>,
}

impl<S: DocumentStore + 'static> LinkSynchronizer<S> {
    /// Create a synchronizer.
    pub fn new(store: Arc<S>, registry: Arc<RelationRegistry>) -> Self {
        Self { store, registry }
    }

    /// Create the edge `source -[relation]-> target` on both sides.
    pub async fn connect(
        &self,
        source_type: &str,
        source_id: &DocumentId,
        relation: &str,
        target_id: &DocumentId,
    ) -> Result<SyncOutcome, SyncError> {
        self.apply(source_type, source_id, relation, target_id, SyncAction::Connect)
            .await
    }

    /// Remove the edge `source -[relation]-> target` from both sides.
    pub async fn disconnect(
        &self,
        source_type: &str,
        source_id: &DocumentId,
        relation: &str,
        target_id: &DocumentId,
    ) -> Result<SyncOutcome, SyncError> {
        self.apply(source_type, source_id, relation, target_id, SyncAction::Disconnect)
            .await
    }

    /// Apply an edge operation to both sides concurrently.
    pub async fn apply(
        &self,
        source_type: &str,
        source_id: &DocumentId,
        relation: &str,
        target_id: &DocumentId,
        action: SyncAction,
    ) -> Result<SyncOutcome, SyncError> {
        let desc = self.registry.relation(source_type, relation)?;
        if source_id.as_str().is_empty() {
            return Err(SyncError::EmptyId(EdgeSide::Source));
        }
        if target_id.as_str().is_empty() {
            return Err(SyncError::EmptyId(EdgeSide::Target));
        }

        let (source, target) = self.plan_sides(desc, source_id, target_id)?;
        let (source_report, target_report) =
            futures::join!(self.apply_side(&source, action), self.apply_side(&target, action));

        let edge = Edge::new(
            desc.source_type.as_str(),
            source_id.clone(),
            desc.name.as_str(),
            desc.target_type.as_str(),
            target_id.clone(),
        );
        let mut detached = source_report.detached;
        detached.extend(target_report.detached);
        let errors: Vec<SideFailure> = source_report
            .failure
            .into_iter()
            .chain(target_report.failure)
            .collect();

        let outcome = SyncOutcome {
            ok: source_report.updated && target_report.updated,
            source_updated: source_report.updated,
            target_updated: target_report.updated,
            detached,
            errors,
            edge,
        };

        if outcome.ok {
            info!(
                edge = %outcome.edge,
                action = %action,
                detached = outcome.detached.len(),
                "Relation synchronized"
            );
        } else {
            warn!(
                edge = %outcome.edge,
                action = %action,
                source_updated = outcome.source_updated,
                target_updated = outcome.target_updated,
                "Relation partially synchronized"
            );
        }
        Ok(outcome)
    }

    /// Write only the target half of a connect.
    ///
    /// Used to heal an edge whose forward reference exists but whose mirror
    /// is missing. The source document is never touched.
    pub async fn repair_reverse(
        &self,
        desc: &RelationDescriptor,
        source_id: &DocumentId,
        target_id: &DocumentId,
    ) -> Result<(), SyncError> {
        let (_, target) = self.plan_sides(desc, source_id, target_id)?;
        let report = self.apply_side(&target, SyncAction::Connect).await;
        match report.failure {
            Some(failure) => Err(SyncError::Side(failure)),
            None => Ok(()),
        }
    }

    fn plan_sides<'a>(
        &'a self,
        desc: &'a RelationDescriptor,
        source_id: &DocumentId,
        target_id: &DocumentId,
    ) -> Result<(SidePlan<'a>, SidePlan<'a>), SchemaError> {
        let source_collection = self.registry.collection_of(&desc.source_type)?;
        let target_collection = self.registry.collection_of(&desc.target_type)?;
        let source_key = NodeKey::new(desc.source_type.as_str(), source_id.clone());
        let target_key = NodeKey::new(desc.target_type.as_str(), target_id.clone());

        let forward = desc.forward_field().map(|f| (f, desc.kind.cardinality()));
        let reverse = desc
            .reverse
            .as_ref()
            .map(|r| (r.field.as_str(), r.cardinality));
        let inverse = self.registry.inverse_of(desc);

        let source = SidePlan {
            side: EdgeSide::Source,
            collection: source_collection,
            key: source_key.clone(),
            peer: target_key.clone(),
            peer_collection: target_collection,
            field: forward,
            caches: &desc.cached_fields,
            cache_policy: desc.cache_policy,
            peer_mirror: reverse,
        };
        let target = SidePlan {
            side: EdgeSide::Target,
            collection: target_collection,
            key: target_key,
            peer: source_key,
            peer_collection: source_collection,
            field: reverse,
            caches: inverse.map_or(&[][..], |inv| inv.cached_fields.as_slice()),
            cache_policy: inverse.map_or(CachePolicy::default(), |inv| inv.cache_policy),
            peer_mirror: forward,
        };
        Ok((source, target))
    }

    async fn apply_side(&self, plan: &SidePlan<'_>, action: SyncAction) -> SideReport {
        let Some((field, cardinality)) = plan.field else {
            return SideReport::done();
        };

        let document = match self.store.get_document(plan.collection, &plan.key.id).await {
            Ok(Some(document)) => document,
            Ok(None) => return SideReport::failed(plan, format!("{} does not exist", plan.key)),
            Err(e) => return SideReport::failed(plan, e.to_string()),
        };

        let (patch, displaced) = match action {
            SyncAction::Connect => {
                let (mut patch, displaced) = connect_patch(&document, field, cardinality, &plan.peer.id);
                if !plan.caches.is_empty() {
                    self.refresh_caches(plan, &document, &mut patch).await;
                }
                (patch, displaced)
            }
            SyncAction::Disconnect => {
                let mut patch = removal_patch(&document, field, cardinality, &plan.peer.id)
                    .unwrap_or_default();
                if !patch.is_empty() && plan.cache_policy == CachePolicy::ClearOnDisconnect {
                    for cache in plan.caches {
                        patch.insert(cache.field.as_str(), Value::Null);
                    }
                }
                (patch, None)
            }
        };

        if patch.is_empty() {
            debug!(side = %plan.side, key = %plan.key, field, "Side already reflects edge");
            return SideReport::done();
        }

        if let Err(e) = self.store.patch_document(plan.collection, &plan.key.id, &patch).await {
            warn!(side = %plan.side, key = %plan.key, error = %e, "Side patch failed");
            return SideReport::failed(plan, e.to_string());
        }
        debug!(side = %plan.side, key = %plan.key, fields = patch.len(), "Side patched");

        let mut report = SideReport::done();
        if let Some(previous) = displaced {
            report.detached.push(self.detach_displaced(plan, previous).await);
        }
        report
    }

    /// Add changed denormalized cache values to a connect patch.
    ///
    /// The peer is read for the source values; if it cannot be read the
    /// caches are left as they are.
    async fn refresh_caches(&self, plan: &SidePlan<'_>, document: &Document, patch: &mut FieldPatch) {
        let peer = match self.store.get_document(plan.peer_collection, &plan.peer.id).await {
            Ok(Some(peer)) => peer,
            Ok(None) => {
                debug!(peer = %plan.peer, "Cache source missing");
                return;
            }
            Err(e) => {
                warn!(peer = %plan.peer, error = %e, "Cache source unreadable");
                return;
            }
        };

        for cache in plan.caches {
            let value = peer.field(&cache.from).cloned().unwrap_or(Value::Null);
            if document.field(&cache.field) != Some(&value) {
                patch.insert(cache.field.as_str(), value);
            }
        }
    }

    /// Remove this document from the mirror of a peer it no longer points
    /// at. Best effort: failures are logged, not reported.
    async fn detach_displaced(&self, plan: &SidePlan<'_>, previous: DocumentId) -> NodeKey {
        let previous_key = NodeKey::new(plan.peer.entity_type.as_str(), previous);
        let Some((mirror, cardinality)) = plan.peer_mirror else {
            return previous_key;
        };

        let result = match self.store.get_document(plan.peer_collection, &previous_key.id).await {
            Ok(Some(peer)) => match removal_patch(&peer, mirror, cardinality, &plan.key.id) {
                Some(patch) => self
                    .store
                    .patch_document(plan.peer_collection, &previous_key.id, &patch)
                    .await
                    .map_err(|e| e.to_string()),
                None => Ok(()),
            },
            Ok(None) => Ok(()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => debug!(key = %plan.key, previous = %previous_key, "Detached displaced peer"),
            Err(error) => warn!(key = %plan.key, previous = %previous_key, error = %error, "Failed to detach displaced peer"),
        }
        previous_key
    }
}

/// Compute the patch adding `peer` to `field`, plus the scalar peer it
/// displaces.
fn connect_patch(
    document: &Document,
    field: &str,
    cardinality: Cardinality,
    peer: &DocumentId,
) -> (FieldPatch, Option<DocumentId>) {
    match cardinality {
        Cardinality::Array => {
            let mut items = stored_items(document, field);
            if items.iter().any(|item| refers_to(item, peer)) {
                return (FieldPatch::new(), None);
            }
            items.push(peer.to_value());
            (FieldPatch::new().set(field, Value::Array(items)), None)
        }
        Cardinality::Scalar => match document.scalar_ref(field) {
            Some(current) if &current == peer => (FieldPatch::new(), None),
            previous => (FieldPatch::new().set(field, peer.to_value()), previous),
        },
    }
}
