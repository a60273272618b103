//! Cycle-safe, depth-bounded graph loader.
//!
//! The loader materializes an entity and its declared relations as a tree.
//! Traversal is breadth-first: every fetch and reverse query of one level is
//! issued concurrently, and the next level is planned once all of them have
//! settled.
//!
//! ## Guarantees
//!
//! - Each `type:id` is fetched at most once per load. Later references to a
//!   key that is visited or already in flight resolve to an id stub.
//! - Entities at `max_depth` keep their embedded references as id stubs and
//!   are never expanded further.
//! - An array relation (or reverse query) keeps at most
//!   `max_relations_per_type` entries; `count` reports the full length.
//! - A failed branch resolves to null and is recorded in `errors`; sibling
//!   branches are unaffected.

mod session;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::schema::{RelationKind, RelationRegistry, SchemaError};
use crate::store::DocumentStore;
use crate::types::{DocumentId, GraphLoad, IssueKind, LoadIssue, NodeKey};
use crate::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_RELATIONS_PER_TYPE};
use session::{ArenaLink, ArenaRelation, Claim, LevelPlan, LoadSession, QueryJob, Slot};

/// Error type for loader operations.
///
/// Only schema errors and a failure to read the root abort a load. Every
/// other failure is recorded on the result.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// Unknown entity type.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    /// The root document could not be read.
    #[error("Store error loading {key}: {message}")]
    Store {
        /// Root key.
        key: NodeKey,
        /// Store error text.
        message: String,
    },
}

impl LoaderError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(key: NodeKey, e: E) -> Self {
        Self::Store {
            key,
            message: e.to_string(),
        }
    }
}

/// Options for one graph load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Levels of relations to expand below the root.
    pub max_depth: u32,
    /// Maximum entries kept per array relation.
    pub max_relations_per_type: usize,
    /// Only expand relations with these names (all when `None`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relations: Option<BTreeSet<String>>,
}

impl LoadOptions {
    /// Options with the given depth and default fan-out.
    pub fn new(max_depth: u32) -> Self {
        Self {
            max_depth,
            ..Self::default()
        }
    }

    /// Set the fan-out limit.
    pub fn with_max_relations_per_type(mut self, limit: usize) -> Self {
        self.max_relations_per_type = limit;
        self
    }

    /// Restrict expansion to the named relations.
    pub fn with_relations<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.relations = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Check if a relation passes the filter.
    pub fn includes(&self, relation: &str) -> bool {
        self.relations
            .as_ref()
            .map_or(true, |names| names.contains(relation))
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_relations_per_type: DEFAULT_MAX_RELATIONS_PER_TYPE,
            relations: None,
        }
    }
}

/// Graph loader over a document store.
pub struct GraphLoader<S: DocumentStore> {
    store: Arc<S>,
    registry: Arc<RelationRegistry>,
}

impl<S: DocumentStore + 'static> GraphLoader<S> {
    /// Create a loader.
    pub fn new(store: Arc<S>, registry: Arc<RelationRegistry>) -> Self {
        Self { store, registry }
    }

    /// The registry driving traversal.
    pub fn registry(&self) -> &RelationRegistry {
        &self.registry
    }

    /// Load an entity and its relations.
    ///
    /// Returns `Ok(None)` when the root does not exist.
    pub async fn load(
        &self,
        entity_type: &str,
        id: &DocumentId,
        options: &LoadOptions,
    ) -> Result<Option<GraphLoad>, LoaderError> {
        let collection = self.registry.collection_of(entity_type)?;
        let root_key = NodeKey::new(entity_type, id.clone());

        let root = match self.store.get_document(collection, id).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                debug!(root = %root_key, "Root entity not found");
                return Ok(None);
            }
            Err(e) => return Err(LoaderError::from_store(root_key, e)),
        };

        let mut session = LoadSession::new(root_key.clone(), root);
        let mut frontier = vec![0usize];
        let mut depth = 0u32;

        while !frontier.is_empty() {
            let mut plan = LevelPlan::default();
            for &idx in &frontier {
                self.plan_node(&mut session, &mut plan, idx, options)?;
            }
            if plan.is_empty() {
                break;
            }

            debug!(
                root = %root_key,
                depth,
                nodes = frontier.len(),
                fetches = plan.in_flight.len(),
                queries = plan.queries.len(),
                "Expanding graph level"
            );

            depth += 1;
            frontier = self.resolve_level(&mut session, plan, depth, options).await?;
        }

        let (entity, errors, partial, loaded_entities) = session.finish();
        debug!(
            root = %root_key,
            loaded_entities,
            partial,
            errors = errors.len(),
            "Graph load complete"
        );

        Ok(Some(GraphLoad {
            entity,
            partial,
            errors,
            loaded_entities,
        }))
    }

    /// Attach the relations of one node, claiming fetches and queries for
    /// the next level.
    fn plan_node(
        &self,
        session: &mut LoadSession,
        plan: &mut LevelPlan,
        idx: usize,
        options: &LoadOptions,
    ) -> Result<(), SchemaError> {
        let (origin, depth) = {
            let node = session.node(idx);
            (node.key.clone(), node.depth)
        };
        let at_boundary = depth >= options.max_depth;
        let limit = options.max_relations_per_type;

        for desc in self.registry.relations_of(&origin.entity_type)? {
            if !options.includes(&desc.name) {
                continue;
            }

            let claim = |slot: Slot| Claim {
                slot,
                origin: origin.clone(),
                relation: desc.name.clone(),
            };

            match &desc.kind {
                RelationKind::ScalarForward { field } => {
                    let Some(target_id) = session.node(idx).document.scalar_ref(field) else {
                        continue;
                    };
                    let target = NodeKey::new(desc.target_type.as_str(), target_id);

                    if at_boundary {
                        session.push_relation(idx, &desc.name, ArenaRelation::One(ArenaLink::Stub(target)));
                        continue;
                    }
                    let relation =
                        session.push_relation(idx, &desc.name, ArenaRelation::One(ArenaLink::Missing));
                    session.claim(
                        plan,
                        target,
                        claim(Slot {
                            node: idx,
                            relation,
                            position: None,
                        }),
                    );
                }
                RelationKind::ArrayForward { field } => {
                    let document = &session.node(idx).document;
                    if document.field(field).map_or(true, Value::is_null) {
                        continue;
                    }
                    let ids = document.array_refs(field);
                    let count = ids.len();
                    let has_more = count > limit;
                    if has_more {
                        session.mark_truncated();
                    }
                    let kept: Vec<NodeKey> = ids
                        .into_iter()
                        .take(limit)
                        .map(|id| NodeKey::new(desc.target_type.as_str(), id))
                        .collect();

                    if at_boundary {
                        let links = kept.into_iter().map(ArenaLink::Stub).collect();
                        session.push_relation(
                            idx,
                            &desc.name,
                            ArenaRelation::Many { links, count, has_more },
                        );
                        continue;
                    }
                    let relation = session.push_relation(
                        idx,
                        &desc.name,
                        ArenaRelation::Many {
                            links: vec![ArenaLink::Missing; kept.len()],
                            count,
                            has_more,
                        },
                    );
                    for (position, target) in kept.into_iter().enumerate() {
                        session.claim(
                            plan,
                            target,
                            claim(Slot {
                                node: idx,
                                relation,
                                position: Some(position),
                            }),
                        );
                    }
                }
                RelationKind::ReverseQuery => {
                    // Nothing is embedded to stub at the boundary.
                    if at_boundary {
                        continue;
                    }
                    let Some(field) = desc.reverse_field() else {
                        continue;
                    };
                    let relation_index = session.push_relation(
                        idx,
                        &desc.name,
                        ArenaRelation::Many {
                            links: Vec::new(),
                            count: 0,
                            has_more: false,
                        },
                    );
                    plan.queries.push(QueryJob {
                        node: idx,
                        relation_index,
                        origin: origin.clone(),
                        relation: desc.name.clone(),
                        target_type: desc.target_type.clone(),
                        collection: self.registry.collection_of(&desc.target_type)?.to_string(),
                        field: field.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Issue every fetch and query of a level concurrently and attach the
    /// results. Returns the arena indices of the next frontier.
    async fn resolve_level(
        &self,
        session: &mut LoadSession,
        plan: LevelPlan,
        depth: u32,
        options: &LoadOptions,
    ) -> Result<Vec<usize>, SchemaError> {
        let store = self.store.as_ref();

        let mut fetches = Vec::with_capacity(plan.in_flight.len());
        for key in plan.in_flight.keys() {
            let collection = self.registry.collection_of(&key.entity_type)?;
            fetches.push(async move { store.get_document(collection, &key.id).await });
        }
        let queries = plan.queries.iter().map(|job| {
            let value = job.origin.id.to_value();
            async move { store.query_documents(&job.collection, &job.field, &value).await }
        });

        let (fetched, queried) = futures::join!(join_all(fetches), join_all(queries));

        let mut frontier = Vec::new();

        for ((key, claims), result) in plan.in_flight.into_iter().zip(fetched) {
            match result {
                Ok(Some(document)) => {
                    let child = session.push_node(key.clone(), depth, document);
                    frontier.push(child);

                    let mut claims = claims.into_iter();
                    if let Some(first) = claims.next() {
                        session.set_link(first.slot, ArenaLink::Node(child));
                    }
                    for claim in claims {
                        session.set_link(claim.slot, ArenaLink::Stub(key.clone()));
                    }
                }
                Ok(None) => {
                    for claim in claims {
                        debug!(origin = %claim.origin, relation = %claim.relation, target = %key, "Dangling reference");
                        session.record(LoadIssue {
                            origin: claim.origin,
                            relation: claim.relation,
                            target: Some(key.clone()),
                            kind: IssueKind::NotFound,
                            message: format!("{} does not exist", key),
                        });
                    }
                }
                Err(e) => {
                    for claim in claims {
                        warn!(origin = %claim.origin, relation = %claim.relation, target = %key, error = %e, "Relation fetch failed");
                        session.record(LoadIssue {
                            origin: claim.origin,
                            relation: claim.relation,
                            target: Some(key.clone()),
                            kind: IssueKind::Store,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        for (job, result) in plan.queries.into_iter().zip(queried) {
            match result {
                Ok(documents) => {
                    let count = documents.len();
                    let has_more = count > options.max_relations_per_type;
                    if has_more {
                        session.mark_truncated();
                    }

                    let mut links = Vec::with_capacity(count.min(options.max_relations_per_type));
                    for document in documents.into_iter().take(options.max_relations_per_type) {
                        let key = NodeKey::new(job.target_type.as_str(), document.id.clone());
                        if session.visit(&key) {
                            let child = session.push_node(key, depth, document);
                            frontier.push(child);
                            links.push(ArenaLink::Node(child));
                        } else {
                            links.push(ArenaLink::Stub(key));
                        }
                    }
                    session.set_relation(
                        job.node,
                        job.relation_index,
                        ArenaRelation::Many { links, count, has_more },
                    );
                }
                Err(e) => {
                    warn!(origin = %job.origin, relation = %job.relation, error = %e, "Reverse query failed");
                    session.record(LoadIssue {
                        origin: job.origin,
                        relation: job.relation,
                        target: None,
                        kind: IssueKind::Store,
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(frontier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;
    use crate::types::{IssueKind, RelationValue};
    use serde_json::json;

    fn loader(store: &Arc<InMemoryDocumentStore>) -> GraphLoader<InMemoryDocumentStore> {
        GraphLoader::new(store.clone(), Arc::new(RelationRegistry::booking_defaults()))
    }

    fn many(value: Option<&RelationValue>) -> &crate::types::RelationList {
        value.and_then(RelationValue::as_many).expect("array relation")
    }

    #[tokio::test]
    async fn test_missing_root_is_none() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let result = loader(&store)
            .load("concert", &"E404".into(), &LoadOptions::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_unknown_type_is_schema_error() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let err = loader(&store)
            .load("invoice", &"I1".into(), &LoadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Schema(SchemaError::UnknownEntityType(_))));
    }

    #[tokio::test]
    async fn test_root_read_failure_is_store_error() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.add_json("concerts", "E1", json!({}));
        store.fail_reads_of("concerts", "E1");

        let err = loader(&store)
            .load("concert", &"E1".into(), &LoadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Store { .. }));
    }

    #[tokio::test]
    async fn test_cycle_terminates_with_stub() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.add_json("concerts", "E1", json!({ "titre": "Nuit", "artistesIds": ["A1"] }));
        store.add_json("artistes", "A1", json!({ "nom": "Ana", "concertsIds": ["E1"] }));

        let result = loader(&store)
            .load("concert", &"E1".into(), &LoadOptions::new(5))
            .await
            .unwrap()
            .unwrap();

        let artistes = many(result.entity.relation("artistes"));
        let artiste = artistes.items[0].as_expanded().unwrap();
        assert_eq!(artiste.field("nom"), Some(&json!("Ana")));

        let back = many(artiste.relation("concerts"));
        assert!(back.items[0].is_stub());
        assert_eq!(back.items[0].id().as_str(), "E1");

        assert_eq!(result.loaded_entities, 2);
        assert_eq!(store.stats().gets_of("concerts", "E1"), 1);
        assert!(!result.partial);
    }

    #[tokio::test]
    async fn test_depth_bound_stubs_second_degree() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.add_json("lieux", "L1", json!({ "nom": "Salle", "contactIds": ["C1"] }));
        store.add_json("contacts", "C1", json!({ "lieuxIds": ["L1"], "structureId": "S1" }));
        store.add_json("structures", "S1", json!({ "nom": "Asso" }));

        let result = loader(&store)
            .load("lieu", &"L1".into(), &LoadOptions::new(1))
            .await
            .unwrap()
            .unwrap();

        let contacts = many(result.entity.relation("contacts"));
        let contact = contacts.items[0].as_expanded().unwrap();

        let structure = contact.relation("structure").and_then(RelationValue::as_one).unwrap();
        assert!(structure.is_stub());
        assert_eq!(structure.id().as_str(), "S1");
        assert!(contact.relation("concerts").is_none());
        assert_eq!(store.stats().gets_of("structures", "S1"), 0);
    }

    #[tokio::test]
    async fn test_fan_out_truncation() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let ids: Vec<String> = (0..15).map(|i| format!("E{:02}", i)).collect();
        for id in &ids {
            store.add_json("concerts", id, json!({ "artistesIds": ["A1"] }));
        }
        store.add_json("artistes", "A1", json!({ "concertsIds": ids }));

        let result = loader(&store)
            .load("artiste", &"A1".into(), &LoadOptions::new(1))
            .await
            .unwrap()
            .unwrap();

        let concerts = many(result.entity.relation("concerts"));
        assert_eq!(concerts.items.len(), 10);
        assert_eq!(concerts.count, 15);
        assert!(concerts.has_more);
        assert!(result.partial);
        assert_eq!(store.stats().gets_of("concerts", "E10"), 0);
    }

    #[tokio::test]
    async fn test_dangling_reference_is_recorded() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.add_json("concerts", "E1", json!({ "lieuId": "L9", "contactIds": ["C1"] }));
        store.add_json("contacts", "C1", json!({ "nom": "Chloe" }));

        let result = loader(&store)
            .load("concert", &"E1".into(), &LoadOptions::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.entity.relation("lieu"), Some(&RelationValue::One(None)));
        assert_eq!(many(result.entity.relation("contacts")).items.len(), 1);
        assert!(result.partial);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, IssueKind::NotFound);
        assert_eq!(result.errors[0].relation, "lieu");
    }

    #[tokio::test]
    async fn test_store_failure_is_isolated_to_branch() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.add_json("concerts", "E1", json!({ "contactIds": ["C1", "C2"] }));
        store.add_json("contacts", "C1", json!({}));
        store.add_json("contacts", "C2", json!({}));
        store.fail_reads_of("contacts", "C2");

        let result = loader(&store)
            .load("concert", &"E1".into(), &LoadOptions::default())
            .await
            .unwrap()
            .unwrap();

        let contacts = many(result.entity.relation("contacts"));
        assert_eq!(contacts.ids(), vec![&DocumentId::new("C1")]);
        assert_eq!(contacts.count, 2);
        assert_eq!(result.errors[0].kind, IssueKind::Store);
        assert!(result.partial);
    }

    #[tokio::test]
    async fn test_duplicate_reference_fetched_once() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.add_json("concerts", "E1", json!({ "contactIds": ["C1", "C1"] }));
        store.add_json("contacts", "C1", json!({}));

        let result = loader(&store)
            .load("concert", &"E1".into(), &LoadOptions::default())
            .await
            .unwrap()
            .unwrap();

        let contacts = many(result.entity.relation("contacts"));
        assert!(contacts.items[0].as_expanded().is_some());
        assert!(contacts.items[1].is_stub());
        assert_eq!(store.stats().gets_of("contacts", "C1"), 1);
    }

    #[tokio::test]
    async fn test_reverse_query_relation() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.add_json("lieux", "L1", json!({ "nom": "Salle" }));
        store.add_json("concerts", "E1", json!({ "lieuId": "L1" }));
        store.add_json("concerts", "E2", json!({ "lieuId": "L2" }));
        store.add_json("concerts", "E3", json!({ "lieuId": "L1" }));

        let result = loader(&store)
            .load("lieu", &"L1".into(), &LoadOptions::default())
            .await
            .unwrap()
            .unwrap();

        let concerts = many(result.entity.relation("concerts"));
        let ids: Vec<_> = concerts.ids().into_iter().map(DocumentId::as_str).collect();
        assert_eq!(ids, vec!["E1", "E3"]);

        // E1 sits at the boundary; its link back to L1 is a stub.
        let e1 = concerts.items[0].as_expanded().unwrap();
        let lieu = e1.relation("lieu").and_then(RelationValue::as_one).unwrap();
        assert!(lieu.is_stub());
        assert_eq!(store.stats().total_gets(), 1);
    }

    #[tokio::test]
    async fn test_reverse_query_finds_legacy_references() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.add_json("lieux", "L1", json!({ "nom": "Salle" }));
        store.add_json("concerts", "E1", json!({ "lieuId": { "id": "L1", "nom": "Salle" } }));
        store.add_json("concerts", "E2", json!({ "lieuId": "L1" }));
        store.add_json("contacts", "C1", json!({ "nom": "Chloe" }));
        store.add_json("concerts", "E3", json!({ "contactIds": [{ "id": "C1" }] }));

        let lieu = loader(&store)
            .load("lieu", &"L1".into(), &LoadOptions::default())
            .await
            .unwrap()
            .unwrap();
        let concerts = many(lieu.entity.relation("concerts"));
        let ids: Vec<_> = concerts.ids().into_iter().map(DocumentId::as_str).collect();
        assert_eq!(ids, vec!["E1", "E2"]);

        let contact = loader(&store)
            .load("contact", &"C1".into(), &LoadOptions::default())
            .await
            .unwrap()
            .unwrap();
        let concerts = many(contact.entity.relation("concerts"));
        assert_eq!(concerts.ids(), vec![&DocumentId::new("E3")]);
    }

    #[tokio::test]
    async fn test_reverse_query_truncation() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.add_json("lieux", "L1", json!({ "nom": "Salle" }));
        for i in 0..15 {
            store.add_json("concerts", &format!("E{:02}", i), json!({ "lieuId": "L1" }));
        }

        let options = LoadOptions::new(1).with_max_relations_per_type(10);
        let result = loader(&store)
            .load("lieu", &"L1".into(), &options)
            .await
            .unwrap()
            .unwrap();

        let concerts = many(result.entity.relation("concerts"));
        assert_eq!(concerts.items.len(), 10);
        assert_eq!(concerts.count, 15);
        assert!(concerts.has_more);
        assert_eq!(concerts.ids().last().map(|id| id.as_str()), Some("E09"));
        assert!(result.partial);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_reverse_query_failure_is_isolated() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.add_json("lieux", "L1", json!({ "nom": "Salle", "contactIds": ["C1"] }));
        store.add_json("contacts", "C1", json!({ "nom": "Chloe" }));
        store.add_json("concerts", "E1", json!({ "lieuId": "L1" }));
        store.fail_collection("concerts");

        let result = loader(&store)
            .load("lieu", &"L1".into(), &LoadOptions::new(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(many(result.entity.relation("contacts")).items.len(), 1);
        assert!(result.partial);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, IssueKind::Store);
        assert_eq!(result.errors[0].relation, "concerts");
        assert_eq!(result.errors[0].target, None);
    }

    #[tokio::test]
    async fn test_relation_filter() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.add_json("concerts", "E1", json!({ "lieuId": "L1", "contactIds": ["C1"] }));
        store.add_json("lieux", "L1", json!({}));
        store.add_json("contacts", "C1", json!({}));

        let options = LoadOptions::default().with_relations(["contacts"]);
        let result = loader(&store)
            .load("concert", &"E1".into(), &options)
            .await
            .unwrap()
            .unwrap();

        assert!(result.entity.relation("lieu").is_none());
        assert!(result.entity.relation("contacts").is_some());
        assert_eq!(store.stats().gets_of("lieux", "L1"), 0);
    }

    #[tokio::test]
    async fn test_depth_zero_returns_stubs_only() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.add_json("concerts", "E1", json!({ "lieuId": "L1" }));
        store.add_json("lieux", "L1", json!({}));

        let result = loader(&store)
            .load("concert", &"E1".into(), &LoadOptions::new(0))
            .await
            .unwrap()
            .unwrap();

        let lieu = result.entity.relation("lieu").and_then(RelationValue::as_one).unwrap();
        assert!(lieu.is_stub());
        assert_eq!(result.loaded_entities, 1);
        assert_eq!(store.stats().total_gets(), 1);
    }
}
