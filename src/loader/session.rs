//! Per-call load session: visited set, in-flight map and node arena.
//!
//! A session is created for one top-level load and dropped when the load
//! returns. Nothing in it is shared between calls.

use std::collections::{BTreeMap, HashSet};

use crate::types::{
    Document, EntityNode, EntityStub, LinkedEntity, LoadIssue, NodeKey, RelationList, RelationValue,
};

/// Position of a link inside the arena: node, relation, and list index
/// (`None` for scalar relations).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub node: usize,
    pub relation: usize,
    pub position: Option<usize>,
}

/// One relation expansion waiting on a fetch.
#[derive(Debug, Clone)]
pub(crate) struct Claim {
    pub slot: Slot,
    pub origin: NodeKey,
    pub relation: String,
}

/// A reverse-query relation waiting on its query.
#[derive(Debug, Clone)]
pub(crate) struct QueryJob {
    pub node: usize,
    pub relation_index: usize,
    pub origin: NodeKey,
    pub relation: String,
    pub target_type: String,
    pub collection: String,
    pub field: String,
}

/// Fetches and queries planned for one level of the traversal.
///
/// `in_flight` coalesces every claim on the same `type:id` into one fetch;
/// the first claim in insertion order receives the node.
#[derive(Debug, Default)]
pub(crate) struct LevelPlan {
    pub in_flight: BTreeMap<NodeKey, Vec<Claim>>,
    pub queries: Vec<QueryJob>,
}

impl LevelPlan {
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty() && self.queries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ArenaLink {
    Node(usize),
    Stub(NodeKey),
    Missing,
}

#[derive(Debug, Clone)]
pub(crate) enum ArenaRelation {
    One(ArenaLink),
    Many {
        links: Vec<ArenaLink>,
        count: usize,
        has_more: bool,
    },
}

#[derive(Debug)]
pub(crate) struct ArenaNode {
    pub key: NodeKey,
    pub depth: u32,
    pub document: Document,
    pub relations: Vec<(String, ArenaRelation)>,
}

/// Mutable state of one graph load.
#[derive(Debug, Default)]
pub(crate) struct LoadSession {
    visited: HashSet<NodeKey>,
    arena: Vec<ArenaNode>,
    errors: Vec<LoadIssue>,
    truncated: bool,
}

impl LoadSession {
    /// Start a session rooted at an already fetched document.
    pub fn new(root: NodeKey, document: Document) -> Self {
        let mut session = Self::default();
        session.visited.insert(root.clone());
        session.push_node(root, 0, document);
        session
    }

    pub fn node(&self, idx: usize) -> &ArenaNode {
        &self.arena[idx]
    }

    pub fn push_node(&mut self, key: NodeKey, depth: u32, document: Document) -> usize {
        self.arena.push(ArenaNode {
            key,
            depth,
            document,
            relations: Vec::new(),
        });
        self.arena.len() - 1
    }

    /// Attach a relation to a node and return its index.
    pub fn push_relation(&mut self, node: usize, name: &str, relation: ArenaRelation) -> usize {
        let relations = &mut self.arena[node].relations;
        relations.push((name.to_string(), relation));
        relations.len() - 1
    }

    pub fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    pub fn record(&mut self, issue: LoadIssue) {
        self.errors.push(issue);
    }

    /// Mark a key visited. Returns false if it already was.
    pub fn visit(&mut self, key: &NodeKey) -> bool {
        if self.visited.contains(key) {
            false
        } else {
            self.visited.insert(key.clone());
            true
        }
    }

    /// Register a claim on `key` for the current level.
    ///
    /// Keys visited in an earlier level resolve to a stub immediately;
    /// keys already in flight are coalesced into the pending fetch.
    pub fn claim(&mut self, plan: &mut LevelPlan, key: NodeKey, claim: Claim) {
        if let Some(claims) = plan.in_flight.get_mut(&key) {
            claims.push(claim);
        } else if self.visit(&key) {
            plan.in_flight.insert(key, vec![claim]);
        } else {
            self.set_link(claim.slot, ArenaLink::Stub(key));
        }
    }

    pub fn set_link(&mut self, slot: Slot, link: ArenaLink) {
        let (_, relation) = &mut self.arena[slot.node].relations[slot.relation];
        match (relation, slot.position) {
            (ArenaRelation::One(current), None) => *current = link,
            (ArenaRelation::Many { links, .. }, Some(position)) => links[position] = link,
            _ => debug_assert!(false, "slot does not match relation cardinality"),
        }
    }

    pub fn set_relation(&mut self, node: usize, relation: usize, value: ArenaRelation) {
        self.arena[node].relations[relation].1 = value;
    }

    /// Consume the session into the result tree.
    ///
    /// Returns `(root, errors, partial, loaded_entities)`.
    pub fn finish(self) -> (EntityNode, Vec<LoadIssue>, bool, usize) {
        let loaded = self.arena.len();
        let partial = self.truncated || !self.errors.is_empty();
        let mut slots: Vec<Option<ArenaNode>> = self.arena.into_iter().map(Some).collect();
        let root = assemble(&mut slots, 0);
        (root, self.errors, partial, loaded)
    }
}

fn assemble(slots: &mut [Option<ArenaNode>], idx: usize) -> EntityNode {
    let node = match slots[idx].take() {
        Some(node) => node,
        None => unreachable!("arena node {idx} linked twice"),
    };

    let mut relations = BTreeMap::new();
    for (name, relation) in node.relations {
        let value = match relation {
            ArenaRelation::One(link) => RelationValue::One(resolve_link(slots, link)),
            ArenaRelation::Many {
                links,
                count,
                has_more,
            } => RelationValue::Many(RelationList {
                items: links
                    .into_iter()
                    .filter_map(|link| resolve_link(slots, link))
                    .collect(),
                count,
                has_more,
            }),
        };
        relations.insert(name, value);
    }

    EntityNode {
        id: node.key.id,
        entity_type: node.key.entity_type,
        fields: node.document.fields,
        relations,
    }
}

fn resolve_link(slots: &mut [Option<ArenaNode>], link: ArenaLink) -> Option<LinkedEntity> {
    match link {
        ArenaLink::Node(child) => Some(LinkedEntity::Expanded(Box::new(assemble(slots, child)))),
        ArenaLink::Stub(key) => Some(LinkedEntity::Stub(EntityStub::from_key(key))),
        ArenaLink::Missing => None,
    }
}
