//! Result types of a graph load.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::document::{DocumentId, NodeKey};

/// Lightweight reference to an entity that was not expanded.
///
/// Produced for nodes already visited in the session and for references
/// sitting on the depth boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStub {
    /// Entity type name.
    pub entity_type: String,
    /// Document id.
    pub id: DocumentId,
}

impl EntityStub {
    /// Create a stub from a node key.
    pub fn from_key(key: NodeKey) -> Self {
        Self {
            entity_type: key.entity_type,
            id: key.id,
        }
    }
}

/// A loaded entity together with its expanded relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    /// Document id.
    pub id: DocumentId,
    /// Entity type name.
    pub entity_type: String,
    /// Raw document fields.
    pub fields: Map<String, Value>,
    /// Relations by name. Only relations present on the document (or
    /// resolved by reverse query) appear.
    pub relations: BTreeMap<String, RelationValue>,
}

impl EntityNode {
    /// Get a relation by name.
    pub fn relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations.get(name)
    }

    /// Get a raw field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Node key of this entity.
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.entity_type.clone(), self.id.clone())
    }
}

/// A related entity: either expanded or a stub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkedEntity {
    /// Fetched and (depth permitting) expanded.
    Expanded(Box<EntityNode>),
    /// Unexpanded id reference.
    Stub(EntityStub),
}

impl LinkedEntity {
    /// Id of the linked entity.
    pub fn id(&self) -> &DocumentId {
        match self {
            Self::Expanded(node) => &node.id,
            Self::Stub(stub) => &stub.id,
        }
    }

    /// Entity type of the linked entity.
    pub fn entity_type(&self) -> &str {
        match self {
            Self::Expanded(node) => &node.entity_type,
            Self::Stub(stub) => &stub.entity_type,
        }
    }

    /// The expanded node, if any.
    pub fn as_expanded(&self) -> Option<&EntityNode> {
        match self {
            Self::Expanded(node) => Some(node),
            Self::Stub(_) => None,
        }
    }

    /// Whether this is an unexpanded reference.
    pub fn is_stub(&self) -> bool {
        matches!(self, Self::Stub(_))
    }
}

/// Truncated list of related entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationList {
    /// Resolved entities, in reference order. Unresolvable branches are dropped.
    pub items: Vec<LinkedEntity>,
    /// Total number of references on the source (before truncation).
    pub count: usize,
    /// True when `count` exceeds the per-relation limit.
    pub has_more: bool,
}

impl RelationList {
    /// Ids of the resolved items.
    pub fn ids(&self) -> Vec<&DocumentId> {
        self.items.iter().map(LinkedEntity::id).collect()
    }
}

/// Value of one relation on a loaded entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cardinality", content = "value", rename_all = "snake_case")]
pub enum RelationValue {
    /// Scalar relation; `None` when the reference could not be resolved.
    One(Option<LinkedEntity>),
    /// Array or reverse-query relation.
    Many(RelationList),
}

impl RelationValue {
    /// The scalar value, if this is a scalar relation.
    pub fn as_one(&self) -> Option<&LinkedEntity> {
        match self {
            Self::One(linked) => linked.as_ref(),
            Self::Many(_) => None,
        }
    }

    /// The list, if this is an array relation.
    pub fn as_many(&self) -> Option<&RelationList> {
        match self {
            Self::Many(list) => Some(list),
            Self::One(_) => None,
        }
    }
}

/// Why a branch of the load failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Referenced document does not exist (dangling id).
    NotFound,
    /// Store error while fetching or querying.
    Store,
}

/// A failed branch, recorded instead of aborting the load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadIssue {
    /// Node whose relation was being expanded.
    pub origin: NodeKey,
    /// Relation being expanded.
    pub relation: String,
    /// Referenced node, when the failure concerns a single id.
    pub target: Option<NodeKey>,
    /// Failure class.
    pub kind: IssueKind,
    /// Human-readable detail.
    pub message: String,
}

/// Result of a top-level graph load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLoad {
    /// The root entity with expanded relations.
    pub entity: EntityNode,
    /// True when any branch failed or any relation was truncated.
    pub partial: bool,
    /// Per-branch failures.
    pub errors: Vec<LoadIssue>,
    /// Distinct entities materialized during the session.
    pub loaded_entities: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linked_entity_accessors() {
        let stub = LinkedEntity::Stub(EntityStub::from_key(NodeKey::new("lieu", "L1".into())));
        assert!(stub.is_stub());
        assert_eq!(stub.id().as_str(), "L1");
        assert_eq!(stub.entity_type(), "lieu");
        assert!(stub.as_expanded().is_none());
    }

    #[test]
    fn test_relation_value_serializes_with_cardinality_tag() {
        let value = RelationValue::Many(RelationList {
            items: vec![],
            count: 15,
            has_more: true,
        });

        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["cardinality"], "many");
        assert_eq!(json["value"]["count"], 15);
        assert_eq!(json["value"]["has_more"], true);
    }
}
