//! Edge types for the relation kernel.

use serde::{Deserialize, Serialize};
use super::document::{DocumentId, NodeKey};

/// Which half of a bidirectional edge a patch or check concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSide {
    /// The entity holding the forward reference.
    Source,
    /// The entity the forward reference points at.
    Target,
}

impl std::fmt::Display for EdgeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// One realized relationship instance.
///
/// Implements `Ord` for deterministic ordering:
/// (source_type, source_id, relation, target_type, target_id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Source entity type.
    pub source_type: String,
    /// Source document id.
    pub source_id: DocumentId,
    /// Relation name as declared on the source type.
    pub relation: String,
    /// Target entity type.
    pub target_type: String,
    /// Target document id.
    pub target_id: DocumentId,
}

impl Edge {
    /// Create a new edge.
    pub fn new(
        source_type: impl Into<String>,
        source_id: DocumentId,
        relation: impl Into<String>,
        target_type: impl Into<String>,
        target_id: DocumentId,
    ) -> Self {
        Self {
            source_type: source_type.into(),
            source_id,
            relation: relation.into(),
            target_type: target_type.into(),
            target_id,
        }
    }

    /// Node key of the source end.
    pub fn source_key(&self) -> NodeKey {
        NodeKey::new(self.source_type.clone(), self.source_id.clone())
    }

    /// Node key of the target end.
    pub fn target_key(&self) -> NodeKey {
        NodeKey::new(self.target_type.clone(), self.target_id.clone())
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} -[{}]-> {}:{}",
            self.source_type, self.source_id, self.relation, self.target_type, self.target_id
        )
    }
}
