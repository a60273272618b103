//! Relation descriptors: the declared shape of one relation.

use serde::{Deserialize, Serialize};

/// How many references one side of a relation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// A single id (or null).
    Scalar,
    /// A list of ids.
    Array,
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar => write!(f, "scalar"),
            Self::Array => write!(f, "array"),
        }
    }
}

/// How a relation is stored and resolved on its source entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RelationKind {
    /// Embedded single target id in `field`.
    ScalarForward {
        /// Field on the source document.
        field: String,
    },
    /// Embedded list of target ids in `field`.
    ArrayForward {
        /// Field on the source document.
        field: String,
    },
    /// No field on the source; targets are found by querying the target
    /// collection on the reverse field.
    ReverseQuery,
}

impl RelationKind {
    /// The embedded field on the source, if any.
    pub fn forward_field(&self) -> Option<&str> {
        match self {
            Self::ScalarForward { field } | Self::ArrayForward { field } => Some(field),
            Self::ReverseQuery => None,
        }
    }

    /// Cardinality of the relation as seen from the source.
    pub fn cardinality(&self) -> Cardinality {
        match self {
            Self::ScalarForward { .. } => Cardinality::Scalar,
            Self::ArrayForward { .. } | Self::ReverseQuery => Cardinality::Array,
        }
    }
}

/// The field on the target document mirroring the edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReverseSide {
    /// Field on the target document.
    pub field: String,
    /// Cardinality of that field.
    pub cardinality: Cardinality,
}

/// A denormalized copy of a peer field, stored next to the reference.
///
/// Populated at connect time, e.g. `structureNom` copied from the
/// structure's `nom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CachedField {
    /// Field on the document holding the reference.
    pub field: String,
    /// Field on the peer document the value is copied from.
    pub from: String,
}

/// What disconnect does with denormalized cache fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Clear cached fields to null when the edge is removed.
    #[default]
    ClearOnDisconnect,
    /// Leave cached fields untouched.
    Retain,
}

/// Declared relation `(source_type, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Entity type declaring the relation.
    pub source_type: String,
    /// Relation name, unique per source type.
    pub name: String,
    /// Entity type the relation points at.
    pub target_type: String,
    /// Storage and resolution mode.
    pub kind: RelationKind,
    /// Mirror field on the target, when the edge is bidirectional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse: Option<ReverseSide>,
    /// Denormalized fields copied from the target onto the source.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cached_fields: Vec<CachedField>,
    /// Disconnect behaviour for `cached_fields`.
    #[serde(default)]
    pub cache_policy: CachePolicy,
}

impl RelationDescriptor {
    fn with_kind(source_type: &str, name: &str, target_type: &str, kind: RelationKind) -> Self {
        Self {
            source_type: source_type.to_string(),
            name: name.to_string(),
            target_type: target_type.to_string(),
            kind,
            reverse: None,
            cached_fields: Vec::new(),
            cache_policy: CachePolicy::default(),
        }
    }

    /// Declare an embedded scalar relation.
    pub fn scalar(source_type: &str, name: &str, target_type: &str, field: &str) -> Self {
        Self::with_kind(
            source_type,
            name,
            target_type,
            RelationKind::ScalarForward {
                field: field.to_string(),
            },
        )
    }

    /// Declare an embedded array relation.
    pub fn array(source_type: &str, name: &str, target_type: &str, field: &str) -> Self {
        Self::with_kind(
            source_type,
            name,
            target_type,
            RelationKind::ArrayForward {
                field: field.to_string(),
            },
        )
    }

    /// Declare a relation resolved by querying `reverse_field` on the target collection.
    pub fn reverse_query(
        source_type: &str,
        name: &str,
        target_type: &str,
        reverse_field: &str,
        reverse_cardinality: Cardinality,
    ) -> Self {
        Self::with_kind(source_type, name, target_type, RelationKind::ReverseQuery)
            .with_reverse(reverse_field, reverse_cardinality)
    }

    /// Declare the mirror field on the target.
    pub fn with_reverse(mut self, field: &str, cardinality: Cardinality) -> Self {
        self.reverse = Some(ReverseSide {
            field: field.to_string(),
            cardinality,
        });
        self
    }

    /// Add a denormalized cache field copied from the target.
    pub fn with_cached(mut self, field: &str, from: &str) -> Self {
        self.cached_fields.push(CachedField {
            field: field.to_string(),
            from: from.to_string(),
        });
        self
    }

    /// Set the disconnect policy for cache fields.
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// The embedded field on the source, if any.
    pub fn forward_field(&self) -> Option<&str> {
        self.kind.forward_field()
    }

    /// The mirror field on the target, if any.
    pub fn reverse_field(&self) -> Option<&str> {
        self.reverse.as_ref().map(|r| r.field.as_str())
    }
}
