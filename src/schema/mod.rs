//! Relation schema registry.
//!
//! The registry is the single source of truth for relation shape: which
//! relations an entity type declares, the exact field name and cardinality
//! on both sides, and the collection each entity type lives in. Nothing in
//! the kernel infers shape from the documents themselves.

pub mod defaults;
pub mod descriptor;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::canonical::fingerprint_hex;

pub use descriptor::{
    CachePolicy, CachedField, Cardinality, RelationDescriptor, RelationKind, ReverseSide,
};

/// Schema error. A relation or type the registry does not declare is a
/// programmer error and always propagates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Entity type not declared.
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),
    /// Relation not declared on the entity type.
    #[error("Relation '{relation}' is not declared on entity type '{entity_type}'")]
    UnknownRelation {
        /// Entity type.
        entity_type: String,
        /// Relation name.
        relation: String,
    },
    /// Relation declared twice for the same type.
    #[error("Relation '{relation}' declared twice on entity type '{entity_type}'")]
    DuplicateRelation {
        /// Entity type.
        entity_type: String,
        /// Relation name.
        relation: String,
    },
    /// Entity type has no collection mapping.
    #[error("No collection declared for entity type '{0}'")]
    MissingCollection(String),
    /// Reverse-query relation without a reverse field.
    #[error("Relation '{entity_type}.{relation}' is resolved by reverse query but declares no reverse field")]
    MissingReverseField {
        /// Entity type.
        entity_type: String,
        /// Relation name.
        relation: String,
    },
    /// Cache fields declared where no embedded reference exists.
    #[error("Relation '{entity_type}.{relation}' declares cache fields but has no embedded field")]
    InvalidCache {
        /// Entity type.
        entity_type: String,
        /// Relation name.
        relation: String,
    },
    /// Two declarations of the same edge disagree.
    #[error("Relation '{entity_type}.{relation}' disagrees with its inverse: {detail}")]
    InverseMismatch {
        /// Entity type.
        entity_type: String,
        /// Relation name.
        relation: String,
        /// What disagrees.
        detail: String,
    },
    /// Schema file could not be read or parsed.
    #[error("Failed to load schema: {0}")]
    Load(String),
}

/// Serializable form of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDeclaration {
    /// Entity type -> collection name.
    pub collections: BTreeMap<String, String>,
    /// All relation declarations.
    pub relations: Vec<RelationDescriptor>,
}

/// Static map of allowed relations per entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SchemaDeclaration", into = "SchemaDeclaration")]
pub struct RelationRegistry {
    collections: BTreeMap<String, String>,
    relations: BTreeMap<String, Vec<RelationDescriptor>>,
    fingerprint: String,
}

impl RelationRegistry {
    /// Build and validate a registry.
    pub fn new(
        relations: Vec<RelationDescriptor>,
        collections: BTreeMap<String, String>,
    ) -> Result<Self, SchemaError> {
        let mut by_type: BTreeMap<String, Vec<RelationDescriptor>> = BTreeMap::new();

        for desc in relations {
            for entity_type in [&desc.source_type, &desc.target_type] {
                if !collections.contains_key(entity_type) {
                    return Err(SchemaError::MissingCollection(entity_type.clone()));
                }
            }
            if desc.kind == RelationKind::ReverseQuery {
                if desc.reverse.is_none() {
                    return Err(SchemaError::MissingReverseField {
                        entity_type: desc.source_type.clone(),
                        relation: desc.name.clone(),
                    });
                }
                if !desc.cached_fields.is_empty() {
                    return Err(SchemaError::InvalidCache {
                        entity_type: desc.source_type.clone(),
                        relation: desc.name.clone(),
                    });
                }
            }

            let declared = by_type.entry(desc.source_type.clone()).or_default();
            if declared.iter().any(|d| d.name == desc.name) {
                return Err(SchemaError::DuplicateRelation {
                    entity_type: desc.source_type.clone(),
                    relation: desc.name.clone(),
                });
            }
            declared.push(desc);
        }

        // Entity types with a collection but no relations still resolve.
        for entity_type in collections.keys() {
            by_type.entry(entity_type.clone()).or_default();
        }

        let mut registry = Self {
            collections,
            relations: by_type,
            fingerprint: String::new(),
        };
        registry.check_inverses()?;
        registry.fingerprint = fingerprint_hex(&registry.declaration())
            .map_err(|e| SchemaError::Load(format!("fingerprint: {}", e)))?;
        Ok(registry)
    }

    /// Load a registry from a JSON schema file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SchemaError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    /// Parse a registry from a JSON schema declaration.
    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        let declaration: SchemaDeclaration =
            serde_json::from_str(raw).map_err(|e| SchemaError::Load(e.to_string()))?;
        Self::try_from(declaration)
    }

    /// All relations declared on an entity type, in declaration order.
    pub fn relations_of(&self, entity_type: &str) -> Result<&[RelationDescriptor], SchemaError> {
        self.relations
            .get(entity_type)
            .map(Vec::as_slice)
            .ok_or_else(|| SchemaError::UnknownEntityType(entity_type.to_string()))
    }

    /// Look up one relation.
    pub fn relation(
        &self,
        entity_type: &str,
        relation: &str,
    ) -> Result<&RelationDescriptor, SchemaError> {
        self.relations_of(entity_type)?
            .iter()
            .find(|d| d.name == relation)
            .ok_or_else(|| SchemaError::UnknownRelation {
                entity_type: entity_type.to_string(),
                relation: relation.to_string(),
            })
    }

    /// Collection holding documents of an entity type.
    pub fn collection_of(&self, entity_type: &str) -> Result<&str, SchemaError> {
        self.collections
            .get(entity_type)
            .map(String::as_str)
            .ok_or_else(|| SchemaError::UnknownEntityType(entity_type.to_string()))
    }

    /// The relation on the target type whose embedded field mirrors `desc`.
    pub fn inverse_of(&self, desc: &RelationDescriptor) -> Option<&RelationDescriptor> {
        let reverse_field = desc.reverse_field()?;
        self.relations
            .get(&desc.target_type)?
            .iter()
            .find(|d| d.target_type == desc.source_type && d.forward_field() == Some(reverse_field))
    }

    /// Declared entity types (sorted).
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Total number of declared relations.
    pub fn len(&self) -> usize {
        self.relations.values().map(Vec::len).sum()
    }

    /// Check if no relations are declared.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hash of the canonical declaration.
    ///
    /// Changes whenever a relation, field name or collection changes.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Serializable declaration.
    pub fn declaration(&self) -> SchemaDeclaration {
        SchemaDeclaration {
            collections: self.collections.clone(),
            relations: self.relations.values().flatten().cloned().collect(),
        }
    }

    fn check_inverses(&self) -> Result<(), SchemaError> {
        for desc in self.relations.values().flatten() {
            let (Some(reverse), Some(inverse)) = (&desc.reverse, self.inverse_of(desc)) else {
                continue;
            };
            let mismatch = |detail: String| SchemaError::InverseMismatch {
                entity_type: desc.source_type.clone(),
                relation: desc.name.clone(),
                detail,
            };

            if inverse.kind.cardinality() != reverse.cardinality {
                return Err(mismatch(format!(
                    "reverse field '{}' declared {} but '{}.{}' is {}",
                    reverse.field,
                    reverse.cardinality,
                    inverse.source_type,
                    inverse.name,
                    inverse.kind.cardinality(),
                )));
            }
            if let (Some(forward), Some(inverse_reverse)) =
                (desc.forward_field(), inverse.reverse_field())
            {
                if forward != inverse_reverse {
                    return Err(mismatch(format!(
                        "'{}.{}' mirrors into '{}' instead of '{}'",
                        inverse.source_type, inverse.name, inverse_reverse, forward,
                    )));
                }
            }
        }
        Ok(())
    }
}

impl TryFrom<SchemaDeclaration> for RelationRegistry {
    type Error = SchemaError;

    fn try_from(declaration: SchemaDeclaration) -> Result<Self, Self::Error> {
        Self::new(declaration.relations, declaration.collections)
    }
}

impl From<RelationRegistry> for SchemaDeclaration {
    fn from(registry: RelationRegistry) -> Self {
        registry.declaration()
    }
}

impl Default for RelationRegistry {
    fn default() -> Self {
        Self::booking_defaults()
    }
}
