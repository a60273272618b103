//! Document types for the relation kernel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier of a document inside its collection.
///
/// Wraps the store's string id and implements `Ord` for deterministic ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new DocumentId.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as a JSON value, the way it is embedded in relation fields.
    pub fn to_value(&self) -> Value {
        Value::String(self.0.clone())
    }

    /// Read an id out of an embedded relation value.
    ///
    /// Accepts a plain string id or a legacy `{ "id": "..." }` object.
    /// Empty strings are treated as "no reference".
    pub fn from_value(value: &Value) -> Option<Self> {
        let raw = match value {
            Value::String(s) => s.as_str(),
            Value::Object(obj) => obj.get("id")?.as_str()?,
            _ => return None,
        };
        if raw.is_empty() {
            None
        } else {
            Some(Self::new(raw))
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A record as returned by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id.
    pub id: DocumentId,
    /// Schemaless field map.
    pub fields: Map<String, Value>,
}

impl Document {
    /// Create a new document.
    pub fn new(id: impl Into<DocumentId>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Create a document from a JSON object literal.
    ///
    /// Non-object values produce an empty field map.
    pub fn from_json(id: impl Into<DocumentId>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, fields)
    }

    /// Get a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Read the id stored in a scalar relation field.
    pub fn scalar_ref(&self, field: &str) -> Option<DocumentId> {
        self.fields.get(field).and_then(DocumentId::from_value)
    }

    /// Read the ids stored in an array relation field, in stored order.
    ///
    /// A missing or null field reads as an empty list. A scalar where an
    /// array is declared reads as a one-element list.
    pub fn array_refs(&self, field: &str) -> Vec<DocumentId> {
        match self.fields.get(field) {
            Some(Value::Array(items)) => items.iter().filter_map(DocumentId::from_value).collect(),
            Some(other) => DocumentId::from_value(other).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Apply a patch in place (overwrite semantics per field).
    pub fn apply(&mut self, patch: &FieldPatch) {
        for (field, value) in patch.iter() {
            self.fields.insert(field.clone(), value.clone());
        }
    }
}

/// Key of a node in a relation graph: `type:id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    /// Entity type name.
    pub entity_type: String,
    /// Document id.
    pub id: DocumentId,
}

impl NodeKey {
    /// Create a new node key.
    pub fn new(entity_type: impl Into<String>, id: DocumentId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// Partial field update sent to the store.
///
/// Each present key overwrites the stored field; `null` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPatch(Map<String, Value>);

impl FieldPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field.
    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    /// Clear a field to null.
    pub fn clear(self, field: impl Into<String>) -> Self {
        self.set(field, Value::Null)
    }

    /// Set a field in place.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Iterate over patched fields.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Check if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of patched fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}
