//! In-memory document store for testing and embedding.

use std::collections::{BTreeMap, BTreeSet};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::types::{Document, DocumentId, FieldPatch};
use super::DocumentStore;

/// Error type for in-memory store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InMemoryError {
    /// Patch target does not exist.
    #[error("Document not found: {collection}/{id}")]
    DocumentNotFound {
        /// Collection name.
        collection: String,
        /// Document id.
        id: DocumentId,
    },
    /// Failure injected by a test.
    #[error("Injected failure: {0}")]
    Injected(String),
}

/// Per-call counters, for asserting how much I/O an operation issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStats {
    /// `get_document` calls per `collection/id`.
    pub gets: BTreeMap<String, usize>,
    /// Number of `query_documents` calls.
    pub queries: usize,
    /// Number of `patch_document` calls.
    pub patches: usize,
    /// Number of `list_documents` calls.
    pub lists: usize,
}

impl CallStats {
    /// Total `get_document` calls.
    pub fn total_gets(&self) -> usize {
        self.gets.values().sum()
    }

    /// `get_document` calls for one document.
    pub fn gets_of(&self, collection: &str, id: &str) -> usize {
        self.gets.get(&format!("{}/{}", collection, id)).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct FailureInjection {
    reads: BTreeSet<(String, DocumentId)>,
    patches: BTreeSet<(String, DocumentId)>,
    collections: BTreeSet<String>,
}

/// In-memory document store.
///
/// Uses BTreeMap for deterministic iteration order. Interior mutability
/// lets the kernel patch through a shared reference, the way it would
/// with a remote store.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<BTreeMap<String, BTreeMap<DocumentId, Document>>>,
    stats: Mutex<CallStats>,
    failures: RwLock<FailureInjection>,
}

impl InMemoryDocumentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document.
    pub fn add_document(&self, collection: &str, document: Document) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(document.id.clone(), document);
    }

    /// Insert or replace a document given as a JSON object.
    pub fn add_json(&self, collection: &str, id: &str, fields: Value) {
        self.add_document(collection, Document::from_json(id, fields));
    }

    /// Snapshot of one document.
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(&DocumentId::new(id)))
            .cloned()
    }

    /// Number of documents in a collection.
    pub fn num_documents(&self, collection: &str) -> usize {
        self.collections.read().get(collection).map_or(0, BTreeMap::len)
    }

    /// Call counters so far.
    pub fn stats(&self) -> CallStats {
        self.stats.lock().clone()
    }

    /// Reset call counters.
    pub fn reset_stats(&self) {
        *self.stats.lock() = CallStats::default();
    }

    /// Make `get_document` fail for one document.
    pub fn fail_reads_of(&self, collection: &str, id: &str) {
        self.failures
            .write()
            .reads
            .insert((collection.to_string(), DocumentId::new(id)));
    }

    /// Make `patch_document` fail for one document.
    pub fn fail_patches_of(&self, collection: &str, id: &str) {
        self.failures
            .write()
            .patches
            .insert((collection.to_string(), DocumentId::new(id)));
    }

    /// Make queries and listings of a collection fail.
    pub fn fail_collection(&self, collection: &str) {
        self.failures.write().collections.insert(collection.to_string());
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        *self.failures.write() = FailureInjection::default();
    }

    fn check_collection(&self, collection: &str) -> Result<(), InMemoryError> {
        if self.failures.read().collections.contains(collection) {
            return Err(InMemoryError::Injected(format!("collection {} unavailable", collection)));
        }
        Ok(())
    }
}

/// Equality on stored values, where a legacy `{ "id": .. }` entry also
/// matches its bare id.
fn matches_field(document: &Document, field: &str, value: &Value) -> bool {
    let wanted = DocumentId::from_value(value);
    let same = |stored: &Value| {
        stored == value || (wanted.is_some() && DocumentId::from_value(stored) == wanted)
    };
    match document.field(field) {
        Some(Value::Array(items)) => items.iter().any(same),
        Some(stored) => same(stored),
        None => false,
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    type Error = InMemoryError;

    async fn get_document(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, Self::Error> {
        *self
            .stats
            .lock()
            .gets
            .entry(format!("{}/{}", collection, id))
            .or_default() += 1;

        let key = (collection.to_string(), id.clone());
        if self.failures.read().reads.contains(&key) {
            return Err(InMemoryError::Injected(format!("read of {}/{}", collection, id)));
        }

        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn query_documents(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, Self::Error> {
        self.stats.lock().queries += 1;
        self.check_collection(collection)?;

        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| matches_field(doc, field, value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn patch_document(
        &self,
        collection: &str,
        id: &DocumentId,
        patch: &FieldPatch,
    ) -> Result<(), Self::Error> {
        self.stats.lock().patches += 1;

        let key = (collection.to_string(), id.clone());
        if self.failures.read().patches.contains(&key) {
            return Err(InMemoryError::Injected(format!("patch of {}/{}", collection, id)));
        }

        let mut collections = self.collections.write();
        let document = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| InMemoryError::DocumentNotFound {
                collection: collection.to_string(),
                id: id.clone(),
            })?;
        document.apply(patch);
        Ok(())
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<Document>, Self::Error> {
        self.stats.lock().lists += 1;
        self.check_collection(collection)?;

        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded_store() -> InMemoryDocumentStore {
        let store = InMemoryDocumentStore::new();
        store.add_json("concerts", "E1", json!({ "lieuId": "L1", "contactIds": ["C1", "C2"] }));
        store.add_json("concerts", "E2", json!({ "lieuId": "L2", "contactIds": ["C2"] }));
        store.add_json("concerts", "E3", json!({ "lieuId": "L1" }));
        store
    }

    #[tokio::test]
    async fn test_add_and_get_document() {
        let store = seeded_store();

        let doc = store.get_document("concerts", &"E1".into()).await.unwrap();
        assert_eq!(doc.unwrap().scalar_ref("lieuId"), Some(DocumentId::new("L1")));

        let missing = store.get_document("concerts", &"E9".into()).await.unwrap();
        assert!(missing.is_none());
        assert_eq!(store.stats().total_gets(), 2);
    }

    #[tokio::test]
    async fn test_query_matches_scalars_and_array_members() {
        let store = seeded_store();

        let by_lieu = store.query_documents("concerts", "lieuId", &json!("L1")).await.unwrap();
        let ids: Vec<_> = by_lieu.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["E1", "E3"]);

        let by_contact = store.query_documents("concerts", "contactIds", &json!("C2")).await.unwrap();
        let ids: Vec<_> = by_contact.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["E1", "E2"]);
    }

    #[tokio::test]
    async fn test_query_matches_legacy_id_objects() {
        let store = seeded_store();
        store.add_json("concerts", "E4", json!({ "lieuId": { "id": "L1" } }));
        store.add_json("concerts", "E5", json!({ "contactIds": [{ "id": "C2", "nom": "Chloe" }] }));
        assert_eq!(store.num_documents("concerts"), 5);

        let by_lieu = store.query_documents("concerts", "lieuId", &json!("L1")).await.unwrap();
        let ids: Vec<_> = by_lieu.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["E1", "E3", "E4"]);

        let by_contact = store.query_documents("concerts", "contactIds", &json!("C2")).await.unwrap();
        let ids: Vec<_> = by_contact.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["E1", "E2", "E5"]);

        let none = store.query_documents("concerts", "lieuId", &json!("L9")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_patch_missing_document_fails() {
        let store = seeded_store();
        let patch = FieldPatch::new().set("lieuId", json!("L3"));

        let err = store.patch_document("concerts", &"E9".into(), &patch).await.unwrap_err();
        assert!(matches!(err, InMemoryError::DocumentNotFound { .. }));

        store.patch_document("concerts", &"E3".into(), &patch).await.unwrap();
        let doc = store.document("concerts", "E3").unwrap();
        assert_eq!(doc.scalar_ref("lieuId"), Some(DocumentId::new("L3")));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = seeded_store();
        store.fail_reads_of("concerts", "E1");
        store.fail_patches_of("concerts", "E2");
        store.fail_collection("lieux");

        assert!(store.get_document("concerts", &"E1".into()).await.is_err());
        assert!(store
            .patch_document("concerts", &"E2".into(), &FieldPatch::new())
            .await
            .is_err());
        assert!(store.list_documents("lieux").await.is_err());

        store.clear_failures();
        assert!(store.get_document("concerts", &"E1".into()).await.unwrap().is_some());
    }
}
