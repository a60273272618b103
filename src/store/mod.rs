//! Document store backends.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{Document, DocumentId, FieldPatch};

/// Trait for schemaless document store backends.
///
/// The store offers no foreign keys and no multi-document transactions;
/// every call is an independent suspension point. Implementations must
/// return query and list results in a deterministic order (by id).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch a document by id. `Ok(None)` when absent.
    async fn get_document(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, Self::Error>;

    /// Fetch documents whose `field` equals `value`, or whose `field` is an
    /// array containing `value`. A legacy `{ "id": .. }` entry matches its id.
    async fn query_documents(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, Self::Error>;

    /// Overwrite the patched fields of an existing document.
    ///
    /// Fails when the document does not exist.
    async fn patch_document(
        &self,
        collection: &str,
        id: &DocumentId,
        patch: &FieldPatch,
    ) -> Result<(), Self::Error>;

    /// Fetch every document of a collection.
    async fn list_documents(&self, collection: &str) -> Result<Vec<Document>, Self::Error>;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> bool {
        true
    }
}

pub use memory::InMemoryDocumentStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresDocumentStore;
