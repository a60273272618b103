//! # relation-graph-kernel
//!
//! Relational graph layer over a schemaless document store.
//!
//! The store offers no foreign keys, no joins and no multi-document
//! transactions. This crate adds the missing relational semantics:
//!
//! > Given an entity, what is it linked to, and do both ends of every link agree?
//!
//! ## Core Contract
//!
//! 1. A static registry declares every relation: name, target type, the exact
//!    embedded field and cardinality on both sides, and denormalized caches
//! 2. The loader materializes an entity and its relations as a bounded,
//!    cycle-safe tree
//! 3. The synchronizer writes both halves of an edge as two idempotent patches
//! 4. The auditor finds one-sided edges and heals the mirror
//!
//! ## Architecture
//!
//! ```text
//!                  RelationRegistry
//!                         ↓
//! GraphLoader   LinkSynchronizer   ConsistencyAuditor
//!        ↘              ↓              ↙
//!          DocumentStore (Postgres or Memory)
//! ```
//!
//! ## Consistency Guarantees
//!
//! - A load fetches each `type:id` at most once and never loops
//! - Repeating a connect or disconnect leaves both documents unchanged
//! - Partial writes are reported per side, never hidden
//! - After an audit, every enumerated forward reference with a live target
//!   is mirrored (conflicting scalar mirrors excepted)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod canonical;
pub mod config;
pub mod kernel;
pub mod loader;
pub mod schema;
pub mod store;
pub mod sync;
pub mod types;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use types::{
    Document, DocumentId, Edge, EdgeSide, EntityNode, EntityStub, FieldPatch, GraphLoad,
    IssueKind, LinkedEntity, LoadIssue, NodeKey, RelationList, RelationValue,
};
pub use schema::{
    CachePolicy, CachedField, Cardinality, RelationDescriptor, RelationKind, RelationRegistry,
    ReverseSide, SchemaDeclaration, SchemaError,
};
pub use store::{DocumentStore, InMemoryDocumentStore};
#[cfg(feature = "postgres")]
pub use store::PostgresDocumentStore;
pub use loader::{GraphLoader, LoadOptions, LoaderError};
pub use sync::{LinkSynchronizer, SideFailure, SyncAction, SyncError, SyncOutcome};
pub use audit::{
    AuditError, AuditIssue, AuditIssueKind, AuditOptions, AuditReport, AuditState, AuditStats,
    ConsistencyAuditor, ScopeField, ScopeFilter,
};
pub use kernel::RelationKernel;
pub use config::KernelConfig;
pub use canonical::{canonical_json, fingerprint, fingerprint_hex};

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, ServiceState};

/// Schema version for all serialized kernel types.
/// Increment on breaking changes to any schema type.
pub const RELATION_KERNEL_SCHEMA_VERSION: &str = "1.0.0";

/// Default number of relation levels expanded below the root.
pub const DEFAULT_MAX_DEPTH: u32 = 1;

/// Default number of entries kept per array relation.
pub const DEFAULT_MAX_RELATIONS_PER_TYPE: usize = 10;
