//! Core types for the relation kernel.

pub mod document;
pub mod edge;
pub mod graph;

pub use document::{Document, DocumentId, FieldPatch, NodeKey};
pub use edge::{Edge, EdgeSide};
pub use graph::{
    EntityNode, EntityStub, GraphLoad, IssueKind, LinkedEntity, LoadIssue, RelationList,
    RelationValue,
};
