//! Consistency auditor and repair job.
//!
//! Scans forward references and checks that each one is mirrored on the
//! target document. A missing mirror is healed with the target half of a
//! connect; the forward side is never mutated, and a mirror that points at
//! a different peer is reported but left alone.
//!
//! ## State machine
//!
//! ```text
//! Idle -> Running -> Completed(report)
//!                 -> Failed(error)
//! ```
//!
//! Only one run may be in progress per auditor. A run whose future is
//! dropped before completion ends in `Failed("cancelled")`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::schema::{Cardinality, RelationDescriptor, RelationRegistry, SchemaError};
use crate::store::DocumentStore;
use crate::sync::LinkSynchronizer;
use crate::types::{Document, DocumentId, Edge};

/// Error type for audit runs.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Another run is in progress.
    #[error("Audit run {0} is already in progress")]
    AlreadyRunning(Uuid),
    /// Unknown entity type in the scope.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    /// A collection could not be enumerated.
    #[error("Failed to enumerate {collection}: {message}")]
    Enumeration {
        /// Collection being listed.
        collection: String,
        /// Store error text.
        message: String,
    },
}

/// Field equality restricting which documents are audited, e.g. an
/// organization id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeField {
    /// Field name.
    pub field: String,
    /// Required value (scalar equality or array membership).
    pub value: Value,
}

/// Which documents a run enumerates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeFilter {
    /// Entity types to scan (all declared types when `None`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_types: Option<Vec<String>>,
    /// Tenant boundary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeField>,
}

impl ScopeFilter {
    /// Scan every declared entity type.
    pub fn all() -> Self {
        Self::default()
    }

    /// Scan only the given entity types.
    pub fn types<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            entity_types: Some(types.into_iter().map(Into::into).collect()),
            scope: None,
        }
    }

    /// Restrict to documents whose `field` matches `value`.
    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.scope = Some(ScopeField {
            field: field.into(),
            value,
        });
        self
    }
}

/// Run options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditOptions {
    /// Report mismatches without writing repairs.
    pub dry_run: bool,
}

impl AuditOptions {
    /// Options for a report-only run.
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    /// Forward references examined.
    pub checked: usize,
    /// Mirrors written.
    pub fixed: usize,
    /// Forward references whose mirror was missing or pointed elsewhere.
    pub mismatched: usize,
    /// Forward references to documents that do not exist.
    pub orphaned: usize,
    /// Reads or repairs that failed.
    pub errors: usize,
}

/// Diagnostic category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditIssueKind {
    /// Target document does not exist.
    Orphaned,
    /// Mirror missing; not repaired because of a dry run.
    Mismatched,
    /// Scalar mirror points at a different peer; not repaired.
    Conflict,
    /// Target could not be read.
    ReadFailed,
    /// Repair patch failed.
    RepairFailed,
}

/// One diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditIssue {
    /// Category.
    pub kind: AuditIssueKind,
    /// Edge concerned.
    pub edge: Edge,
    /// Detail.
    pub message: String,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end.
    pub finished_at: DateTime<Utc>,
    /// Whether repairs were suppressed.
    pub dry_run: bool,
    /// Scope the run covered.
    pub scope: ScopeFilter,
    /// Counters.
    pub stats: AuditStats,
    /// Diagnostics, in scan order.
    pub issues: Vec<AuditIssue>,
}

/// Auditor lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditState {
    /// No run yet.
    #[default]
    Idle,
    /// A run is in progress.
    Running {
        /// Run identifier.
        run_id: Uuid,
        /// Run start.
        started_at: DateTime<Utc>,
    },
    /// Last run finished.
    Completed {
        /// Report of the last run.
        report: AuditReport,
    },
    /// Last run failed or was abandoned.
    Failed {
        /// Run identifier.
        run_id: Uuid,
        /// Failure detail.
        error: String,
    },
}

impl AuditState {
    /// Check if a run is in progress.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Short status label.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running { .. } => "running",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Marks the run failed if its future is dropped before `finish`.
struct RunGuard<'a> {
    state: &'a Mutex<AuditState>,
    run_id: Uuid,
    finished: bool,
}

impl RunGuard<'_> {
    fn finish(mut self, next: AuditState) {
        *self.state.lock() = next;
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.state.lock();
        if matches!(*state, AuditState::Running { run_id, .. } if run_id == self.run_id) {
            warn!(run_id = %self.run_id, "Audit run cancelled");
            *state = AuditState::Failed {
                run_id: self.run_id,
                error: "cancelled".to_string(),
            };
        }
    }
}

enum EdgeCheck {
    Consistent,
    Orphaned,
    Missing,
    Conflict(DocumentId),
}

/// Batch consistency auditor.
pub struct ConsistencyAuditor<S: DocumentStore> {
    store: Arc<S>,
    registry: Arc<RelationRegistry>,
    synchronizer: LinkSynchronizer<S>,
    state: Mutex<AuditState>,
}

impl<S: DocumentStore + 'static> ConsistencyAuditor<S> {
    /// Create an idle auditor.
    pub fn new(store: Arc<S>, registry: Arc<RelationRegistry>) -> Self {
        Self {
            synchronizer: LinkSynchronizer::new(store.clone(), registry.clone()),
            store,
            registry,
            state: Mutex::new(AuditState::Idle),
        }
    }

    /// Current state.
    pub fn state(&self) -> AuditState {
        self.state.lock().clone()
    }

    /// Run one audit pass.
    pub async fn run(&self, scope: &ScopeFilter, options: &AuditOptions) -> Result<AuditReport, AuditError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        {
            let mut state = self.state.lock();
            if let AuditState::Running { run_id: current, .. } = *state {
                return Err(AuditError::AlreadyRunning(current));
            }
            *state = AuditState::Running { run_id, started_at };
        }
        let guard = RunGuard {
            state: &self.state,
            run_id,
            finished: false,
        };

        info!(%run_id, dry_run = options.dry_run, "Audit run started");

        match self.scan(scope, options).await {
            Ok((stats, issues)) => {
                let report = AuditReport {
                    run_id,
                    started_at,
                    finished_at: Utc::now(),
                    dry_run: options.dry_run,
                    scope: scope.clone(),
                    stats,
                    issues,
                };
                info!(
                    %run_id,
                    checked = stats.checked,
                    fixed = stats.fixed,
                    mismatched = stats.mismatched,
                    orphaned = stats.orphaned,
                    errors = stats.errors,
                    "Audit run completed"
                );
                guard.finish(AuditState::Completed {
                    report: report.clone(),
                });
                Ok(report)
            }
            Err(e) => {
                warn!(%run_id, error = %e, "Audit run failed");
                guard.finish(AuditState::Failed {
                    run_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn scan(
        &self,
        scope: &ScopeFilter,
        options: &AuditOptions,
    ) -> Result<(AuditStats, Vec<AuditIssue>), AuditError> {
        let entity_types: Vec<String> = match &scope.entity_types {
            Some(types) => types.clone(),
            None => self.registry.entity_types().map(str::to_string).collect(),
        };

        let mut stats = AuditStats::default();
        let mut issues = Vec::new();

        for entity_type in &entity_types {
            let collection = self.registry.collection_of(entity_type)?;
            let relations: Vec<&RelationDescriptor> = self
                .registry
                .relations_of(entity_type)?
                .iter()
                .filter(|d| d.forward_field().is_some() && d.reverse.is_some())
                .collect();
            if relations.is_empty() {
                debug!(entity_type = %entity_type, "No mirrored relations to audit");
                continue;
            }

            let listed = match &scope.scope {
                Some(f) => self.store.query_documents(collection, &f.field, &f.value).await,
                None => self.store.list_documents(collection).await,
            };
            let documents = listed.map_err(|e| AuditError::Enumeration {
                collection: collection.to_string(),
                message: e.to_string(),
            })?;

            info!(entity_type = %entity_type, documents = documents.len(), "Auditing collection");

            for document in &documents {
                for desc in &relations {
                    self.audit_relation(desc, document, options, &mut stats, &mut issues)
                        .await;
                }
            }
        }

        Ok((stats, issues))
    }

    async fn audit_relation(
        &self,
        desc: &RelationDescriptor,
        document: &Document,
        options: &AuditOptions,
        stats: &mut AuditStats,
        issues: &mut Vec<AuditIssue>,
    ) {
        let Some(field) = desc.forward_field() else {
            return;
        };
        let targets = match desc.kind.cardinality() {
            Cardinality::Scalar => document.scalar_ref(field).into_iter().collect(),
            Cardinality::Array => document.array_refs(field),
        };

        for target_id in targets {
            stats.checked += 1;
            let edge = Edge::new(
                desc.source_type.as_str(),
                document.id.clone(),
                desc.name.as_str(),
                desc.target_type.as_str(),
                target_id.clone(),
            );

            let check = match self.check_edge(desc, &document.id, &target_id).await {
                Ok(check) => check,
                Err(message) => {
                    stats.errors += 1;
                    issues.push(AuditIssue {
                        kind: AuditIssueKind::ReadFailed,
                        edge,
                        message,
                    });
                    continue;
                }
            };

            match check {
                EdgeCheck::Consistent => {}
                EdgeCheck::Orphaned => {
                    stats.orphaned += 1;
                    debug!(%edge, "Orphaned reference");
                    issues.push(AuditIssue {
                        kind: AuditIssueKind::Orphaned,
                        message: format!("{} does not exist", edge.target_key()),
                        edge,
                    });
                }
                EdgeCheck::Conflict(other) => {
                    stats.mismatched += 1;
                    issues.push(AuditIssue {
                        kind: AuditIssueKind::Conflict,
                        message: format!("mirror points at {}", other),
                        edge,
                    });
                }
                EdgeCheck::Missing => {
                    stats.mismatched += 1;
                    if options.dry_run {
                        issues.push(AuditIssue {
                            kind: AuditIssueKind::Mismatched,
                            message: "mirror missing".to_string(),
                            edge,
                        });
                        continue;
                    }
                    match self
                        .synchronizer
                        .repair_reverse(desc, &document.id, &target_id)
                        .await
                    {
                        Ok(()) => {
                            stats.fixed += 1;
                            debug!(%edge, "Repaired mirror");
                        }
                        Err(e) => {
                            stats.errors += 1;
                            warn!(%edge, error = %e, "Mirror repair failed");
                            issues.push(AuditIssue {
                                kind: AuditIssueKind::RepairFailed,
                                message: e.to_string(),
                                edge,
                            });
                        }
                    }
                }
            }
        }
    }

    async fn check_edge(
        &self,
        desc: &RelationDescriptor,
        source_id: &DocumentId,
        target_id: &DocumentId,
    ) -> Result<EdgeCheck, String> {
        let Some(reverse) = &desc.reverse else {
            return Ok(EdgeCheck::Consistent);
        };
        let collection = self
            .registry
            .collection_of(&desc.target_type)
            .map_err(|e| e.to_string())?;

        let target = match self.store.get_document(collection, target_id).await {
            Ok(Some(target)) => target,
            Ok(None) => return Ok(EdgeCheck::Orphaned),
            Err(e) => return Err(e.to_string()),
        };

        Ok(match reverse.cardinality {
            Cardinality::Array => {
                if target.array_refs(&reverse.field).contains(source_id) {
                    EdgeCheck::Consistent
                } else {
                    EdgeCheck::Missing
                }
            }
            Cardinality::Scalar => match target.scalar_ref(&reverse.field) {
                Some(current) if &current == source_id => EdgeCheck::Consistent,
                Some(other) => EdgeCheck::Conflict(other),
                None => EdgeCheck::Missing,
            },
        })
    }
}
