//! Axum routes for the Relation Kernel service.

use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::audit::{AuditError, AuditOptions, AuditReport, AuditState, ScopeFilter};
use crate::loader::{LoadOptions, LoaderError};
use crate::schema::SchemaDeclaration;
use crate::store::DocumentStore;
use crate::sync::{SyncAction, SyncError, SyncOutcome};
use crate::types::{DocumentId, GraphLoad};
use crate::RELATION_KERNEL_SCHEMA_VERSION;

use super::middleware::{record_audit_metrics, record_load_metrics, record_sync_metrics};
use super::state::ServiceState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to load an entity graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRequest {
    /// Root entity type.
    pub entity_type: String,
    /// Root document id.
    pub id: String,
    /// Load options. If not provided, uses the configured defaults.
    #[serde(default)]
    pub options: Option<LoadOptions>,
}

/// Request to connect or disconnect an edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Source entity type.
    pub source_type: String,
    /// Source document id.
    pub source_id: String,
    /// Relation name declared on the source type.
    pub relation: String,
    /// Target document id.
    pub target_id: String,
    /// Connect or disconnect.
    pub action: SyncAction,
}

/// Request to run an audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditRequest {
    /// Documents to scan.
    pub scope: ScopeFilter,
    /// Run options.
    pub options: AuditOptions,
}

/// Relation schema description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaResponse {
    /// Version of the relation kernel schema format.
    pub schema_version: String,
    /// Fingerprint of the loaded declaration.
    pub fingerprint: String,
    /// Number of declared relations.
    pub relation_count: usize,
    /// Declaration the registry was built from.
    pub declaration: SchemaDeclaration,
}

/// Service health response (detailed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded".
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Version of the relation kernel schema format.
    pub schema_version: String,
    /// Number of declared relations.
    pub relation_count: usize,
    /// Fingerprint of the loaded declaration.
    pub schema_fingerprint: String,
    /// Document store connectivity.
    pub store_connected: bool,
    /// Auditor state label.
    pub audit_status: String,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    /// Always "alive".
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Whether the service accepts traffic.
    pub ready: bool,
    /// Document store reachable.
    pub store: bool,
    /// Failure detail when not ready.
    pub details: Option<String>,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    let error = error.into();
    tracing::warn!(status = status.as_u16(), code, error = %error, "Request error");
    (status, Json(ErrorResponse::new(code, error)))
}

fn loader_error(e: LoaderError) -> ApiError {
    match e {
        LoaderError::Schema(_) => api_error(StatusCode::BAD_REQUEST, "SCHEMA_ERROR", e.to_string()),
        LoaderError::Store { .. } => {
            api_error(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", e.to_string())
        }
    }
}

fn sync_error(e: SyncError) -> ApiError {
    match e {
        SyncError::Schema(_) => api_error(StatusCode::BAD_REQUEST, "SCHEMA_ERROR", e.to_string()),
        SyncError::EmptyId(_) => api_error(StatusCode::BAD_REQUEST, "INVALID_ID", e.to_string()),
        SyncError::Side(_) => {
            api_error(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", e.to_string())
        }
    }
}

fn audit_error(e: AuditError) -> ApiError {
    match e {
        AuditError::AlreadyRunning(_) => api_error(StatusCode::CONFLICT, "AUDIT_RUNNING", e.to_string()),
        AuditError::Schema(_) => api_error(StatusCode::BAD_REQUEST, "SCHEMA_ERROR", e.to_string()),
        AuditError::Enumeration { .. } => {
            api_error(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", e.to_string())
        }
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Load an entity with its relations.
async fn load_handler<S: DocumentStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    Json(request): Json<LoadRequest>,
) -> Result<Json<GraphLoad>, ApiError> {
    let start = Instant::now();
    let options = request
        .options
        .unwrap_or_else(|| state.kernel.default_options().clone());
    let id = DocumentId::new(request.id.as_str());

    let load = state
        .kernel
        .load_entity_graph(&request.entity_type, &id, &options)
        .await
        .map_err(loader_error)?
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                "ENTITY_NOT_FOUND",
                format!("{}:{} does not exist", request.entity_type, request.id),
            )
        })?;

    record_load_metrics(
        &request.entity_type,
        load.loaded_entities,
        load.partial,
        start.elapsed().as_millis() as u64,
    );
    Ok(Json(load))
}

/// Connect or disconnect an edge.
///
/// A partial write is still a 200; the outcome reports which side landed.
async fn sync_handler<S: DocumentStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncOutcome>, ApiError> {
    let outcome = state
        .kernel
        .synchronize_relation(
            &request.source_type,
            &DocumentId::new(request.source_id.as_str()),
            &request.relation,
            &DocumentId::new(request.target_id.as_str()),
            request.action,
        )
        .await
        .map_err(sync_error)?;

    record_sync_metrics(request.action, outcome.ok);
    Ok(Json(outcome))
}

/// Run a consistency audit to completion.
async fn run_audit_handler<S: DocumentStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    Json(request): Json<AuditRequest>,
) -> Result<Json<AuditReport>, ApiError> {
    let report = state
        .kernel
        .run_consistency_audit_with(&request.scope, &request.options)
        .await
        .map_err(audit_error)?;

    record_audit_metrics(&report.stats, report.dry_run);
    Ok(Json(report))
}

/// Current audit state.
async fn audit_state_handler<S: DocumentStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
) -> Json<AuditState> {
    Json(state.kernel.audit_state())
}

/// Relation schema.
async fn schema_handler<S: DocumentStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
) -> Json<SchemaResponse> {
    let registry = state.kernel.registry();
    Json(SchemaResponse {
        schema_version: RELATION_KERNEL_SCHEMA_VERSION.to_string(),
        fingerprint: registry.fingerprint().to_string(),
        relation_count: registry.len(),
        declaration: registry.declaration(),
    })
}

/// Health check endpoint (detailed).
async fn health_handler<S: DocumentStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
) -> Json<HealthResponse> {
    let store_connected = state.kernel.store().health_check().await;
    let registry = state.kernel.registry();

    Json(HealthResponse {
        status: if store_connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema_version: RELATION_KERNEL_SCHEMA_VERSION.to_string(),
        relation_count: registry.len(),
        schema_fingerprint: registry.fingerprint().to_string(),
        store_connected,
        audit_status: state.kernel.audit_state().status().to_string(),
    })
}

/// Liveness probe endpoint.
///
/// Does NOT check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 if the store is reachable, 503 otherwise.
async fn readiness_handler<S: DocumentStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    if state.kernel.store().health_check().await {
        Ok(Json(ReadinessResponse {
            ready: true,
            store: true,
            details: None,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                store: false,
                details: Some("Document store unreachable".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the Relation Kernel service.
pub fn create_router<S: DocumentStore + 'static>(state: ServiceState<S>) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Graph loading
        .route("/api/graph/load", post(load_handler::<S>))
        // Edge synchronization
        .route("/api/relations/sync", post(sync_handler::<S>))
        // Consistency audit
        .route("/api/audit", post(run_audit_handler::<S>).get(audit_state_handler::<S>))
        // Schema
        .route("/api/schema", get(schema_handler::<S>))
        // Health checks
        .route("/health", get(health_handler::<S>))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler::<S>))
        .with_state(state)
}
