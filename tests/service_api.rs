//! REST API tests for the Relation Kernel service.
//!
//! Requests go through the full router over an in-memory store; no network
//! or database is involved.

#![cfg(feature = "service")]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use relation_graph_kernel::service::routes::HealthResponse;
use relation_graph_kernel::store::memory::InMemoryError;
use relation_graph_kernel::{
    create_router, AuditReport, Document, DocumentId, DocumentStore, FieldPatch, GraphLoad,
    InMemoryDocumentStore, RelationRegistry, RelationValue, ScopeFilter, ServiceState,
    SyncOutcome,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn seeded_state() -> ServiceState<InMemoryDocumentStore> {
    let store = InMemoryDocumentStore::new();
    store.add_json("concerts", "E1", json!({ "titre": "Nuit", "lieuId": "L1" }));
    store.add_json("lieux", "L1", json!({ "nom": "Salle" }));
    store.add_json("contacts", "C1", json!({ "nom": "Chloe" }));
    ServiceState::new(store, RelationRegistry::booking_defaults())
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Store whose enumeration never completes, so an audit stays running.
struct StalledStore;

#[async_trait::async_trait]
impl DocumentStore for StalledStore {
    type Error = InMemoryError;

    async fn get_document(&self, _: &str, _: &DocumentId) -> Result<Option<Document>, Self::Error> {
        Ok(None)
    }

    async fn query_documents(&self, _: &str, _: &str, _: &Value) -> Result<Vec<Document>, Self::Error> {
        Ok(Vec::new())
    }

    async fn patch_document(&self, _: &str, _: &DocumentId, _: &FieldPatch) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn list_documents(&self, _: &str) -> Result<Vec<Document>, Self::Error> {
        futures::future::pending().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Graph Loading
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_load_returns_graph() {
    let app = create_router(seeded_state());

    let (status, body) = send(
        app,
        "POST",
        "/api/graph/load",
        Some(json!({ "entity_type": "concert", "id": "E1" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let load: GraphLoad = serde_json::from_value(body).unwrap();
    assert_eq!(load.entity.id.as_str(), "E1");
    assert_eq!(load.loaded_entities, 2);
    let lieu = load.entity.relation("lieu").and_then(RelationValue::as_one).unwrap();
    assert_eq!(lieu.as_expanded().unwrap().field("nom"), Some(&json!("Salle")));
}

#[tokio::test]
async fn test_load_honors_request_options() {
    let app = create_router(seeded_state());

    let (status, body) = send(
        app,
        "POST",
        "/api/graph/load",
        Some(json!({ "entity_type": "concert", "id": "E1", "options": { "max_depth": 0 } })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let load: GraphLoad = serde_json::from_value(body).unwrap();
    assert_eq!(load.loaded_entities, 1);
    assert!(load.entity.relation("lieu").and_then(RelationValue::as_one).unwrap().is_stub());
}

#[tokio::test]
async fn test_load_missing_root_is_404() {
    let app = create_router(seeded_state());

    let (status, body) = send(
        app,
        "POST",
        "/api/graph/load",
        Some(json!({ "entity_type": "concert", "id": "E404" })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ENTITY_NOT_FOUND");
}

#[tokio::test]
async fn test_load_unknown_type_is_400() {
    let app = create_router(seeded_state());

    let (status, body) = send(
        app,
        "POST",
        "/api/graph/load",
        Some(json!({ "entity_type": "festival", "id": "F1" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "SCHEMA_ERROR");
}

// ─────────────────────────────────────────────────────────────────────────────
// Synchronization
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sync_connects_both_sides() {
    let state = seeded_state();
    let kernel = state.kernel.clone();
    let app = create_router(state);

    let (status, body) = send(
        app,
        "POST",
        "/api/relations/sync",
        Some(json!({
            "source_type": "lieu",
            "source_id": "L1",
            "relation": "contacts",
            "target_id": "C1",
            "action": "connect"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let outcome: SyncOutcome = serde_json::from_value(body).unwrap();
    assert!(outcome.ok);
    assert!(outcome.source_updated);
    assert!(outcome.target_updated);

    let contact = kernel.store().document("contacts", "C1").unwrap();
    assert_eq!(contact.field("lieuxIds"), Some(&json!(["L1"])));
}

#[tokio::test]
async fn test_sync_empty_id_is_400() {
    let app = create_router(seeded_state());

    let (status, body) = send(
        app,
        "POST",
        "/api/relations/sync",
        Some(json!({
            "source_type": "lieu",
            "source_id": "L1",
            "relation": "contacts",
            "target_id": "",
            "action": "connect"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ID");
}

#[tokio::test]
async fn test_sync_unknown_relation_is_400() {
    let app = create_router(seeded_state());

    let (status, body) = send(
        app,
        "POST",
        "/api/relations/sync",
        Some(json!({
            "source_type": "lieu",
            "source_id": "L1",
            "relation": "sponsors",
            "target_id": "C1",
            "action": "disconnect"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "SCHEMA_ERROR");
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_audit_runs_and_reports_state() {
    let state = seeded_state();
    state
        .kernel
        .store()
        .add_json("contacts", "C2", json!({ "lieuxIds": ["L1"] }));
    let app = create_router(state);

    let (status, body) = send(
        app.clone(),
        "POST",
        "/api/audit",
        Some(json!({ "scope": { "entity_types": ["contact"] } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let report: AuditReport = serde_json::from_value(body).unwrap();
    assert_eq!(report.stats.fixed, 1);
    assert!(!report.dry_run);

    let (status, body) = send(app, "GET", "/api/audit", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn test_concurrent_audit_is_409() {
    let state = ServiceState::new(StalledStore, RelationRegistry::booking_defaults());
    let kernel = state.kernel.clone();
    let app = create_router(state);

    let scope = ScopeFilter::all();
    let mut first = Box::pin(kernel.run_consistency_audit(&scope));
    assert!(futures::poll!(first.as_mut()).is_pending());

    let (status, body) = send(app.clone(), "POST", "/api/audit", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "AUDIT_RUNNING");

    let (_, body) = send(app, "GET", "/api/audit", None).await;
    assert_eq!(body["status"], "running");
}

// ─────────────────────────────────────────────────────────────────────────────
// Schema and Health
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_schema_endpoint() {
    let registry = RelationRegistry::booking_defaults();
    let app = create_router(seeded_state());

    let (status, body) = send(app, "GET", "/api/schema", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["relation_count"], registry.len());
    assert_eq!(body["fingerprint"], registry.fingerprint());
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = create_router(seeded_state());

    let (status, body) = send(app.clone(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_value(body).unwrap();
    assert_eq!(health.status, "healthy");
    assert!(health.store_connected);
    assert_eq!(health.audit_status, "idle");

    let (status, body) = send(app.clone(), "GET", "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");

    let (status, body) = send(app, "GET", "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = create_router(seeded_state());
    let (status, _) = send(app, "GET", "/api/nothing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
