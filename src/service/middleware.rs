//! Service middleware for metrics and request tracking.
//!
//! ## Metrics Exposed
//!
//! - `request` - request count and latency by path, method, status
//! - `graph_load` - entities per load, partial loads
//! - `relation_sync` - edge operations by action and outcome
//! - `audit_run` - audit counters per run

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::info;

use crate::audit::AuditStats;
use crate::sync::SyncAction;

/// Metrics middleware that records request counts and latency.
///
/// Uses tracing events under the `relation_graph::metrics` target; the log
/// pipeline aggregates them.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = metric_path(&request);

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "relation_graph::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

/// Route template of a request, so metrics stay low-cardinality.
///
/// Requests that matched no route are reported under `unmatched`.
fn metric_path(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |m| m.as_str().to_string())
}

/// Record graph load metrics.
pub fn record_load_metrics(entity_type: &str, loaded_entities: usize, partial: bool, latency_ms: u64) {
    info!(
        target: "relation_graph::metrics",
        metric_type = "graph_load",
        entity_type = entity_type,
        loaded_entities = loaded_entities,
        partial = partial,
        latency_ms = latency_ms,
        "graph_load_metric"
    );
}

/// Record relation synchronization metrics.
pub fn record_sync_metrics(action: SyncAction, ok: bool) {
    let result = if ok { "ok" } else { "partial" };
    info!(
        target: "relation_graph::metrics",
        metric_type = "relation_sync",
        action = %action,
        result = result,
        "relation_sync_metric"
    );
}

/// Record audit run metrics.
pub fn record_audit_metrics(stats: &AuditStats, dry_run: bool) {
    info!(
        target: "relation_graph::metrics",
        metric_type = "audit_run",
        checked = stats.checked,
        fixed = stats.fixed,
        mismatched = stats.mismatched,
        orphaned = stats.orphaned,
        errors = stats.errors,
        dry_run = dry_run,
        "audit_run_metric"
    );
}
