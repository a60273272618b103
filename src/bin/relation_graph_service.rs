//! Relation Kernel Service Binary
//!
//! Serves graph loading, edge synchronization and the consistency audit
//! over a PostgreSQL-backed document store.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `RELATION_SCHEMA_PATH`: JSON relation schema (default: built-in booking schema)
//! - `RELATION_MAX_DEPTH`, `RELATION_MAX_PER_TYPE`: default load options
//! - `STORE_CONNECT_TIMEOUT_SECS`: startup connection deadline (default: 30)
//! - `PORT`: Service port (default: 8002)
//! - `HOST`: Service host (default: 0.0.0.0)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://... cargo run --bin relation_graph_service --features service
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use relation_graph_kernel::service::{create_router, metrics_middleware, ServiceState};
use relation_graph_kernel::{KernelConfig, PostgresDocumentStore, RelationRegistry};

type BoxError = Box<dyn std::error::Error>;

const DEFAULT_FILTER: &str =
    "relation_graph_service=info,relation_graph_kernel=info,relation_graph=info,tower_http=info,sqlx=warn";

/// Listener and startup settings.
struct ServerSettings {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl ServerSettings {
    fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|s| !s.is_empty());
        Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("PORT").and_then(|s| s.parse().ok()).unwrap_or(8002),
            connect_timeout: Duration::from_secs(
                var("STORE_CONNECT_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    fn address(&self) -> Result<SocketAddr, BoxError> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let pretty = std::env::var("LOG_FORMAT").map_or(false, |f| f == "pretty");

    let registry = tracing_subscriber::registry().with(filter);
    if pretty {
        registry
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    }
}

/// Wraps each request in a span carrying `X-Request-Id` (or a fresh one)
/// and emits an access log line when it completes.
async fn access_log(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let request_id = request
        .headers()
        .get("X-Request-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
        status = tracing::field::Empty,
    );
    let response = next.run(request).instrument(span.clone()).await;
    let status = response.status().as_u16();
    span.record("status", status);

    info!(
        target: "relation_graph_service::access",
        request_id = %request_id,
        method = %method,
        path = %path,
        status,
        latency_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

/// Connect to PostgreSQL within the startup deadline and create the
/// documents table if needed.
async fn connect_store(deadline: Duration) -> Result<PostgresDocumentStore, BoxError> {
    let started = Instant::now();
    info!(timeout_secs = deadline.as_secs(), "Connecting to document store");

    let store = match tokio::time::timeout(deadline, PostgresDocumentStore::from_env()).await {
        Ok(Ok(store)) => store,
        Ok(Err(e)) => {
            error!(error = %e, "Document store connection failed");
            return Err(e.into());
        }
        Err(_) => {
            error!(timeout_secs = deadline.as_secs(), "Document store connection timed out");
            return Err("document store connection timeout".into());
        }
    };
    store.ensure_schema().await?;

    info!(
        latency_ms = started.elapsed().as_millis() as u64,
        "Document store ready"
    );
    Ok(store)
}

fn build_app(store: PostgresDocumentStore, registry: RelationRegistry, config: &KernelConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_router(ServiceState::from_config(store, registry, config))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(access_log))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!(signal = "SIGINT", "Shutting down"),
        _ = terminate => info!(signal = "SIGTERM", "Shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing();

    let version = env!("CARGO_PKG_VERSION");
    info!(
        version,
        build_sha = option_env!("BUILD_SHA").unwrap_or("dev"),
        "Starting Relation Kernel Service"
    );

    let settings = ServerSettings::from_env();
    let config = KernelConfig::from_env();
    let registry = config.load_registry()?;
    info!(
        relation_count = registry.len(),
        schema_fingerprint = %registry.fingerprint(),
        max_depth = config.max_depth,
        max_relations_per_type = config.max_relations_per_type,
        "Relation registry initialized"
    );

    let store = connect_store(settings.connect_timeout).await?;
    let app = build_app(store, registry, &config);

    let addr = settings.address()?;
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, version, "Relation Kernel Service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relation Kernel Service stopped");
    Ok(())
}
