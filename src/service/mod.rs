//! Relation Kernel REST Service
//!
//! Exposes graph loading, edge synchronization and the consistency audit
//! as a REST API.
//!
//! ## Endpoints
//!
//! - `POST /api/graph/load` - Load an entity with its relations
//! - `POST /api/relations/sync` - Connect or disconnect an edge
//! - `POST /api/audit` - Run a consistency audit
//! - `GET /api/audit` - Current audit state
//! - `GET /api/schema` - Relation schema and fingerprint
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, record_audit_metrics, record_load_metrics, record_sync_metrics};
pub use routes::{create_router, ErrorResponse};
pub use state::ServiceState;
