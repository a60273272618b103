//! PostgreSQL document store for production use.
//!
//! Documents live in a single JSONB table keyed by `(collection, id)`.
//! A patch is a JSONB top-level merge (`fields || patch`), which gives the
//! per-field overwrite semantics the synchronizer relies on.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;

use crate::config::env_or;
use crate::types::{Document, DocumentId, FieldPatch};
use super::DocumentStore;

/// DDL for the documents table.
pub const DOCUMENTS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    fields JSONB NOT NULL DEFAULT '{}'::jsonb,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (collection, id)
)
"#;

/// GIN index backing reverse queries on relation fields.
pub const DOCUMENTS_INDEX_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS documents_fields_gin ON documents USING GIN (fields jsonb_path_ops)
"#;

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Database connection URL.
    pub database_url: String,
    /// Pool size bounds `(min, max)`.
    pub connections: (u32, u32),
    /// Deadline for acquiring a connection.
    pub acquire_timeout: Duration,
    /// Idle connections are closed after this long.
    pub idle_timeout: Duration,
    /// Connections are recycled after this long.
    pub max_lifetime: Duration,
}

impl PoolSettings {
    /// Read settings from the environment.
    pub fn from_env() -> Self {
        let secs = |name: &str, default: u64| Duration::from_secs(env_or(name, default));
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/relations".to_string()),
            connections: (env_or("DB_MIN_CONNECTIONS", 2), env_or("DB_MAX_CONNECTIONS", 10)),
            acquire_timeout: secs("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout: secs("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime: secs("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

/// Error type for PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("Document store error: {0}")]
    Database(#[from] sqlx::Error),
    /// Patch target does not exist.
    #[error("Document not found: {collection}/{id}")]
    DocumentNotFound {
        /// Collection name.
        collection: String,
        /// Document id.
        id: DocumentId,
    },
}

/// PostgreSQL document store.
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Open a pool with the given settings.
    pub async fn connect(settings: PoolSettings) -> Result<Self, sqlx::Error> {
        let (min, max) = settings.connections;
        tracing::info!(
            min_connections = min,
            max_connections = max,
            acquire_timeout_ms = settings.acquire_timeout.as_millis() as u64,
            "Opening document store pool"
        );

        let pool = PgPoolOptions::new()
            .min_connections(min)
            .max_connections(max)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(settings.idle_timeout)
            .max_lifetime(settings.max_lifetime)
            .test_before_acquire(true)
            .connect(&settings.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Open a pool configured from the environment.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::connect(PoolSettings::from_env()).await
    }

    /// Create the documents table and index if missing.
    pub async fn ensure_schema(&self) -> Result<(), PostgresError> {
        sqlx::query(DOCUMENTS_TABLE_SCHEMA).execute(&self.pool).await?;
        sqlx::query(DOCUMENTS_INDEX_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn parse_document_row(row: &sqlx::postgres::PgRow) -> Result<Document, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let Json(fields): Json<Map<String, Value>> = row.try_get("fields")?;
        Ok(Document::new(id, fields))
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    type Error = PostgresError;

    async fn get_document(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, fields
            FROM documents
            WHERE collection = $1 AND id = $2
            "#
        )
        .bind(collection)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::parse_document_row).transpose()?)
    }

    async fn query_documents(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, fields
            FROM documents
            WHERE collection = $1
              AND (
                fields -> $2 = $3
                OR fields -> $2 @> jsonb_build_array($3)
                OR fields -> $2 -> 'id' = $3
                OR fields -> $2 @> jsonb_build_array(jsonb_build_object('id', $3))
              )
            ORDER BY id
            "#
        )
        .bind(collection)
        .bind(field)
        .bind(Json(value))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Self::parse_document_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(PostgresError::from)
    }

    async fn patch_document(
        &self,
        collection: &str,
        id: &DocumentId,
        patch: &FieldPatch,
    ) -> Result<(), Self::Error> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET fields = fields || $3, updated_at = now()
            WHERE collection = $1 AND id = $2
            "#
        )
        .bind(collection)
        .bind(id.as_str())
        .bind(Json(patch.as_map()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PostgresError::DocumentNotFound {
                collection: collection.to_string(),
                id: id.clone(),
            });
        }
        Ok(())
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<Document>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, fields
            FROM documents
            WHERE collection = $1
            ORDER BY id
            "#
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Self::parse_document_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(PostgresError::from)
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}
