//! # billdigest-db
//!
//! PostgreSQL + pgvector persistence for billdigest.
//!
//! This crate provides:
//! - Connection pool management
//! - Repositories for chunks, bucket/final summaries and embedding jobs
//! - An in-memory store implementing the same traits
//! - Streaming chunk assembly over a page sequence
//!
//! ## Example
//!
//! ```rust,ignore
//! use billdigest_db::{ChunkRepository, Database, DocumentId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/billdigest").await?;
//!     let doc = DocumentId::new(119, "hr", "1");
//!     println!("{} chunks", db.chunks.count(&doc).await?);
//!     Ok(())
//! }
//! ```
pub mod chunking;
pub mod chunks;
pub mod jobs;
pub mod memory;
pub mod pool;
pub mod summaries;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use billdigest_core::*;

pub use chunking::{ChunkAssembler, ChunkerConfig};
pub use chunks::PgChunkRepository;
pub use jobs::PgEmbeddingJobRepository;
pub use memory::MemoryStore;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use summaries::PgSummaryRepository;

/// Database handle aggregating all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Embedded chunk store.
    pub chunks: std::sync::Arc<PgChunkRepository>,
    /// Bucket and final summary store.
    pub summaries: std::sync::Arc<PgSummaryRepository>,
    /// Embedding job tracker.
    pub jobs: std::sync::Arc<PgEmbeddingJobRepository>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            chunks: std::sync::Arc::new(PgChunkRepository::new(pool.clone())),
            summaries: std::sync::Arc::new(PgSummaryRepository::new(pool.clone())),
            jobs: std::sync::Arc::new(PgEmbeddingJobRepository::new(pool.clone())),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
