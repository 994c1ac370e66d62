//! Core traits for billdigest abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// CHUNK STORE
// =============================================================================

/// Persistence for embedded chunks.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Number of persisted chunks for a document.
    async fn count(&self, doc: &DocumentId) -> Result<i64>;

    /// Insert or replace a batch of chunks keyed by (document, chunk_index).
    ///
    /// The whole batch is written in one transaction.
    async fn upsert_batch(&self, doc: &DocumentId, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// Delete every chunk of a document, returning the number removed.
    async fn delete_for_document(&self, doc: &DocumentId) -> Result<u64>;

    /// Distinct buckets of a document, ascending, with aggregated page ranges.
    async fn list_buckets(&self, doc: &DocumentId) -> Result<Vec<BucketSpan>>;

    /// Texts of one bucket's chunks ordered by chunk_index.
    async fn bucket_texts(&self, doc: &DocumentId, bucket_id: i32) -> Result<Vec<String>>;

    /// The `limit` chunks of a document nearest to `query`, nearest first.
    async fn nearest(
        &self,
        doc: &DocumentId,
        query: &Vector,
        limit: i64,
    ) -> Result<Vec<RetrievedChunk>>;
}

// =============================================================================
// SUMMARY STORE
// =============================================================================

/// Persistence for bucket and final summaries.
#[async_trait]
pub trait SummaryRepository: Send + Sync {
    /// Insert or replace the summary for (document, bucket_id).
    async fn upsert_bucket_summary(&self, summary: &BucketSummary) -> Result<()>;

    /// Delete bucket summaries whose bucket_id is not in `keep`, returning
    /// the number removed.
    async fn prune_bucket_summaries(&self, doc: &DocumentId, keep: &[i32]) -> Result<u64>;

    /// All bucket summaries of a document ordered by bucket_id.
    async fn list_bucket_summaries(&self, doc: &DocumentId) -> Result<Vec<BucketSummary>>;

    /// Insert or replace the final summary of a document.
    async fn upsert_final_summary(&self, doc: &DocumentId, summary: &FinalSummary) -> Result<()>;

    async fn get_final_summary(&self, doc: &DocumentId) -> Result<Option<StoredSummary>>;
}

// =============================================================================
// JOB TRACKER
// =============================================================================

/// Persisted state machine for embedding jobs.
#[async_trait]
pub trait EmbeddingJobRepository: Send + Sync {
    /// Insert a new pending job.
    async fn create(&self, doc: &DocumentId, total_pages: Option<i32>) -> Result<Uuid>;

    /// Most recent pending/processing job for `doc` started within `window`.
    ///
    /// Check-then-create through this method is not atomic across callers.
    async fn get_or_reuse(&self, doc: &DocumentId, window: chrono::Duration)
        -> Result<Option<Uuid>>;

    /// Apply a progress patch (see [`EmbeddingJob::apply_progress`]).
    ///
    /// A patch against a terminal job is ignored.
    async fn update_progress(&self, job_id: Uuid, progress: &JobProgress) -> Result<()>;

    /// Mark the job completed or failed and stamp `completed_at`.
    async fn complete(&self, job_id: Uuid, success: bool, error: Option<&str>) -> Result<()>;

    async fn get_status(&self, job_id: Uuid) -> Result<Option<EmbeddingJob>>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for generating embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns one vector per input text, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Backend for text generation (LLM).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text given a prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate text with system context.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}
