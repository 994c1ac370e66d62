//! Batched embedding of a chunk stream into the chunk store.

use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt};
use tracing::{debug, info};
use uuid::Uuid;

use billdigest_core::{
    ChunkRepository, DocumentChunk, DocumentId, EmbeddedChunk, EmbeddingBackend,
    EmbeddingJobRepository, Error, JobProgress, Result,
};

/// What `embed_document` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedOutcome {
    /// Chunks already existed and `force` was not set.
    Skipped { existing: i64 },
    Embedded {
        chunks: i64,
        batches: usize,
        /// Highest `page_end` seen.
        pages_processed: i32,
        /// Chunks removed before re-embedding.
        replaced: u64,
    },
}

impl EmbedOutcome {
    pub fn chunk_count(&self) -> i64 {
        match self {
            Self::Skipped { existing } => *existing,
            Self::Embedded { chunks, .. } => *chunks,
        }
    }
}

/// Turns a chunk stream into persisted, embedded chunks while reporting
/// job progress.
pub struct EmbeddingBatcher {
    chunks: Arc<dyn ChunkRepository>,
    jobs: Arc<dyn EmbeddingJobRepository>,
    embedder: Arc<dyn EmbeddingBackend>,
}

impl EmbeddingBatcher {
    pub fn new(
        chunks: Arc<dyn ChunkRepository>,
        jobs: Arc<dyn EmbeddingJobRepository>,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            chunks,
            jobs,
            embedder,
        }
    }

    /// Embed and persist every chunk of `stream` in batches of `batch_size`.
    ///
    /// Without `force`, a document that already has chunks is left as is and
    /// the stream is not consumed. With `force`, existing chunks are deleted
    /// first. Any embedding or storage failure aborts the whole operation;
    /// batches already written stay written.
    pub async fn embed_document<S>(
        &self,
        doc: &DocumentId,
        stream: S,
        batch_size: usize,
        force: bool,
        job_id: Option<Uuid>,
    ) -> Result<EmbedOutcome>
    where
        S: Stream<Item = DocumentChunk> + Send,
    {
        let start = Instant::now();

        let replaced = if force {
            self.chunks.delete_for_document(doc).await?
        } else {
            let existing = self.chunks.count(doc).await?;
            if existing > 0 {
                info!(
                    subsystem = "jobs",
                    component = "embedder",
                    document = %doc,
                    existing,
                    "Document already embedded, skipping"
                );
                return Ok(EmbedOutcome::Skipped { existing });
            }
            0
        };
        if replaced > 0 {
            debug!(
                subsystem = "jobs",
                component = "embedder",
                document = %doc,
                replaced,
                "Deleted existing chunks before re-embedding"
            );
        }

        let mut batches = std::pin::pin!(stream.chunks(batch_size.max(1)));
        let mut dimension: Option<usize> = None;
        let mut total: i64 = 0;
        let mut batch_count = 0usize;
        let mut max_page = 0i32;

        while let Some(batch) = batches.next().await {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_texts(&texts).await?;

            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "Embedding backend returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            for vector in &vectors {
                let dim = vector.as_slice().len();
                match dimension {
                    None => dimension = Some(dim),
                    Some(expected) if expected != dim => {
                        return Err(Error::Embedding(format!(
                            "Embedding dimension changed from {} to {}",
                            expected, dim
                        )));
                    }
                    Some(_) => {}
                }
            }

            max_page = batch.iter().map(|c| c.page_end).fold(max_page, i32::max);
            let records: Vec<EmbeddedChunk> = batch
                .into_iter()
                .zip(vectors)
                .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
                .collect();

            self.chunks.upsert_batch(doc, &records).await?;
            total += records.len() as i64;
            batch_count += 1;

            if let Some(job_id) = job_id {
                self.jobs
                    .update_progress(
                        job_id,
                        &JobProgress::new()
                            .pages_processed(max_page)
                            .chunks_embedded(total as i32),
                    )
                    .await?;
            }

            debug!(
                subsystem = "jobs",
                component = "embedder",
                op = "embed_batch",
                document = %doc,
                batch = batch_count,
                chunk_count = records.len(),
                total,
                pages_processed = max_page,
                "Batch embedded"
            );
        }

        info!(
            subsystem = "jobs",
            component = "embedder",
            document = %doc,
            chunk_count = total,
            batches = batch_count,
            model = self.embedder.model_name(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Document embedded"
        );

        Ok(EmbedOutcome::Embedded {
            chunks: total,
            batches: batch_count,
            pages_processed: max_page,
            replaced,
        })
    }
}
