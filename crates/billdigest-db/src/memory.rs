//! In-memory implementation of every repository trait.
//!
//! Always compiled so that downstream crates can drive the pipeline in tests
//! and dry runs without a database. Semantics match the PostgreSQL
//! repositories: the same upsert keys, ordering and job transition rules.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use billdigest_core::{
    new_v7, BucketSpan, BucketSummary, ChunkRepository, DocumentId, EmbeddedChunk, EmbeddingJob,
    EmbeddingJobRepository, Error, FinalSummary, JobProgress, Result, RetrievedChunk,
    StoredSummary, SummaryRepository, Vector,
};

#[derive(Default)]
struct State {
    chunks: HashMap<DocumentId, BTreeMap<i32, EmbeddedChunk>>,
    bucket_summaries: HashMap<DocumentId, BTreeMap<i32, BucketSummary>>,
    final_summaries: HashMap<DocumentId, StoredSummary>,
    jobs: HashMap<Uuid, EmbeddingJob>,
}

/// Thread-safe in-memory chunk, summary and job store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All persisted chunks of a document ordered by chunk_index.
    pub async fn chunks(&self, doc: &DocumentId) -> Vec<EmbeddedChunk> {
        let state = self.state.read().await;
        state
            .chunks
            .get(doc)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Move a job's start time, e.g. to simulate an abandoned job.
    pub async fn set_job_started_at(&self, job_id: Uuid, started_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        job.started_at = started_at;
        Ok(())
    }
}

/// Cosine distance in `[0, 2]`; 1.0 when either vector is zero.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let mag_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (mag_a * mag_b)
}

#[async_trait]
impl ChunkRepository for MemoryStore {
    async fn count(&self, doc: &DocumentId) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.chunks.get(doc).map(|m| m.len() as i64).unwrap_or(0))
    }

    async fn upsert_batch(&self, doc: &DocumentId, chunks: &[EmbeddedChunk]) -> Result<()> {
        let mut state = self.state.write().await;
        let rows = state.chunks.entry(doc.clone()).or_default();
        for embedded in chunks {
            rows.insert(embedded.chunk.chunk_index, embedded.clone());
        }
        Ok(())
    }

    async fn delete_for_document(&self, doc: &DocumentId) -> Result<u64> {
        let mut state = self.state.write().await;
        Ok(state
            .chunks
            .remove(doc)
            .map(|m| m.len() as u64)
            .unwrap_or(0))
    }

    async fn list_buckets(&self, doc: &DocumentId) -> Result<Vec<BucketSpan>> {
        let state = self.state.read().await;
        let mut spans: BTreeMap<i32, BucketSpan> = BTreeMap::new();
        if let Some(rows) = state.chunks.get(doc) {
            for embedded in rows.values() {
                let chunk = &embedded.chunk;
                let span = spans.entry(chunk.bucket_id).or_insert(BucketSpan {
                    bucket_id: chunk.bucket_id,
                    page_start: chunk.page_start,
                    page_end: chunk.page_end,
                    chunk_count: 0,
                });
                span.page_start = span.page_start.min(chunk.page_start);
                span.page_end = span.page_end.max(chunk.page_end);
                span.chunk_count += 1;
            }
        }
        Ok(spans.into_values().collect())
    }

    async fn bucket_texts(&self, doc: &DocumentId, bucket_id: i32) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .chunks
            .get(doc)
            .map(|rows| {
                rows.values()
                    .filter(|e| e.chunk.bucket_id == bucket_id)
                    .map(|e| e.chunk.text.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn nearest(
        &self,
        doc: &DocumentId,
        query: &Vector,
        limit: i64,
    ) -> Result<Vec<RetrievedChunk>> {
        let state = self.state.read().await;
        let Some(rows) = state.chunks.get(doc) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<RetrievedChunk> = rows
            .values()
            .map(|e| RetrievedChunk {
                chunk: e.chunk.clone(),
                distance: cosine_distance(e.embedding.as_slice(), query.as_slice()),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }
}

#[async_trait]
impl SummaryRepository for MemoryStore {
    async fn upsert_bucket_summary(&self, summary: &BucketSummary) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .bucket_summaries
            .entry(summary.document.clone())
            .or_default()
            .insert(summary.bucket_id, summary.clone());
        Ok(())
    }

    async fn prune_bucket_summaries(&self, doc: &DocumentId, keep: &[i32]) -> Result<u64> {
        let mut state = self.state.write().await;
        let Some(summaries) = state.bucket_summaries.get_mut(doc) else {
            return Ok(0);
        };
        let before = summaries.len();
        summaries.retain(|bucket_id, _| keep.contains(bucket_id));
        Ok((before - summaries.len()) as u64)
    }

    async fn list_bucket_summaries(&self, doc: &DocumentId) -> Result<Vec<BucketSummary>> {
        let state = self.state.read().await;
        Ok(state
            .bucket_summaries
            .get(doc)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_final_summary(&self, doc: &DocumentId, summary: &FinalSummary) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let created_at = state
            .final_summaries
            .get(doc)
            .map(|s| s.created_at)
            .unwrap_or(now);
        state.final_summaries.insert(
            doc.clone(),
            StoredSummary {
                document: doc.clone(),
                summary: summary.clone(),
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get_final_summary(&self, doc: &DocumentId) -> Result<Option<StoredSummary>> {
        let state = self.state.read().await;
        Ok(state.final_summaries.get(doc).cloned())
    }
}

#[async_trait]
impl EmbeddingJobRepository for MemoryStore {
    async fn create(&self, doc: &DocumentId, total_pages: Option<i32>) -> Result<Uuid> {
        let mut state = self.state.write().await;
        let job = EmbeddingJob::new(new_v7(), doc.clone(), total_pages);
        let id = job.id;
        state.jobs.insert(id, job);
        Ok(id)
    }

    async fn get_or_reuse(
        &self,
        doc: &DocumentId,
        window: chrono::Duration,
    ) -> Result<Option<Uuid>> {
        let state = self.state.read().await;
        let since = Utc::now() - window;
        Ok(state
            .jobs
            .values()
            .filter(|j| &j.document == doc && j.status.is_active() && j.started_at > since)
            .max_by_key(|j| (j.started_at, j.id))
            .map(|j| j.id))
    }

    async fn update_progress(&self, job_id: Uuid, progress: &JobProgress) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.apply_progress(progress);
        }
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, success: bool, error: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        job.complete(success, error, Utc::now());
        Ok(())
    }

    async fn get_status(&self, job_id: Uuid) -> Result<Option<EmbeddingJob>> {
        let state = self.state.read().await;
        Ok(state.jobs.get(&job_id).cloned())
    }
}
