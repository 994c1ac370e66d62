//! Job orchestration for the embed, map and reduce pipeline.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use billdigest_core::{
    defaults, ChunkRepository, DocumentId, EmbeddingBackend, EmbeddingJobRepository, Error,
    GenerationBackend, JobProgress, JobStatusReport, Result, SummaryRepository,
};
use billdigest_db::{Database, MemoryStore};

use crate::adapters::{download_client, spawn_chunk_producer, PdfSource};
use crate::config::PipelineConfig;
use crate::embedder::{EmbedOutcome, EmbeddingBatcher};
use crate::rag::RagQueryEngine;
use crate::summarizer::HierarchicalSummarizer;

/// The repositories a pipeline reads and writes.
#[derive(Clone)]
pub struct Stores {
    pub chunks: Arc<dyn ChunkRepository>,
    pub summaries: Arc<dyn SummaryRepository>,
    pub jobs: Arc<dyn EmbeddingJobRepository>,
}

impl Stores {
    pub fn from_database(db: &Database) -> Self {
        Self {
            chunks: db.chunks.clone(),
            summaries: db.summaries.clone(),
            jobs: db.jobs.clone(),
        }
    }

    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            chunks: store.clone(),
            summaries: store.clone(),
            jobs: store,
        }
    }
}

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Embed,
    Map,
    Reduce,
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Embed => "embed",
            Self::Map => "map",
            Self::Reduce => "reduce",
        })
    }
}

/// Event emitted by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A job began executing.
    JobStarted { job_id: Uuid, document: DocumentId },
    /// A stage finished.
    PhaseCompleted { job_id: Uuid, phase: PipelinePhase },
    /// All stages finished and the job is completed.
    JobCompleted { job_id: Uuid, document: DocumentId },
    /// The job was marked failed.
    JobFailed {
        job_id: Uuid,
        document: DocumentId,
        error: String,
    },
}

/// Result of [`BillPipeline::start`].
pub enum StartOutcome {
    /// A recent active job for the document exists; nothing was started.
    AlreadyRunning(Uuid),
    /// A new job runs in the background.
    Started {
        job_id: Uuid,
        handle: JoinHandle<Result<()>>,
    },
}

impl StartOutcome {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::AlreadyRunning(job_id) => *job_id,
            Self::Started { job_id, .. } => *job_id,
        }
    }
}

/// Runs embed, map and reduce for one bill and tracks it as an embedding job.
#[derive(Clone)]
pub struct BillPipeline {
    stores: Stores,
    embedder: Arc<dyn EmbeddingBackend>,
    generator: Arc<dyn GenerationBackend>,
    config: PipelineConfig,
    http: reqwest::Client,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl BillPipeline {
    pub fn new(
        stores: Stores,
        embedder: Arc<dyn EmbeddingBackend>,
        generator: Arc<dyn GenerationBackend>,
        config: PipelineConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_CHANNEL_CAPACITY);
        Self {
            stores,
            embedder,
            generator,
            config,
            http: download_client(Duration::from_secs(defaults::PDF_DOWNLOAD_TIMEOUT_SECS)),
            event_tx,
        }
    }

    /// Use a preconfigured HTTP client for PDF downloads.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Subscribe to pipeline events.
    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    pub fn batcher(&self) -> EmbeddingBatcher {
        EmbeddingBatcher::new(
            self.stores.chunks.clone(),
            self.stores.jobs.clone(),
            self.embedder.clone(),
        )
    }

    pub fn summarizer(&self) -> HierarchicalSummarizer {
        HierarchicalSummarizer::new(
            self.stores.chunks.clone(),
            self.stores.summaries.clone(),
            self.stores.jobs.clone(),
            self.generator.clone(),
        )
        .with_context_limits(
            self.config.map_context_chars,
            self.config.reduce_context_chars,
        )
    }

    pub fn rag(&self) -> RagQueryEngine {
        RagQueryEngine::new(
            self.stores.chunks.clone(),
            self.embedder.clone(),
            self.generator.clone(),
        )
    }

    /// Persisted chunk count; greater than zero means embedded.
    pub async fn chunk_count(&self, doc: &DocumentId) -> Result<i64> {
        self.stores.chunks.count(doc).await
    }

    pub async fn job_status(&self, job_id: Uuid) -> Result<JobStatusReport> {
        self.stores
            .jobs
            .get_status(job_id)
            .await?
            .map(|job| JobStatusReport::from(&job))
            .ok_or(Error::JobNotFound(job_id))
    }

    /// Start the pipeline as a background task, unless a recent active job
    /// for the same document exists.
    ///
    /// The reuse check and the job insert are separate steps: two concurrent
    /// callers can both start a pipeline for the same document. Their writes
    /// are upserts on the same keys.
    pub async fn start(
        &self,
        doc: DocumentId,
        source: PdfSource,
        force: bool,
    ) -> Result<StartOutcome> {
        if let Some(job_id) = self
            .stores
            .jobs
            .get_or_reuse(&doc, self.config.reuse_window)
            .await?
        {
            info!(
                subsystem = "jobs",
                component = "pipeline",
                document = %doc,
                %job_id,
                "Reusing active job"
            );
            return Ok(StartOutcome::AlreadyRunning(job_id));
        }

        let job_id = self.stores.jobs.create(&doc, None).await?;
        let this = self.clone();
        let handle =
            tokio::spawn(async move { this.execute(job_id, &doc, &source, force).await });

        Ok(StartOutcome::Started { job_id, handle })
    }

    /// Run the pipeline in the caller's task under `timeout`.
    ///
    /// On expiry the in-flight work is abandoned, the job is marked failed
    /// and [`Error::Timeout`] is returned. Chunks and summaries written
    /// before the deadline are kept.
    pub async fn run_to_completion(
        &self,
        doc: &DocumentId,
        source: &PdfSource,
        force: bool,
        timeout: Duration,
    ) -> Result<Uuid> {
        let job_id = self.stores.jobs.create(doc, None).await?;

        match tokio::time::timeout(timeout, self.execute(job_id, doc, source, force)).await {
            Ok(result) => result.map(|_| job_id),
            Err(_) => {
                let message = format!(
                    "Job failed: pipeline timed out after {}s",
                    timeout.as_secs_f64()
                );
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    document = %doc,
                    %job_id,
                    timeout_secs = timeout.as_secs_f64(),
                    "Pipeline timed out"
                );
                self.stores
                    .jobs
                    .complete(job_id, false, Some(&message))
                    .await?;
                self.emit(PipelineEvent::JobFailed {
                    job_id,
                    document: doc.clone(),
                    error: message.clone(),
                });
                Err(Error::Timeout(message))
            }
        }
    }

    /// Execute every stage for an existing job and record the outcome.
    ///
    /// This is where stage errors become a failed job.
    pub async fn execute(
        &self,
        job_id: Uuid,
        doc: &DocumentId,
        source: &PdfSource,
        force: bool,
    ) -> Result<()> {
        let start = Instant::now();
        info!(
            subsystem = "jobs",
            component = "pipeline",
            document = %doc,
            %job_id,
            source = %source,
            force,
            "Job started"
        );
        self.emit(PipelineEvent::JobStarted {
            job_id,
            document: doc.clone(),
        });

        match self.run_stages(job_id, doc, source, force).await {
            Ok(()) => {
                self.stores.jobs.complete(job_id, true, None).await?;
                info!(
                    subsystem = "jobs",
                    component = "pipeline",
                    document = %doc,
                    %job_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
                self.emit(PipelineEvent::JobCompleted {
                    job_id,
                    document: doc.clone(),
                });
                Ok(())
            }
            Err(e) => {
                let message = format!("Job failed: {}", e);
                error!(
                    subsystem = "jobs",
                    component = "pipeline",
                    document = %doc,
                    %job_id,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed"
                );
                if let Err(db_err) = self
                    .stores
                    .jobs
                    .complete(job_id, false, Some(&message))
                    .await
                {
                    error!(
                        subsystem = "jobs",
                        component = "pipeline",
                        %job_id,
                        error = %db_err,
                        "Failed to mark job as failed"
                    );
                }
                self.emit(PipelineEvent::JobFailed {
                    job_id,
                    document: doc.clone(),
                    error: message,
                });
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        job_id: Uuid,
        doc: &DocumentId,
        source: &PdfSource,
        force: bool,
    ) -> Result<()> {
        self.embed_stage(job_id, doc, source, force).await?;
        self.emit(PipelineEvent::PhaseCompleted {
            job_id,
            phase: PipelinePhase::Embed,
        });

        let summarizer = self.summarizer();
        summarizer.summarize_buckets(doc, Some(job_id)).await?;
        self.emit(PipelineEvent::PhaseCompleted {
            job_id,
            phase: PipelinePhase::Map,
        });

        summarizer.summarize_final(doc, Some(job_id)).await?;
        self.emit(PipelineEvent::PhaseCompleted {
            job_id,
            phase: PipelinePhase::Reduce,
        });
        Ok(())
    }

    async fn embed_stage(
        &self,
        job_id: Uuid,
        doc: &DocumentId,
        source: &PdfSource,
        force: bool,
    ) -> Result<EmbedOutcome> {
        if !force {
            let existing = self.stores.chunks.count(doc).await?;
            if existing > 0 {
                return self.skip_embed(job_id, doc, existing).await;
            }
        }

        let fetched = source.fetch(&self.http).await?;
        let producer = spawn_chunk_producer(
            fetched.path().to_path_buf(),
            self.config.chunker.clone(),
            self.config.channel_capacity,
        )
        .await?;

        let total_pages = producer.total_pages as i32;
        self.stores
            .jobs
            .update_progress(job_id, &JobProgress::new().total_pages(total_pages))
            .await?;

        let outcome = self
            .batcher()
            .embed_document(
                doc,
                producer.stream,
                self.config.batch_size,
                force,
                Some(job_id),
            )
            .await?;
        let produced = producer
            .handle
            .await
            .map_err(|e| Error::Internal(format!("Chunk producer failed: {}", e)))?;

        match &outcome {
            EmbedOutcome::Skipped { existing } => {
                self.stores
                    .jobs
                    .update_progress(
                        job_id,
                        &JobProgress::new()
                            .pages_processed(total_pages)
                            .chunks_embedded(*existing as i32),
                    )
                    .await?;
            }
            EmbedOutcome::Embedded { chunks, .. } => {
                if *chunks != produced as i64 {
                    return Err(Error::Internal(format!(
                        "Embedded {} chunks but the reader produced {}",
                        chunks, produced
                    )));
                }
                // Trailing blank pages produce no chunk but were still read.
                self.stores
                    .jobs
                    .update_progress(job_id, &JobProgress::new().pages_processed(total_pages))
                    .await?;
            }
        }

        info!(
            subsystem = "jobs",
            component = "pipeline",
            document = %doc,
            %job_id,
            total_pages,
            chunk_count = outcome.chunk_count(),
            temporary_pdf = fetched.is_temporary(),
            "Embed stage complete"
        );
        Ok(outcome)
    }

    /// Record an already-embedded document as fully processed without
    /// touching the source. The page total comes from the stored chunks.
    async fn skip_embed(
        &self,
        job_id: Uuid,
        doc: &DocumentId,
        existing: i64,
    ) -> Result<EmbedOutcome> {
        let total_pages = self
            .stores
            .chunks
            .list_buckets(doc)
            .await?
            .iter()
            .map(|b| b.page_end)
            .max()
            .unwrap_or(0);
        self.stores
            .jobs
            .update_progress(
                job_id,
                &JobProgress::new()
                    .total_pages(total_pages)
                    .pages_processed(total_pages)
                    .chunks_embedded(existing as i32),
            )
            .await?;

        info!(
            subsystem = "jobs",
            component = "pipeline",
            document = %doc,
            %job_id,
            chunk_count = existing,
            "Chunks already stored, skipping fetch and embed"
        );
        Ok(EmbedOutcome::Skipped { existing })
    }
}
