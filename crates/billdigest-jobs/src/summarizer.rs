//! Map-reduce summarization of embedded bills.
//!
//! The map phase summarizes each page bucket independently; the reduce phase
//! merges the bucket summaries into one six-section summary.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use billdigest_core::{
    defaults, BucketSpan, BucketSummary, ChunkRepository, DocumentId, EmbeddingJobRepository,
    Error, FinalSummary, GenerationBackend, JobProgress, Result, SummaryOutcome,
    SummaryRepository,
};

use crate::summary_parser::{
    extract_financial_impact, extract_provisions, map_prompt, parse_final_summary,
    reduce_context, reduce_prompt, truncate_head, truncate_middle, CHUNK_SEPARATOR,
};

/// Result of a map phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapReport {
    /// Buckets found among the document's chunks.
    pub buckets: usize,
    /// Buckets with a stored summary after this run.
    pub summarized: usize,
    /// Buckets whose generation failed and were skipped.
    pub failed: Vec<i32>,
}

pub struct HierarchicalSummarizer {
    chunks: Arc<dyn ChunkRepository>,
    summaries: Arc<dyn SummaryRepository>,
    jobs: Arc<dyn EmbeddingJobRepository>,
    generator: Arc<dyn GenerationBackend>,
    map_context_chars: usize,
    reduce_context_chars: usize,
}

impl HierarchicalSummarizer {
    pub fn new(
        chunks: Arc<dyn ChunkRepository>,
        summaries: Arc<dyn SummaryRepository>,
        jobs: Arc<dyn EmbeddingJobRepository>,
        generator: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            chunks,
            summaries,
            jobs,
            generator,
            map_context_chars: defaults::MAP_CONTEXT_CHARS,
            reduce_context_chars: defaults::REDUCE_CONTEXT_CHARS,
        }
    }

    /// Override the map and reduce input ceilings.
    pub fn with_context_limits(mut self, map_chars: usize, reduce_chars: usize) -> Self {
        self.map_context_chars = map_chars;
        self.reduce_context_chars = reduce_chars;
        self
    }

    async fn generate_nonempty(&self, prompt: &str) -> Result<String> {
        let text = self.generator.generate(prompt).await?;
        if text.trim().is_empty() {
            return Err(Error::Inference(
                "Generation backend returned an empty response".to_string(),
            ));
        }
        Ok(text)
    }

    /// Map phase: summarize every bucket of the document in ascending order.
    ///
    /// Summaries left over from buckets that no longer exist (after a forced
    /// re-embed with different bucketing) are deleted first. A document
    /// without chunks is otherwise a no-op. A bucket whose generation fails
    /// is logged and skipped, leaving it out of the reduce input. Storage
    /// errors abort.
    pub async fn summarize_buckets(
        &self,
        doc: &DocumentId,
        job_id: Option<Uuid>,
    ) -> Result<MapReport> {
        let start = Instant::now();
        let buckets = self.chunks.list_buckets(doc).await?;
        let mut report = MapReport {
            buckets: buckets.len(),
            ..MapReport::default()
        };

        let live: Vec<i32> = buckets.iter().map(|b| b.bucket_id).collect();
        let pruned = self.summaries.prune_bucket_summaries(doc, &live).await?;
        if pruned > 0 {
            debug!(
                subsystem = "jobs",
                component = "summarizer",
                op = "map",
                document = %doc,
                pruned,
                "Removed summaries of buckets that no longer exist"
            );
        }

        if buckets.is_empty() {
            debug!(
                subsystem = "jobs",
                component = "summarizer",
                op = "map",
                document = %doc,
                "No chunks, skipping map phase"
            );
            return Ok(report);
        }

        for span in &buckets {
            match self.summarize_bucket(doc, span).await? {
                Some(summary) => {
                    self.summaries.upsert_bucket_summary(&summary).await?;
                    report.summarized += 1;
                    if let Some(job_id) = job_id {
                        self.jobs
                            .update_progress(
                                job_id,
                                &JobProgress::new().map_summaries_done(report.summarized as i32),
                            )
                            .await?;
                    }
                }
                None => report.failed.push(span.bucket_id),
            }
        }

        info!(
            subsystem = "jobs",
            component = "summarizer",
            op = "map",
            document = %doc,
            buckets = report.buckets,
            summarized = report.summarized,
            failed = report.failed.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Map phase complete"
        );
        Ok(report)
    }

    /// Summarize one bucket, or `None` when generation failed.
    async fn summarize_bucket(
        &self,
        doc: &DocumentId,
        span: &BucketSpan,
    ) -> Result<Option<BucketSummary>> {
        let texts = self.chunks.bucket_texts(doc, span.bucket_id).await?;
        let joined = texts.join(CHUNK_SEPARATOR);
        if joined.len() > self.map_context_chars {
            debug!(
                subsystem = "jobs",
                component = "summarizer",
                document = %doc,
                bucket_id = span.bucket_id,
                len = joined.len(),
                limit = self.map_context_chars,
                "Truncating bucket text"
            );
        }
        let context = truncate_head(&joined, self.map_context_chars);
        let prompt = map_prompt(span, &context);

        let summary_text = match self.generate_nonempty(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "summarizer",
                    op = "map",
                    document = %doc,
                    bucket_id = span.bucket_id,
                    error = %e,
                    "Bucket summarization failed, skipping"
                );
                return Ok(None);
            }
        };

        Ok(Some(BucketSummary {
            document: doc.clone(),
            bucket_id: span.bucket_id,
            page_start: span.page_start,
            page_end: span.page_end,
            key_provisions: extract_provisions(&summary_text),
            financial_impact: extract_financial_impact(&summary_text),
            summary_text,
        }))
    }

    /// Reduce phase: merge bucket summaries into the final summary.
    ///
    /// Only summaries of buckets present in the current chunk set are merged.
    /// Fails with [`Error::NotFound`] when none exists.
    pub async fn summarize_final(
        &self,
        doc: &DocumentId,
        job_id: Option<Uuid>,
    ) -> Result<FinalSummary> {
        let start = Instant::now();
        let live: HashSet<i32> = self
            .chunks
            .list_buckets(doc)
            .await?
            .into_iter()
            .map(|b| b.bucket_id)
            .collect();
        let buckets: Vec<BucketSummary> = self
            .summaries
            .list_bucket_summaries(doc)
            .await?
            .into_iter()
            .filter(|b| live.contains(&b.bucket_id))
            .collect();
        if buckets.is_empty() {
            return Err(Error::NotFound(format!(
                "No bucket summaries for {}; run the map phase first",
                doc
            )));
        }

        let combined = reduce_context(
            buckets
                .iter()
                .map(|b| (b.page_start, b.page_end, b.summary_text.as_str())),
        );
        let context = truncate_middle(&combined, self.reduce_context_chars);
        let response = self.generate_nonempty(&reduce_prompt(doc, &context)).await?;

        let summary = parse_final_summary(&response);
        self.summaries.upsert_final_summary(doc, &summary).await?;

        if let Some(job_id) = job_id {
            self.jobs
                .update_progress(job_id, &JobProgress::new().reduce_done(true))
                .await?;
        }

        info!(
            subsystem = "jobs",
            component = "summarizer",
            op = "reduce",
            document = %doc,
            buckets = buckets.len(),
            importance = summary.importance,
            duration_ms = start.elapsed().as_millis() as u64,
            "Final summary stored"
        );
        Ok(summary)
    }

    /// Cached final summary, or a fresh map and reduce when missing or forced.
    pub async fn summarize_document(
        &self,
        doc: &DocumentId,
        force: bool,
    ) -> Result<SummaryOutcome> {
        if !force {
            if let Some(stored) = self.summaries.get_final_summary(doc).await? {
                debug!(
                    subsystem = "jobs",
                    component = "summarizer",
                    document = %doc,
                    "Returning cached summary"
                );
                return Ok(SummaryOutcome {
                    summary: stored.summary,
                    cached: true,
                });
            }
        }

        if self.chunks.count(doc).await? == 0 {
            return Err(Error::NotFound(format!(
                "Bill {} has not been embedded yet",
                doc
            )));
        }

        self.summarize_buckets(doc, None).await?;
        let summary = self.summarize_final(doc, None).await?;
        Ok(SummaryOutcome {
            summary,
            cached: false,
        })
    }
}
