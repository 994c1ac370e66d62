//! Core data models for billdigest.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

pub use pgvector::Vector;

// =============================================================================
// DOCUMENT IDENTITY
// =============================================================================

/// Identifies one bill: congress number, bill type and bill number.
///
/// `bill_type` is always stored lowercased so that `HR` and `hr` address
/// the same rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId {
    pub congress: i32,
    pub bill_type: String,
    pub bill_number: String,
}

impl DocumentId {
    pub fn new(congress: i32, bill_type: &str, bill_number: &str) -> Self {
        Self {
            congress,
            bill_type: bill_type.trim().to_lowercase(),
            bill_number: bill_number.trim().to_string(),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.congress, self.bill_type, self.bill_number)
    }
}

impl FromStr for DocumentId {
    type Err = Error;

    /// Parses `congress/bill_type/bill_number`, e.g. `119/hr/1234`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.len() != 3 {
            return Err(Error::InvalidInput(format!(
                "expected congress/bill_type/bill_number, got '{}'",
                s
            )));
        }
        let congress = parts[0]
            .trim()
            .parse::<i32>()
            .map_err(|_| Error::InvalidInput(format!("invalid congress '{}'", parts[0])))?;
        if congress <= 0 {
            return Err(Error::InvalidInput(format!(
                "congress must be positive, got {}",
                congress
            )));
        }
        if parts[1].trim().is_empty() || parts[2].trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "bill type and number must be non-empty in '{}'",
                s
            )));
        }
        Ok(Self::new(congress, parts[1], parts[2]))
    }
}

// =============================================================================
// PAGES AND CHUNKS
// =============================================================================

/// One page of cleaned text, 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

/// A contiguous span of document text prepared for embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Dense, 0-based position within the document.
    pub chunk_index: i32,
    pub text: String,
    pub page_start: i32,
    pub page_end: i32,
    pub bucket_id: i32,
}

impl DocumentChunk {
    /// Inline citation marker for this chunk's page range, e.g. `[pp. 12-15]`.
    pub fn citation(&self) -> String {
        format!("[pp. {}-{}]", self.page_start, self.page_end)
    }
}

/// A chunk paired with its embedding vector, ready to persist.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: DocumentChunk,
    pub embedding: Vector,
}

/// A chunk returned by nearest-neighbor retrieval.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: DocumentChunk,
    /// Cosine distance to the query (smaller is nearer).
    pub distance: f64,
}

/// Aggregate page range of one bucket's chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpan {
    pub bucket_id: i32,
    pub page_start: i32,
    pub page_end: i32,
    pub chunk_count: i64,
}

/// Maps a chunk's first page to its bucket.
pub fn bucket_for_page(page_start: u32, bucket_pages: u32) -> u32 {
    page_start.saturating_sub(1) / bucket_pages.max(1)
}

// =============================================================================
// SUMMARIES
// =============================================================================

/// Structured summary of one bucket, produced by the map phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub document: DocumentId,
    pub bucket_id: i32,
    pub page_start: i32,
    pub page_end: i32,
    pub summary_text: String,
    pub key_provisions: Vec<String>,
    pub financial_impact: Option<String>,
}

/// Document-level summary produced by the reduce phase.
///
/// Serialized field names are the stable contract consumed by API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalSummary {
    /// Full summary text, kept verbatim.
    pub tldr: String,
    pub key_points: Vec<String>,
    pub financial_info: String,
    /// 1 (routine) to 5 (highly significant).
    pub importance: u8,
    pub reading_time: String,
}

/// A persisted final summary with its timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSummary {
    pub document: DocumentId,
    pub summary: FinalSummary,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A final summary plus whether it came from the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryOutcome {
    #[serde(flatten)]
    pub summary: FinalSummary,
    pub cached: bool,
}

// =============================================================================
// EMBEDDING JOBS
// =============================================================================

/// Status of an embedding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs never change status again through progress updates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown job status '{}'", other))),
        }
    }
}

/// One tracked embed + summarize pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingJob {
    pub id: Uuid,
    pub document: DocumentId,
    pub status: JobStatus,
    pub total_pages: Option<i32>,
    pub pages_processed: i32,
    pub chunks_embedded: i32,
    pub map_summaries_done: i32,
    pub reduce_done: bool,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EmbeddingJob {
    /// A fresh pending job.
    pub fn new(id: Uuid, document: DocumentId, total_pages: Option<i32>) -> Self {
        Self {
            id,
            document,
            status: JobStatus::Pending,
            total_pages,
            pages_processed: 0,
            chunks_embedded: 0,
            map_summaries_done: 0,
            reduce_done: false,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Apply a progress patch.
    ///
    /// Terminal jobs are left untouched and `false` is returned. Otherwise the
    /// status becomes `processing`, `total_pages` is overwritten when given, and
    /// every counter only moves forward.
    pub fn apply_progress(&mut self, progress: &JobProgress) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Processing;
        if let Some(total) = progress.total_pages {
            self.total_pages = Some(total);
        }
        if let Some(pages) = progress.pages_processed {
            self.pages_processed = self.pages_processed.max(pages);
        }
        if let Some(chunks) = progress.chunks_embedded {
            self.chunks_embedded = self.chunks_embedded.max(chunks);
        }
        if let Some(done) = progress.map_summaries_done {
            self.map_summaries_done = self.map_summaries_done.max(done);
        }
        if let Some(reduce) = progress.reduce_done {
            self.reduce_done = self.reduce_done || reduce;
        }
        true
    }

    /// Move to a terminal status. Not guarded: a second call overwrites the first.
    pub fn complete(&mut self, success: bool, error: Option<&str>, at: DateTime<Utc>) {
        self.status = if success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.completed_at = Some(at);
        self.error_message = if success {
            None
        } else {
            error.map(str::to_string)
        };
    }

    pub fn percentage(&self) -> u8 {
        progress_percentage(self.pages_processed, self.total_pages)
    }
}

/// Partial update of a job's progress fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub total_pages: Option<i32>,
    pub pages_processed: Option<i32>,
    pub chunks_embedded: Option<i32>,
    pub map_summaries_done: Option<i32>,
    pub reduce_done: Option<bool>,
}

impl JobProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_pages(mut self, n: i32) -> Self {
        self.total_pages = Some(n);
        self
    }

    pub fn pages_processed(mut self, n: i32) -> Self {
        self.pages_processed = Some(n);
        self
    }

    pub fn chunks_embedded(mut self, n: i32) -> Self {
        self.chunks_embedded = Some(n);
        self
    }

    pub fn map_summaries_done(mut self, n: i32) -> Self {
        self.map_summaries_done = Some(n);
        self
    }

    pub fn reduce_done(mut self, done: bool) -> Self {
        self.reduce_done = Some(done);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Integer percentage of pages processed, 0 when the total is unknown or zero.
pub fn progress_percentage(pages_processed: i32, total_pages: Option<i32>) -> u8 {
    match total_pages {
        Some(total) if total > 0 => {
            let pct = (i64::from(pages_processed.max(0)) * 100) / i64::from(total);
            pct.min(100) as u8
        }
        _ => 0,
    }
}

/// Job record as reported to polling clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusReport {
    pub job_id: Uuid,
    pub congress: i32,
    pub bill_type: String,
    pub bill_number: String,
    pub status: JobStatus,
    pub total_pages: Option<i32>,
    pub pages_processed: i32,
    pub chunks_embedded: i32,
    pub map_summaries_done: i32,
    pub reduce_done: bool,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub percentage: u8,
}

impl From<&EmbeddingJob> for JobStatusReport {
    fn from(job: &EmbeddingJob) -> Self {
        Self {
            job_id: job.id,
            congress: job.document.congress,
            bill_type: job.document.bill_type.clone(),
            bill_number: job.document.bill_number.clone(),
            status: job.status,
            total_pages: job.total_pages,
            pages_processed: job.pages_processed,
            chunks_embedded: job.chunks_embedded,
            map_summaries_done: job.map_summaries_done,
            reduce_done: job.reduce_done,
            error_message: job.error_message.clone(),
            started_at: job.started_at,
            completed_at: job.completed_at,
            percentage: job.percentage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> DocumentId {
        DocumentId::new(119, "HR", "1234")
    }

    #[test]
    fn test_document_id_normalizes_bill_type() {
        let id = DocumentId::new(119, " HR ", " 1234 ");
        assert_eq!(id.bill_type, "hr");
        assert_eq!(id.bill_number, "1234");
        assert_eq!(id.to_string(), "119/hr/1234");
    }

    #[test]
    fn test_document_id_parse() {
        let id: DocumentId = "118/S/42".parse().unwrap();
        assert_eq!(id, DocumentId::new(118, "s", "42"));
    }

    #[test]
    fn test_document_id_parse_rejects_malformed() {
        assert!("118/s".parse::<DocumentId>().is_err());
        assert!("abc/s/42".parse::<DocumentId>().is_err());
        assert!("118//42".parse::<DocumentId>().is_err());
        assert!("0/hr/1".parse::<DocumentId>().is_err());
    }

    #[test]
    fn test_bucket_for_page() {
        assert_eq!(bucket_for_page(1, 50), 0);
        assert_eq!(bucket_for_page(50, 50), 0);
        assert_eq!(bucket_for_page(51, 50), 1);
        assert_eq!(bucket_for_page(3001, 50), 60);
    }

    #[test]
    fn test_chunk_citation() {
        let chunk = DocumentChunk {
            chunk_index: 0,
            text: "x".to_string(),
            page_start: 12,
            page_end: 15,
            bucket_id: 0,
        };
        assert_eq!(chunk.citation(), "[pp. 12-15]");
    }

    #[test]
    fn test_job_status_round_trip_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_progress_moves_pending_to_processing() {
        let mut job = EmbeddingJob::new(Uuid::nil(), doc(), None);
        assert!(job.apply_progress(&JobProgress::new().pages_processed(10)));
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.pages_processed, 10);
    }

    #[test]
    fn test_progress_counters_never_regress() {
        let mut job = EmbeddingJob::new(Uuid::nil(), doc(), Some(100));
        job.apply_progress(&JobProgress::new().pages_processed(40).chunks_embedded(12));
        job.apply_progress(&JobProgress::new().pages_processed(20).chunks_embedded(5));
        assert_eq!(job.pages_processed, 40);
        assert_eq!(job.chunks_embedded, 12);

        job.apply_progress(&JobProgress::new().reduce_done(true));
        job.apply_progress(&JobProgress::new().reduce_done(false));
        assert!(job.reduce_done);
    }

    #[test]
    fn test_progress_ignored_on_terminal_job() {
        let mut job = EmbeddingJob::new(Uuid::nil(), doc(), None);
        job.complete(true, None, Utc::now());
        assert!(!job.apply_progress(&JobProgress::new().pages_processed(5)));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.pages_processed, 0);
    }

    #[test]
    fn test_complete_overwrites_previous_completion() {
        let mut job = EmbeddingJob::new(Uuid::nil(), doc(), None);
        job.complete(true, None, Utc::now());
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error_message.is_none());

        job.complete(false, Some("x"), Utc::now());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("x"));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_complete_success_clears_error() {
        let mut job = EmbeddingJob::new(Uuid::nil(), doc(), None);
        job.complete(false, Some("boom"), Utc::now());
        job.complete(true, Some("ignored"), Utc::now());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_percentage_unknown_total() {
        assert_eq!(progress_percentage(25, None), 0);
        assert_eq!(progress_percentage(25, Some(0)), 0);
    }

    #[test]
    fn test_percentage_quarter() {
        assert_eq!(progress_percentage(25, Some(100)), 25);
    }

    #[test]
    fn test_percentage_truncates_and_clamps() {
        assert_eq!(progress_percentage(1, Some(3)), 33);
        assert_eq!(progress_percentage(150, Some(100)), 100);
        assert_eq!(progress_percentage(-4, Some(100)), 0);
    }

    #[test]
    fn test_progress_is_empty() {
        assert!(JobProgress::new().is_empty());
        assert!(!JobProgress::new().reduce_done(true).is_empty());
    }

    #[test]
    fn test_status_report_from_job() {
        let mut job = EmbeddingJob::new(Uuid::nil(), doc(), Some(200));
        job.apply_progress(&JobProgress::new().pages_processed(50));
        let report = JobStatusReport::from(&job);
        assert_eq!(report.percentage, 25);
        assert_eq!(report.bill_type, "hr");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "processing");
        assert_eq!(json["pages_processed"], 50);
        assert!(json["completed_at"].is_null());
    }

    #[test]
    fn test_final_summary_field_names() {
        let summary = FinalSummary {
            tldr: "Full text".to_string(),
            key_points: vec!["a".to_string()],
            financial_info: "None".to_string(),
            importance: 3,
            reading_time: "1 minute".to_string(),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("keyPoints").is_some());
        assert!(json.get("financialInfo").is_some());
        assert!(json.get("readingTime").is_some());

        let outcome = SummaryOutcome {
            summary,
            cached: true,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["cached"], true);
        assert_eq!(json["tldr"], "Full text");
    }
}
