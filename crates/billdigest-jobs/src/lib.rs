//! # billdigest-jobs
//!
//! Bill ingestion pipeline for billdigest.
//!
//! This crate provides:
//! - Page-by-page PDF streaming into overlapping, page-attributed chunks
//! - Batched embedding with job progress tracking
//! - Map-reduce summarization of large bills
//! - Retrieval-augmented question answering
//! - Background and deadline-bounded job orchestration with events
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use billdigest_db::Database;
//! use billdigest_inference::OllamaBackend;
//! use billdigest_jobs::{BillPipeline, PdfSource, PipelineConfig, StartOutcome, Stores};
//!
//! let db = Database::connect("postgres://...").await?;
//! let backend = Arc::new(OllamaBackend::from_env());
//! let pipeline = BillPipeline::new(
//!     Stores::from_database(&db),
//!     backend.clone(),
//!     backend,
//!     PipelineConfig::from_env(),
//! );
//!
//! let doc = "119/hr/1".parse()?;
//! let outcome = pipeline
//!     .start(doc, PdfSource::parse("https://example.gov/hr1.pdf"), false)
//!     .await?;
//!
//! // Poll progress
//! let report = pipeline.job_status(outcome.job_id()).await?;
//! println!("{}%", report.percentage);
//! ```

pub mod adapters;
pub mod config;
pub mod embedder;
pub mod pipeline;
pub mod rag;
pub mod summarizer;
pub mod summary_parser;

// Always compiled so integration tests (in tests/) can build PDFs.
pub mod test_fixtures;

// Re-export core types
pub use billdigest_core::*;

pub use adapters::{
    download_client, spawn_chunk_producer, ChunkProducer, FetchedPdf, PdfPageReader, PdfSource,
};
pub use config::PipelineConfig;
pub use embedder::{EmbedOutcome, EmbeddingBatcher};
pub use pipeline::{BillPipeline, PipelineEvent, PipelinePhase, StartOutcome, Stores};
pub use rag::{RagQueryEngine, NOT_EMBEDDED_ANSWER};
pub use summarizer::{HierarchicalSummarizer, MapReport};
