//! Shared helpers for billdigest-jobs integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use billdigest_db::{ChunkerConfig, MemoryStore};
use billdigest_inference::mock::MockInferenceBackend;
use billdigest_jobs::test_fixtures::{sentence_text, write_pdf};
use billdigest_jobs::{
    spawn_chunk_producer, BillPipeline, DocumentId, EmbedOutcome, EmbeddingBackend,
    EmbeddingBatcher, GenerationBackend, PipelineConfig, Stores,
};

pub const FINAL_REPLY: &str = "\
## EXECUTIVE SUMMARY
The Act establishes a grid resilience program.

## KEY PROVISIONS
- Creates the Office of Grid Resilience [pp. 1-2]
- Requires annual reports [pp. 3-4]

## FINANCIAL IMPACT
Appropriates $2 billion.

## TIMELINE & IMPLEMENTATION
- Effective on enactment

## SIGNIFICANCE
Utilities nationwide.

## DEFINITIONS
None.
";

pub fn doc() -> DocumentId {
    DocumentId::new(119, "hr", "1234")
}

/// Write a PDF of `pages` pages with about `page_len` bytes of text each.
pub fn write_bill(dir: &Path, name: &str, pages: u32, page_len: usize) -> PathBuf {
    let path = dir.join(name);
    let texts: Vec<String> = (1..=pages).map(|p| sentence_text(p, page_len)).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    write_pdf(&path, &refs).unwrap();
    path
}

pub fn mock() -> Arc<MockInferenceBackend> {
    Arc::new(
        MockInferenceBackend::new()
            .with_dimension(32)
            .with_fixed_response(FINAL_REPLY),
    )
}

pub fn pipeline_with(
    store: &Arc<MemoryStore>,
    embedder: Arc<dyn EmbeddingBackend>,
    generator: Arc<dyn GenerationBackend>,
    config: PipelineConfig,
) -> BillPipeline {
    BillPipeline::new(Stores::from_memory(store.clone()), embedder, generator, config)
}

pub fn small_chunks() -> PipelineConfig {
    PipelineConfig::default()
        .with_chunker(ChunkerConfig::new(1000, 200, 2))
        .with_batch_size(4)
}

/// Stream `path` through the chunker into `store` without a job.
pub async fn embed_pdf(
    store: &Arc<MemoryStore>,
    embedder: Arc<dyn EmbeddingBackend>,
    path: &Path,
    chunker: ChunkerConfig,
    batch_size: usize,
    force: bool,
) -> EmbedOutcome {
    let producer = spawn_chunk_producer(path.to_path_buf(), chunker, 8)
        .await
        .unwrap();
    let batcher = EmbeddingBatcher::new(store.clone(), store.clone(), embedder);
    let outcome = batcher
        .embed_document(&doc(), producer.stream, batch_size, force, None)
        .await
        .unwrap();
    producer.handle.await.unwrap();
    outcome
}
