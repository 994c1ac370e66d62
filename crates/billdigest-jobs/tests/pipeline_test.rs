//! End-to-end pipeline runs over generated PDFs and the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use billdigest_db::{ChunkerConfig, MemoryStore};
use billdigest_inference::mock::MockInferenceBackend;
use billdigest_jobs::test_fixtures::{sentence_text, write_corrupt_pdf, write_pdf};
use billdigest_jobs::{
    ChunkRepository, EmbeddingJobRepository, Error, JobStatus, PdfSource, PipelineConfig,
    PipelineEvent, PipelinePhase, StartOutcome, SummaryRepository, NOT_EMBEDDED_ANSWER,
};
use tempfile::TempDir;

mod common;
use common::{doc, mock, pipeline_with, small_chunks, write_bill, FINAL_REPLY};

const TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_pipeline_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = write_bill(dir.path(), "bill.pdf", 5, 900);
    let store = Arc::new(MemoryStore::new());
    let backend = mock();
    let pipeline = pipeline_with(&store, backend.clone(), backend.clone(), small_chunks());
    let mut events = pipeline.events();

    let job_id = pipeline
        .run_to_completion(&doc(), &PdfSource::Path(path), false, TIMEOUT)
        .await
        .unwrap();

    let report = pipeline.job_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.total_pages, Some(5));
    assert_eq!(report.pages_processed, 5);
    assert_eq!(report.percentage, 100);
    assert!(report.error_message.is_none());
    assert!(report.completed_at.is_some());

    let count = store.count(&doc()).await.unwrap();
    assert!(count > 1);
    assert_eq!(i64::from(report.chunks_embedded), count);

    let buckets = store.list_buckets(&doc()).await.unwrap();
    assert_eq!(report.map_summaries_done as usize, buckets.len());
    assert!(report.reduce_done);
    assert_eq!(
        store.list_bucket_summaries(&doc()).await.unwrap().len(),
        buckets.len()
    );

    let stored = store.get_final_summary(&doc()).await.unwrap().unwrap();
    assert_eq!(stored.summary.tldr, FINAL_REPLY);
    assert!(!stored.summary.key_points.is_empty());

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(
        received,
        vec![
            PipelineEvent::JobStarted {
                job_id,
                document: doc()
            },
            PipelineEvent::PhaseCompleted {
                job_id,
                phase: PipelinePhase::Embed
            },
            PipelineEvent::PhaseCompleted {
                job_id,
                phase: PipelinePhase::Map
            },
            PipelineEvent::PhaseCompleted {
                job_id,
                phase: PipelinePhase::Reduce
            },
            PipelineEvent::JobCompleted {
                job_id,
                document: doc()
            },
        ]
    );

    // The embedded document answers questions with page-cited context.
    let answer = pipeline
        .rag()
        .answer(&doc(), "What does Section 3 amend?", 3)
        .await
        .unwrap();
    assert_eq!(answer, FINAL_REPLY);
    let prompt = backend.prompts().pop().unwrap();
    assert!(prompt.contains("[pp. "));
    assert!(prompt.contains("What does Section 3 amend?"));
}

#[tokio::test]
async fn test_start_reuses_active_job() {
    let dir = TempDir::new().unwrap();
    let path = write_bill(dir.path(), "bill.pdf", 3, 900);
    let store = Arc::new(MemoryStore::new());
    let embedder = mock();
    let generator = Arc::new(
        MockInferenceBackend::new()
            .with_fixed_response(FINAL_REPLY)
            .with_latency_ms(200),
    );
    let pipeline = pipeline_with(&store, embedder, generator, small_chunks());
    let source = PdfSource::Path(path);

    let first = pipeline.start(doc(), source.clone(), false).await.unwrap();
    let first_id = first.job_id();
    let handle = match first {
        StartOutcome::Started { handle, .. } => handle,
        StartOutcome::AlreadyRunning(_) => panic!("first start must launch a job"),
    };

    let second = pipeline.start(doc(), source.clone(), false).await.unwrap();
    assert!(matches!(second, StartOutcome::AlreadyRunning(id) if id == first_id));

    handle.await.unwrap().unwrap();
    assert_eq!(
        pipeline.job_status(first_id).await.unwrap().status,
        JobStatus::Completed
    );

    // Completed jobs are not reused.
    let third = pipeline.start(doc(), source, false).await.unwrap();
    assert_ne!(third.job_id(), first_id);
    match third {
        StartOutcome::Started { handle, .. } => handle.await.unwrap().unwrap(),
        StartOutcome::AlreadyRunning(_) => panic!("completed job must not be reused"),
    }
}

#[tokio::test]
async fn test_corrupt_pdf_fails_job() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.pdf");
    write_corrupt_pdf(&path).unwrap();
    let store = Arc::new(MemoryStore::new());
    let backend = mock();
    let pipeline = pipeline_with(&store, backend.clone(), backend, small_chunks());
    let mut events = pipeline.events();

    let err = pipeline
        .run_to_completion(&doc(), &PdfSource::Path(path), false, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Pdf(_)), "unexpected error: {err:?}");

    let mut failed = None;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::JobFailed { job_id, error, .. } = event {
            failed = Some((job_id, error));
        }
    }
    let (job_id, message) = failed.expect("JobFailed event");
    assert!(message.starts_with("Job failed: PDF error"));

    let job = store.get_status(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(message.as_str()));
    assert_eq!(store.count(&doc()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_file_fails_job() {
    let store = Arc::new(MemoryStore::new());
    let backend = mock();
    let pipeline = pipeline_with(&store, backend.clone(), backend, small_chunks());

    let err = pipeline
        .run_to_completion(
            &doc(),
            &PdfSource::parse("/nonexistent/bill.pdf"),
            false,
            TIMEOUT,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Pdf(_)));
}

#[tokio::test]
async fn test_timeout_marks_job_failed() {
    let dir = TempDir::new().unwrap();
    let path = write_bill(dir.path(), "bill.pdf", 3, 900);
    let store = Arc::new(MemoryStore::new());
    let embedder = mock();
    let generator = Arc::new(
        MockInferenceBackend::new()
            .with_fixed_response(FINAL_REPLY)
            .with_latency_ms(5_000),
    );
    let pipeline = pipeline_with(&store, embedder, generator, small_chunks());
    let mut events = pipeline.events();

    let err = pipeline
        .run_to_completion(
            &doc(),
            &PdfSource::Path(path),
            false,
            Duration::from_millis(1_000),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let mut failed = None;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::JobFailed { job_id, .. } = event {
            failed = Some(job_id);
        }
    }
    let job_id = failed.expect("JobFailed event");
    let job = store.get_status(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("timed out"));

    // Chunks written before the deadline are kept.
    assert!(store.count(&doc()).await.unwrap() > 0);
    assert!(store.get_final_summary(&doc()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failing_bucket_is_skipped() {
    let dir = TempDir::new().unwrap();
    let path = write_bill(dir.path(), "bill.pdf", 4, 2500);
    let store = Arc::new(MemoryStore::new());
    let embedder = mock();
    let generator = Arc::new(
        MockInferenceBackend::new()
            .with_fixed_response(FINAL_REPLY)
            .with_failing_prompt("(pages 2-"),
    );
    let config = PipelineConfig::default()
        .with_chunker(ChunkerConfig::new(1000, 200, 1))
        .with_batch_size(4);
    let pipeline = pipeline_with(&store, embedder, generator, config);

    let job_id = pipeline
        .run_to_completion(&doc(), &PdfSource::Path(path), false, TIMEOUT)
        .await
        .unwrap();

    let buckets = store.list_buckets(&doc()).await.unwrap();
    assert!(buckets.iter().any(|b| b.bucket_id == 1));

    let report = pipeline.job_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.map_summaries_done as usize, buckets.len() - 1);
    assert!(report.reduce_done);

    let summaries = store.list_bucket_summaries(&doc()).await.unwrap();
    assert!(summaries.iter().all(|s| s.bucket_id != 1));
    assert!(store.get_final_summary(&doc()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_rerun_without_force_skips_embedding() {
    let dir = TempDir::new().unwrap();
    let path = write_bill(dir.path(), "bill.pdf", 4, 900);
    let store = Arc::new(MemoryStore::new());
    let backend = mock();
    let pipeline = pipeline_with(&store, backend.clone(), backend.clone(), small_chunks());
    let source = PdfSource::Path(path);

    pipeline
        .run_to_completion(&doc(), &source, false, TIMEOUT)
        .await
        .unwrap();
    let count = store.count(&doc()).await.unwrap();
    let embed_calls = backend.embed_call_count();

    let job_id = pipeline
        .run_to_completion(&doc(), &source, false, TIMEOUT)
        .await
        .unwrap();
    let report = pipeline.job_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.percentage, 100);
    assert_eq!(i64::from(report.chunks_embedded), count);
    assert_eq!(backend.embed_call_count(), embed_calls);
    assert_eq!(store.count(&doc()).await.unwrap(), count);
}

#[tokio::test]
async fn test_rerun_without_force_does_not_need_the_source() {
    let dir = TempDir::new().unwrap();
    let path = write_bill(dir.path(), "bill.pdf", 5, 900);
    let store = Arc::new(MemoryStore::new());
    let backend = mock();
    let pipeline = pipeline_with(&store, backend.clone(), backend.clone(), small_chunks());
    let source = PdfSource::Path(path.clone());

    pipeline
        .run_to_completion(&doc(), &source, false, TIMEOUT)
        .await
        .unwrap();
    let count = store.count(&doc()).await.unwrap();
    std::fs::remove_file(&path).unwrap();
    backend.clear_calls();

    let job_id = pipeline
        .run_to_completion(&doc(), &source, false, TIMEOUT)
        .await
        .unwrap();
    let report = pipeline.job_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.total_pages, Some(5));
    assert_eq!(report.percentage, 100);
    assert_eq!(i64::from(report.chunks_embedded), count);
    assert!(report.reduce_done);
    assert_eq!(backend.embed_call_count(), 0);
    assert!(backend.generate_call_count() > 0);

    // A forced run still needs the file.
    let err = pipeline
        .run_to_completion(&doc(), &source, true, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Pdf(_)));
}

#[tokio::test]
async fn test_forced_rebucketing_replaces_bucket_summaries() {
    let dir = TempDir::new().unwrap();
    let path = write_bill(dir.path(), "bill.pdf", 4, 2500);
    let source = PdfSource::Path(path);
    let store = Arc::new(MemoryStore::new());
    let backend = mock();

    let per_page = PipelineConfig::default()
        .with_chunker(ChunkerConfig::new(1000, 200, 1))
        .with_batch_size(4);
    pipeline_with(&store, backend.clone(), backend.clone(), per_page)
        .run_to_completion(&doc(), &source, false, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(store.list_bucket_summaries(&doc()).await.unwrap().len(), 4);

    let wide = PipelineConfig::default()
        .with_chunker(ChunkerConfig::new(1000, 200, 50))
        .with_batch_size(4);
    let pipeline = pipeline_with(&store, backend.clone(), backend.clone(), wide);
    backend.clear_calls();
    let job_id = pipeline
        .run_to_completion(&doc(), &source, true, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(store.list_buckets(&doc()).await.unwrap().len(), 1);
    let summaries = store.list_bucket_summaries(&doc()).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!((summaries[0].page_start, summaries[0].page_end), (1, 4));
    assert_eq!(pipeline.job_status(job_id).await.unwrap().map_summaries_done, 1);

    let reduce = backend.prompts().pop().unwrap();
    assert_eq!(reduce.matches("## Pages ").count(), 1);
    assert!(reduce.contains("## Pages 1-4\n"));
}

#[tokio::test]
async fn test_trailing_blank_pages_complete_at_full_progress() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bill.pdf");
    let first = sentence_text(1, 900);
    let second = sentence_text(2, 900);
    write_pdf(&path, &[first.as_str(), second.as_str(), "", ""]).unwrap();
    let store = Arc::new(MemoryStore::new());
    let backend = mock();
    let pipeline = pipeline_with(&store, backend.clone(), backend, small_chunks());

    let job_id = pipeline
        .run_to_completion(&doc(), &PdfSource::Path(path), false, TIMEOUT)
        .await
        .unwrap();
    let report = pipeline.job_status(job_id).await.unwrap();
    assert_eq!(report.total_pages, Some(4));
    assert_eq!(report.pages_processed, 4);
    assert_eq!(report.percentage, 100);
}

#[tokio::test]
async fn test_concurrent_runs_converge() {
    let dir = TempDir::new().unwrap();
    let path = write_bill(dir.path(), "bill.pdf", 4, 900);
    let source = PdfSource::Path(path);

    let baseline = Arc::new(MemoryStore::new());
    let backend = mock();
    pipeline_with(&baseline, backend.clone(), backend.clone(), small_chunks())
        .run_to_completion(&doc(), &source, false, TIMEOUT)
        .await
        .unwrap();
    let expected = baseline.count(&doc()).await.unwrap();

    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(&store, backend.clone(), backend, small_chunks());
    let window = pipeline.config().reuse_window;

    // Both callers check before either creates a job.
    assert!(store.get_or_reuse(&doc(), window).await.unwrap().is_none());
    assert!(store.get_or_reuse(&doc(), window).await.unwrap().is_none());
    let a = store.create(&doc(), None).await.unwrap();
    let b = store.create(&doc(), None).await.unwrap();

    let d = doc();
    let (ra, rb) = tokio::join!(
        pipeline.execute(a, &d, &source, false),
        pipeline.execute(b, &d, &source, false),
    );
    ra.unwrap();
    rb.unwrap();

    for job_id in [a, b] {
        assert_eq!(
            pipeline.job_status(job_id).await.unwrap().status,
            JobStatus::Completed
        );
    }
    assert_eq!(store.count(&doc()).await.unwrap(), expected);
    assert!(store.get_final_summary(&doc()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_rag_on_unembedded_document() {
    let store = Arc::new(MemoryStore::new());
    let backend = mock();
    let pipeline = pipeline_with(&store, backend.clone(), backend.clone(), small_chunks());

    let answer = pipeline
        .rag()
        .answer(&doc(), "Who is affected?", 5)
        .await
        .unwrap();
    assert_eq!(answer, NOT_EMBEDDED_ANSWER);
    assert_eq!(backend.generate_call_count(), 0);
}

#[tokio::test]
async fn test_unknown_job_status() {
    let store = Arc::new(MemoryStore::new());
    let backend = mock();
    let pipeline = pipeline_with(&store, backend.clone(), backend, small_chunks());
    let missing = uuid::Uuid::new_v4();
    let err = pipeline.job_status(missing).await.unwrap_err();
    assert!(matches!(err, Error::JobNotFound(id) if id == missing));
}
