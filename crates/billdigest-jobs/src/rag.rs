//! Retrieval-augmented question answering over one embedded bill.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use billdigest_core::{
    ChunkRepository, DocumentId, EmbeddingBackend, Error, GenerationBackend, Result,
    RetrievedChunk,
};

/// Answer returned for a document with no chunks.
pub const NOT_EMBEDDED_ANSWER: &str = "This bill has not been embedded yet. Please embed it first.";

/// Phrase the model is told to use when the context is insufficient.
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "The bill text does not contain enough information to answer this.";

/// Delimiter between retrieved chunks in the prompt context.
pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

pub struct RagQueryEngine {
    chunks: Arc<dyn ChunkRepository>,
    embedder: Arc<dyn EmbeddingBackend>,
    generator: Arc<dyn GenerationBackend>,
}

/// Retrieved chunks joined with their page citations.
pub fn build_context(retrieved: &[RetrievedChunk]) -> String {
    retrieved
        .iter()
        .map(|r| format!("{} {}", r.chunk.citation(), r.chunk.text))
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

/// Strict answer-from-context prompt.
pub fn rag_prompt(context: &str, question: &str) -> String {
    format!(
        "You are an assistant answering questions about legislative text.\n\n\
         Use only the context provided below to answer the question. \
         If the context does not contain enough information to answer, say \"{insufficient}\"\n\n\
         Cite the page range, in the [pp. X-Y] form shown in the context, for every claim you make.\n\n\
         If calculations or aggregation (like totals) are needed, perform them based only on figures in the context.\n\n\
         Do not use outside knowledge. Do not guess. Do not add interpretation beyond what the text states.\n\n\
         [CONTEXT]\n{context}\n\n\
         [QUESTION]\n{question}\n\n\
         [ANSWER]",
        insufficient = INSUFFICIENT_CONTEXT_ANSWER,
        context = context,
        question = question,
    )
}

impl RagQueryEngine {
    pub fn new(
        chunks: Arc<dyn ChunkRepository>,
        embedder: Arc<dyn EmbeddingBackend>,
        generator: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            chunks,
            embedder,
            generator,
        }
    }

    /// Answer `question` from the `top_k` chunks nearest to it.
    ///
    /// Returns [`NOT_EMBEDDED_ANSWER`] when the document has no chunks, and
    /// [`INSUFFICIENT_CONTEXT_ANSWER`] when an embedded document yields no
    /// neighbours for the question.
    pub async fn answer(&self, doc: &DocumentId, question: &str, top_k: usize) -> Result<String> {
        let start = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("Question must not be empty".to_string()));
        }

        if self.chunks.count(doc).await? == 0 {
            debug!(
                subsystem = "jobs",
                component = "rag",
                document = %doc,
                "No chunks for document"
            );
            return Ok(NOT_EMBEDDED_ANSWER.to_string());
        }

        let query = self
            .embedder
            .embed_texts(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::Embedding("Embedding backend returned no vector for the question".into())
            })?;

        let retrieved = self
            .chunks
            .nearest(doc, &query, top_k.max(1) as i64)
            .await?;
        if retrieved.is_empty() {
            warn!(
                subsystem = "jobs",
                component = "rag",
                document = %doc,
                top_k,
                "Nearest-chunk search returned nothing for an embedded document"
            );
            return Ok(INSUFFICIENT_CONTEXT_ANSWER.to_string());
        }

        let mean_distance =
            retrieved.iter().map(|r| r.distance).sum::<f64>() / retrieved.len() as f64;
        let context = build_context(&retrieved);
        let answer = self
            .generator
            .generate(&rag_prompt(&context, question))
            .await?;

        info!(
            subsystem = "jobs",
            component = "rag",
            op = "answer",
            document = %doc,
            chunk_count = retrieved.len(),
            mean_distance,
            answer_len = answer.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Question answered"
        );
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billdigest_core::{BucketSpan, DocumentChunk, EmbeddedChunk, Vector};
    use billdigest_db::MemoryStore;
    use billdigest_inference::mock::{MockEmbeddingGenerator, MockInferenceBackend};

    fn doc() -> DocumentId {
        DocumentId::new(119, "hr", "9")
    }

    fn engine(store: &Arc<MemoryStore>, mock: &Arc<MockInferenceBackend>) -> RagQueryEngine {
        RagQueryEngine::new(store.clone(), mock.clone(), mock.clone())
    }

    #[tokio::test]
    async fn test_answer_on_empty_document_returns_sentinel() {
        let store = Arc::new(MemoryStore::new());
        let mock = Arc::new(MockInferenceBackend::new());
        let answer = engine(&store, &mock)
            .answer(&doc(), "What does section 2 do?", 6)
            .await
            .unwrap();
        assert_eq!(answer, NOT_EMBEDDED_ANSWER);
        assert_eq!(mock.generate_call_count(), 0);
    }

    #[tokio::test]
    async fn test_answer_uses_nearest_chunks_with_citations() {
        let store = Arc::new(MemoryStore::new());
        let mock = Arc::new(
            MockInferenceBackend::new()
                .with_dimension(64)
                .with_fixed_response("Section 2 appropriates $10 [pp. 3-4]."),
        );
        let texts = [
            ("appropriations for fiscal year 2027", 3, 4),
            ("definitions of terms", 9, 9),
            ("penalties for violations", 12, 13),
        ];
        let records: Vec<EmbeddedChunk> = texts
            .iter()
            .enumerate()
            .map(|(i, (text, start, end))| EmbeddedChunk {
                chunk: DocumentChunk {
                    chunk_index: i as i32,
                    text: text.to_string(),
                    page_start: *start,
                    page_end: *end,
                    bucket_id: 0,
                },
                embedding: Vector::from(MockEmbeddingGenerator::generate(text, 64)),
            })
            .collect();
        store.upsert_batch(&doc(), &records).await.unwrap();

        let answer = engine(&store, &mock)
            .answer(&doc(), "appropriations for fiscal year 2027", 2)
            .await
            .unwrap();
        assert_eq!(answer, "Section 2 appropriates $10 [pp. 3-4].");

        let prompt = &mock.prompts()[0];
        // The identical text is the nearest chunk and comes first.
        let context = prompt.split("[CONTEXT]\n").nth(1).unwrap();
        assert!(context.starts_with("[pp. 3-4] appropriations for fiscal year 2027"));
        assert_eq!(context.matches(CONTEXT_DELIMITER).count(), 1);
        assert!(prompt.contains(INSUFFICIENT_CONTEXT_ANSWER));
    }

    #[tokio::test]
    async fn test_answer_rejects_empty_question() {
        let store = Arc::new(MemoryStore::new());
        let mock = Arc::new(MockInferenceBackend::new());
        let err = engine(&store, &mock).answer(&doc(), "  ", 3).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    /// Chunk store whose vector search misses every row, as a filtered
    /// approximate index can for a small document in a large table.
    struct MissingNeighbours(MemoryStore);

    #[async_trait::async_trait]
    impl ChunkRepository for MissingNeighbours {
        async fn count(&self, doc: &DocumentId) -> Result<i64> {
            self.0.count(doc).await
        }

        async fn upsert_batch(&self, doc: &DocumentId, chunks: &[EmbeddedChunk]) -> Result<()> {
            self.0.upsert_batch(doc, chunks).await
        }

        async fn delete_for_document(&self, doc: &DocumentId) -> Result<u64> {
            self.0.delete_for_document(doc).await
        }

        async fn list_buckets(&self, doc: &DocumentId) -> Result<Vec<BucketSpan>> {
            self.0.list_buckets(doc).await
        }

        async fn bucket_texts(&self, doc: &DocumentId, bucket_id: i32) -> Result<Vec<String>> {
            self.0.bucket_texts(doc, bucket_id).await
        }

        async fn nearest(
            &self,
            _doc: &DocumentId,
            _query: &Vector,
            _limit: i64,
        ) -> Result<Vec<RetrievedChunk>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_empty_search_on_embedded_document_is_not_the_sentinel() {
        let inner = MemoryStore::new();
        let record = EmbeddedChunk {
            chunk: DocumentChunk {
                chunk_index: 0,
                text: "appropriations for fiscal year 2027".to_string(),
                page_start: 1,
                page_end: 1,
                bucket_id: 0,
            },
            embedding: Vector::from(vec![1.0, 0.0, 0.0]),
        };
        inner.upsert_batch(&doc(), &[record]).await.unwrap();

        let mock = Arc::new(MockInferenceBackend::new().with_dimension(3));
        let engine = RagQueryEngine::new(
            Arc::new(MissingNeighbours(inner)),
            mock.clone(),
            mock.clone(),
        );
        let answer = engine
            .answer(&doc(), "What is appropriated?", 6)
            .await
            .unwrap();
        assert_eq!(answer, INSUFFICIENT_CONTEXT_ANSWER);
        assert_ne!(answer, NOT_EMBEDDED_ANSWER);
        assert_eq!(mock.generate_call_count(), 0);
    }

    #[tokio::test]
    async fn test_unembedded_document_skips_question_embedding() {
        let store = Arc::new(MemoryStore::new());
        let mock = Arc::new(MockInferenceBackend::new());
        engine(&store, &mock)
            .answer(&doc(), "Who is affected?", 6)
            .await
            .unwrap();
        assert_eq!(mock.embed_call_count(), 0);
    }

    #[test]
    fn test_build_context_delimits() {
        let retrieved = vec![
            RetrievedChunk {
                chunk: DocumentChunk {
                    chunk_index: 0,
                    text: "alpha".into(),
                    page_start: 1,
                    page_end: 2,
                    bucket_id: 0,
                },
                distance: 0.1,
            },
            RetrievedChunk {
                chunk: DocumentChunk {
                    chunk_index: 1,
                    text: "beta".into(),
                    page_start: 2,
                    page_end: 2,
                    bucket_id: 0,
                },
                distance: 0.2,
            },
        ];
        assert_eq!(
            build_context(&retrieved),
            "[pp. 1-2] alpha\n\n---\n\n[pp. 2-2] beta"
        );
    }
}
