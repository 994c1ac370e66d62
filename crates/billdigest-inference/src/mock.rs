//! Mock inference backend for deterministic testing.
//!
//! Generates deterministic embeddings and scripted generation responses, and
//! records every call for assertions.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use billdigest_inference::mock::MockInferenceBackend;
//!
//! let backend = MockInferenceBackend::new()
//!     .with_dimension(64)
//!     .with_response_when("Pages 1-", "## Key Provisions\n- Sec. 2 ...")
//!     .with_fixed_response("## EXECUTIVE SUMMARY\nA bill.");
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use billdigest_core::{EmbeddingBackend, Error, GenerationBackend, Result, Vector};

/// Mock inference backend for testing.
#[derive(Clone)]
pub struct MockInferenceBackend {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    embed_calls: Arc<AtomicUsize>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    dimension: usize,
    /// (needle, response): first needle contained in the prompt wins.
    responses: Vec<(String, String)>,
    default_response: String,
    failing_prompts: Vec<String>,
    fail_embed_after: Option<usize>,
    latency_ms: u64,
}

#[derive(Debug, Clone)]
struct MockCall {
    operation: String,
    input: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            responses: Vec::new(),
            default_response: "Mock response".to_string(),
            failing_prompts: Vec::new(),
            fail_embed_after: None,
            latency_ms: 0,
        }
    }
}

impl MockInferenceBackend {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
            embed_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    /// Set the response for prompts matching no other rule.
    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_response = response.into();
        self
    }

    /// Respond with `output` when the prompt contains `needle`.
    pub fn with_response_when(
        mut self,
        needle: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .responses
            .push((needle.into(), output.into()));
        self
    }

    /// Fail generation whenever the prompt contains `needle`.
    pub fn with_failing_prompt(mut self, needle: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .failing_prompts
            .push(needle.into());
        self
    }

    /// Let the first `calls` embedding calls succeed and fail every later one.
    pub fn with_embed_failure_after(mut self, calls: usize) -> Self {
        Arc::make_mut(&mut self.config).fail_embed_after = Some(calls);
        self
    }

    /// Set simulated latency for all operations.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.log().clear()
    }

    /// Number of batched embedding calls.
    pub fn embed_call_count(&self) -> usize {
        self.count_of("embed")
    }

    /// Number of generation calls.
    pub fn generate_call_count(&self) -> usize {
        self.count_of("generate")
    }

    /// Prompts passed to generation, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.log()
            .iter()
            .filter(|c| c.operation == "generate")
            .map(|c| c.input.clone())
            .collect()
    }

    fn log(&self) -> MutexGuard<'_, Vec<MockCall>> {
        self.call_log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn count_of(&self, operation: &str) -> usize {
        self.log().iter().filter(|c| c.operation == operation).count()
    }

    fn log_call(&self, operation: &str, input: &str) {
        self.log().push(MockCall {
            operation: operation.to_string(),
            input: input.to_string(),
        });
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    fn respond(&self, prompt: &str) -> String {
        self.config
            .responses
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| self.config.default_response.clone())
    }
}

impl Default for MockInferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingBackend for MockInferenceBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.log_call("embed", &texts.join("\n"));
        self.simulate_latency().await;

        let call = self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.config.fail_embed_after.is_some_and(|n| call >= n) {
            return Err(Error::Embedding("Simulated failure for testing".to_string()));
        }

        Ok(texts
            .iter()
            .map(|t| Vector::from(MockEmbeddingGenerator::generate(t, self.config.dimension)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

#[async_trait]
impl GenerationBackend for MockInferenceBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    async fn generate_with_system(&self, _system: &str, prompt: &str) -> Result<String> {
        self.log_call("generate", prompt);
        self.simulate_latency().await;

        let scripted_failure = self
            .config
            .failing_prompts
            .iter()
            .any(|needle| prompt.contains(needle.as_str()));
        if scripted_failure {
            return Err(Error::Inference("Simulated failure for testing".to_string()));
        }

        Ok(self.respond(prompt))
    }

    fn model_name(&self) -> &str {
        "mock-gen"
    }
}

/// Mock embedding generator with deterministic output.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Generate a deterministic unit embedding from text.
    ///
    /// Uses character-based hashing for reproducibility. The same text
    /// will always produce the same embedding.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension.max(1)];
        let len = vec.len();

        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % len;
            vec[idx] += 0.1;
        }

        Self::normalize(&mut vec);
        vec
    }

    fn normalize(vec: &mut [f32]) {
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend_embed() {
        let backend = MockInferenceBackend::new().with_dimension(128);
        let vectors = backend
            .embed_texts(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].as_slice().len(), 128);
        assert_eq!(backend.embed_call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_backend_deterministic() {
        let backend = MockInferenceBackend::new();
        let texts = vec!["appropriations".to_string()];
        let e1 = backend.embed_texts(&texts).await.unwrap();
        let e2 = backend.embed_texts(&texts).await.unwrap();
        assert_eq!(e1[0].as_slice(), e2[0].as_slice());
    }

    #[tokio::test]
    async fn test_mock_backend_response_rules() {
        let backend = MockInferenceBackend::new()
            .with_response_when("Pages 51-", "bucket two")
            .with_fixed_response("default");

        assert_eq!(
            backend.generate("Summarize Pages 51-100 now").await.unwrap(),
            "bucket two"
        );
        assert_eq!(backend.generate("other").await.unwrap(), "default");
        assert_eq!(backend.prompts().len(), 2);

        backend.clear_calls();
        assert!(backend.prompts().is_empty());
        assert_eq!(backend.generate_call_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_backend_failing_prompt() {
        let backend = MockInferenceBackend::new().with_failing_prompt("Pages 51-");
        assert!(backend.generate("Pages 51-100").await.is_err());
        assert!(backend.generate("Pages 1-50").await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_backend_embed_failure_after() {
        let backend = MockInferenceBackend::new().with_embed_failure_after(1);
        let texts = vec!["x".to_string()];
        assert!(backend.embed_texts(&texts).await.is_ok());
        let err = backend.embed_texts(&texts).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn test_mock_backend_latency_simulation() {
        let backend = MockInferenceBackend::new().with_latency_ms(50);
        let start = std::time::Instant::now();
        backend.generate("test").await.unwrap();
        assert!(start.elapsed().as_millis() >= 50, "Should simulate latency");
    }

    #[test]
    fn test_embedding_generator_normalized() {
        let embedding = MockEmbeddingGenerator::generate("test", 128);
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 0.01, "Should be normalized");
    }
}
