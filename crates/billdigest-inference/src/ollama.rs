//! Ollama inference backend implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use billdigest_core::{EmbeddingBackend, Error, GenerationBackend, Result, Vector};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = billdigest_core::defaults::OLLAMA_URL;

/// Default embedding model.
pub const DEFAULT_EMBED_MODEL: &str = billdigest_core::defaults::EMBED_MODEL;

/// Default generation model.
pub const DEFAULT_GEN_MODEL: &str = billdigest_core::defaults::GEN_MODEL;

/// Default embedding dimension for nomic-embed-text.
pub const DEFAULT_DIMENSION: usize = billdigest_core::defaults::EMBED_DIMENSION;

/// Embedding calls slower than this are logged as slow.
const SLOW_EMBED_MS: u64 = 5_000;

/// Generation calls slower than this are logged as slow.
const SLOW_GEN_MS: u64 = 30_000;

/// Ollama inference backend.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    embed_model: String,
    gen_model: String,
    dimension: usize,
    embed_timeout_secs: u64,
    gen_timeout_secs: u64,
}

impl OllamaBackend {
    /// Create a new Ollama backend with default settings.
    pub fn new() -> Self {
        Self::with_config(
            DEFAULT_OLLAMA_URL.to_string(),
            DEFAULT_EMBED_MODEL.to_string(),
            DEFAULT_GEN_MODEL.to_string(),
            DEFAULT_DIMENSION,
        )
    }

    /// Create a new Ollama backend with custom configuration.
    pub fn with_config(
        base_url: String,
        embed_model: String,
        gen_model: String,
        dimension: usize,
    ) -> Self {
        let gen_timeout = env_secs(
            "BILLDIGEST_GEN_TIMEOUT_SECS",
            billdigest_core::defaults::GEN_TIMEOUT_SECS,
        );
        let embed_timeout = env_secs(
            "BILLDIGEST_EMBED_TIMEOUT_SECS",
            billdigest_core::defaults::EMBED_TIMEOUT_SECS,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(gen_timeout.max(embed_timeout)))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });

        let base_url = base_url.trim_end_matches('/').to_string();
        info!(
            subsystem = "inference",
            component = "ollama",
            url = %base_url,
            embed_model = %embed_model,
            gen_model = %gen_model,
            dimension,
            "Initializing Ollama backend"
        );

        Self {
            client,
            base_url,
            embed_model,
            gen_model,
            dimension,
            embed_timeout_secs: embed_timeout,
            gen_timeout_secs: gen_timeout,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OLLAMA_BASE").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        let embed_model =
            std::env::var("OLLAMA_EMBED_MODEL").unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string());
        let gen_model =
            std::env::var("OLLAMA_GEN_MODEL").unwrap_or_else(|_| DEFAULT_GEN_MODEL.to_string());
        let dimension = std::env::var("OLLAMA_EMBED_DIM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DIMENSION);

        Self::with_config(base_url, embed_model, gen_model, dimension)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Generate via the `/api/chat` endpoint.
    async fn generate_internal(&self, system: &str, prompt: &str) -> Result<String> {
        let start = Instant::now();

        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request = ChatRequest {
            model: self.gen_model.clone(),
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(Duration::from_secs(self.gen_timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let content = result.message.content;
        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            response_len = content.len(),
            duration_ms = elapsed,
            "Generation complete"
        );
        if elapsed > SLOW_GEN_MS {
            warn!(
                duration_ms = elapsed,
                prompt_len = prompt.len(),
                slow = true,
                "Slow generation operation"
            );
        }
        Ok(content)
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn env_secs(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Chat API message for `/api/chat`.
#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// Response from the Ollama `/api/chat` endpoint.
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "ollama", op = "embed_texts", model = %self.embed_model, input_count = texts.len()))]
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();

        let request = EmbeddingRequest {
            model: self.embed_model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .timeout(Duration::from_secs(self.embed_timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        let vectors: Vec<Vector> = result.embeddings.into_iter().map(Vector::from).collect();
        let elapsed = start.elapsed().as_millis() as u64;

        debug!(
            result_count = vectors.len(),
            duration_ms = elapsed,
            "Embedding complete"
        );
        if elapsed > SLOW_EMBED_MS {
            warn!(
                duration_ms = elapsed,
                input_count = texts.len(),
                slow = true,
                "Slow embedding operation"
            );
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.embed_model
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    #[instrument(skip(self, system, prompt), fields(subsystem = "inference", component = "ollama", op = "generate", model = %self.gen_model, prompt_len = prompt.len()))]
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.generate_internal(system, prompt).await
    }

    fn model_name(&self) -> &str {
        &self.gen_model
    }
}
