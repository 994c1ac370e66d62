//! Pipeline configuration.

use std::time::Duration;

use billdigest_core::defaults;
use billdigest_db::ChunkerConfig;

/// Tunables for the embed, map and reduce pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunker: ChunkerConfig,
    /// Chunks sent per embedding call.
    pub batch_size: usize,
    /// Ceiling on one bucket's concatenated text.
    pub map_context_chars: usize,
    /// Ceiling on the concatenated bucket summaries.
    pub reduce_context_chars: usize,
    /// Window in which an active job for the same document is reused.
    pub reuse_window: chrono::Duration,
    /// Ceiling for a synchronous run.
    pub timeout: Duration,
    pub rag_top_k: usize,
    /// Chunks buffered between the PDF reader and the embedder.
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            batch_size: defaults::EMBED_BATCH_SIZE,
            map_context_chars: defaults::MAP_CONTEXT_CHARS,
            reduce_context_chars: defaults::REDUCE_CONTEXT_CHARS,
            reuse_window: chrono::Duration::minutes(defaults::JOB_REUSE_WINDOW_MINS),
            timeout: Duration::from_secs(defaults::PIPELINE_TIMEOUT_SECS),
            rag_top_k: defaults::RAG_TOP_K,
            channel_capacity: defaults::CHUNK_CHANNEL_CAPACITY,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `BILL_CHUNK_CHARS` | `3500` | Target chunk size |
    /// | `BILL_CHUNK_OVERLAP` | `600` | Overlap between chunks |
    /// | `BILL_BUCKET_PAGES` | `50` | Pages per summarization bucket |
    /// | `EMBED_BATCH_SIZE` | `64` | Chunks per embedding call |
    /// | `MAP_CONTEXT_CHARS` | `100000` | Map-phase input ceiling |
    /// | `REDUCE_CONTEXT_CHARS` | `150000` | Reduce-phase input ceiling |
    /// | `JOB_REUSE_WINDOW_MINS` | `30` | Active-job reuse window |
    /// | `PIPELINE_TIMEOUT_SECS` | `300` | Synchronous run ceiling |
    /// | `RAG_TOP_K` | `6` | Retrieved chunks per question |
    pub fn from_env() -> Self {
        let chunker = ChunkerConfig::new(
            env_or("BILL_CHUNK_CHARS", defaults::CHUNK_CHARS),
            env_or("BILL_CHUNK_OVERLAP", defaults::CHUNK_OVERLAP),
            env_or("BILL_BUCKET_PAGES", defaults::BUCKET_PAGES),
        );

        Self {
            chunker,
            batch_size: env_or("EMBED_BATCH_SIZE", defaults::EMBED_BATCH_SIZE).max(1),
            map_context_chars: env_or("MAP_CONTEXT_CHARS", defaults::MAP_CONTEXT_CHARS),
            reduce_context_chars: env_or("REDUCE_CONTEXT_CHARS", defaults::REDUCE_CONTEXT_CHARS),
            reuse_window: chrono::Duration::minutes(env_or(
                "JOB_REUSE_WINDOW_MINS",
                defaults::JOB_REUSE_WINDOW_MINS,
            )),
            timeout: Duration::from_secs(env_or(
                "PIPELINE_TIMEOUT_SECS",
                defaults::PIPELINE_TIMEOUT_SECS,
            )),
            rag_top_k: env_or("RAG_TOP_K", defaults::RAG_TOP_K).max(1),
            channel_capacity: defaults::CHUNK_CHANNEL_CAPACITY,
        }
    }

    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_context_limits(mut self, map_chars: usize, reduce_chars: usize) -> Self {
        self.map_context_chars = map_chars;
        self.reduce_context_chars = reduce_chars;
        self
    }
}
