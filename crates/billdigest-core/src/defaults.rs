//! Centralized default constants for billdigest.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and the CLI reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// CHUNKING
// =============================================================================

/// Target characters per bill chunk.
pub const CHUNK_CHARS: usize = 3500;

/// Characters carried from the end of one chunk into the next.
pub const CHUNK_OVERLAP: usize = 600;

/// Pages per summarization bucket.
pub const BUCKET_PAGES: u32 = 50;

/// Radius of the sentence-boundary search window around the target cut.
pub const BREAK_SEARCH_RADIUS: usize = 200;

/// Bounded capacity of the page-to-chunk channel.
pub const CHUNK_CHANNEL_CAPACITY: usize = 128;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Chunks sent per embedding call.
pub const EMBED_BATCH_SIZE: usize = 64;

/// Default embedding model name (Ollama).
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Default embedding vector dimension for nomic-embed-text.
pub const EMBED_DIMENSION: usize = 768;

// =============================================================================
// GENERATION
// =============================================================================

/// Default generation model name (Ollama).
pub const GEN_MODEL: &str = "llama3.1:8b";

/// Default Ollama endpoint.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Timeout for embedding requests (seconds).
pub const EMBED_TIMEOUT_SECS: u64 = 60;

/// Timeout for generation requests (seconds).
pub const GEN_TIMEOUT_SECS: u64 = 180;

// =============================================================================
// SUMMARIZATION
// =============================================================================

/// Character ceiling on one bucket's concatenated text in the map phase.
pub const MAP_CONTEXT_CHARS: usize = 100_000;

/// Character ceiling on concatenated bucket summaries in the reduce phase.
pub const REDUCE_CONTEXT_CHARS: usize = 150_000;

/// Maximum key points kept from a final summary.
pub const MAX_KEY_POINTS: usize = 8;

/// Maximum key provisions kept from a bucket summary.
pub const MAX_KEY_PROVISIONS: usize = 10;

/// Words per minute used for reading-time estimates.
pub const READING_WORDS_PER_MINUTE: usize = 200;

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Chunks retrieved per question.
pub const RAG_TOP_K: usize = 6;

/// Minimum HNSW candidate list scanned per nearest-chunk query.
///
/// The per-bill filter is applied after the index scan, so a small bill in a
/// large table needs a wide candidate list to return any rows.
pub const HNSW_EF_SEARCH: i64 = 400;

// =============================================================================
// PDF ACQUISITION
// =============================================================================

/// Timeout for downloading a bill PDF (seconds).
pub const PDF_DOWNLOAD_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// JOBS
// =============================================================================

/// Window in which an active job for the same document is reused (minutes).
pub const JOB_REUSE_WINDOW_MINS: i64 = 30;

/// Ceiling on a synchronous pipeline run (seconds).
pub const PIPELINE_TIMEOUT_SECS: u64 = 300;

/// Capacity of the pipeline event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_below_half_chunk() {
        assert!(CHUNK_OVERLAP < CHUNK_CHARS / 2);
    }

    #[test]
    fn test_search_radius_fits_chunk() {
        assert!(BREAK_SEARCH_RADIUS <= CHUNK_CHARS / 2);
    }
}
