//! # billdigest-inference
//!
//! Embedding and generation backends for billdigest.
//!
//! - [`OllamaBackend`]: HTTP client for a local or remote Ollama server
//! - [`mock::MockInferenceBackend`]: deterministic backend for tests (feature `mock`)

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;

pub use billdigest_core::{EmbeddingBackend, GenerationBackend};
