//! # billdigest-core
//!
//! Core types, traits, and abstractions for billdigest.
//!
//! This crate provides the data model shared by the chunk store, the job
//! tracker and the summarizer, along with the repository and inference
//! traits the other crates implement.

pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
