//! Input adapters: PDF acquisition and page streaming.

pub mod fetch;
pub mod pdf_pages;

pub use fetch::{download_client, FetchedPdf, PdfSource};
pub use pdf_pages::{spawn_chunk_producer, ChunkProducer, PdfPageReader, PdfPages};
