//! Page-by-page PDF text streaming.
//!
//! [`PdfPageReader`] parses the document structure once and then extracts
//! text lazily, one page per iteration step. Only the page being read is
//! held as text.

use std::io::Read;
use std::path::{Path, PathBuf};

use lopdf::Document;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

use billdigest_core::{DocumentChunk, Error, Page, Result};
use billdigest_db::{ChunkAssembler, ChunkerConfig};

use super::fetch::PDF_MAGIC;

/// Collapse every whitespace run to one space and trim both ends.
pub fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// An opened PDF ready to stream its pages.
pub struct PdfPageReader {
    doc: Document,
    page_numbers: Vec<u32>,
}

impl PdfPageReader {
    /// Open and parse a PDF.
    ///
    /// A missing, non-PDF or corrupt file is a fatal [`Error::Pdf`].
    pub fn open(path: &Path) -> Result<Self> {
        let mut magic = [0u8; 4];
        let mut file = std::fs::File::open(path)
            .map_err(|e| Error::Pdf(format!("Cannot open {}: {}", path.display(), e)))?;
        if file.read_exact(&mut magic).is_err() || &magic[..] != PDF_MAGIC {
            return Err(Error::Pdf(format!(
                "File '{}' is not a valid PDF (missing %PDF header)",
                path.display()
            )));
        }

        let doc = Document::load(path)
            .map_err(|e| Error::Pdf(format!("Failed to parse {}: {}", path.display(), e)))?;
        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();

        debug!(
            subsystem = "jobs",
            component = "pdf_reader",
            op = "open",
            path = %path.display(),
            total_pages = page_numbers.len(),
            "PDF opened"
        );

        Ok(Self { doc, page_numbers })
    }

    /// Page count from the page tree, without extracting any text.
    pub fn total_pages(&self) -> u32 {
        self.page_numbers.len() as u32
    }

    /// Consume the reader into a forward-only page iterator.
    pub fn into_pages(self) -> PdfPages {
        PdfPages {
            doc: self.doc,
            page_numbers: self.page_numbers.into_iter(),
            ordinal: 0,
        }
    }
}

/// Lazy iterator of cleaned pages, 1-indexed in document order.
///
/// A page whose text cannot be extracted yields empty text.
pub struct PdfPages {
    doc: Document,
    page_numbers: std::vec::IntoIter<u32>,
    ordinal: u32,
}

impl Iterator for PdfPages {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        let page_number = self.page_numbers.next()?;
        self.ordinal += 1;

        let text = match self.doc.extract_text(&[page_number]) {
            Ok(raw) => clean_text(&raw),
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "pdf_reader",
                    page = self.ordinal,
                    error = %e,
                    "Page text extraction failed, using empty text"
                );
                String::new()
            }
        };
        trace!(
            subsystem = "jobs",
            component = "pdf_reader",
            page = self.ordinal,
            len = text.len(),
            "Page read"
        );

        Some(Page {
            number: self.ordinal,
            text,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.page_numbers.size_hint()
    }
}

/// A running page reader feeding chunks through a bounded channel.
pub struct ChunkProducer {
    /// Page count of the opened PDF.
    pub total_pages: u32,
    pub stream: ReceiverStream<DocumentChunk>,
    /// Resolves to the number of chunks sent.
    pub handle: JoinHandle<usize>,
}

/// Open `path` and run page extraction and chunk assembly on the blocking
/// pool.
///
/// Returns once the PDF is open, so an unreadable file fails here rather
/// than mid-stream. Chunks flow through a channel of `capacity`, keeping the
/// reader at most that many chunks ahead of the consumer. Dropping the
/// stream stops the producer at its next send.
pub async fn spawn_chunk_producer(
    path: PathBuf,
    config: ChunkerConfig,
    capacity: usize,
) -> Result<ChunkProducer> {
    config.validate()?;
    let (ready_tx, ready_rx) = oneshot::channel::<Result<u32>>();
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::task::spawn_blocking(move || {
        let opened = PdfPageReader::open(&path).and_then(|reader| {
            let total = reader.total_pages();
            ChunkAssembler::new(reader.into_pages(), config).map(|a| (total, a))
        });
        let (total, assembler) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return 0;
            }
        };
        if ready_tx.send(Ok(total)).is_err() {
            return 0;
        }

        let mut produced = 0usize;
        for chunk in assembler {
            if tx.blocking_send(chunk).is_err() {
                debug!(
                    subsystem = "jobs",
                    component = "chunk_producer",
                    produced,
                    "Consumer dropped, stopping"
                );
                break;
            }
            produced += 1;
        }
        produced
    });

    let total_pages = ready_rx
        .await
        .map_err(|_| Error::Internal("Chunk producer exited before opening the PDF".into()))??;

    Ok(ChunkProducer {
        total_pages,
        stream: ReceiverStream::new(rx),
        handle,
    })
}
