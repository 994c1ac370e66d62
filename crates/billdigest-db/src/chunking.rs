//! Streaming chunk assembly over a page sequence.
//!
//! [`ChunkAssembler`] pulls pages one at a time, accumulates their text in a
//! bounded buffer, and yields overlapping [`DocumentChunk`]s annotated with the
//! page range they cover and the bucket of their first page.
//!
//! # Example
//!
//! ```rust
//! use billdigest_core::Page;
//! use billdigest_db::chunking::{ChunkAssembler, ChunkerConfig};
//!
//! let pages = vec![
//!     Page { number: 1, text: "Section 1. Short title.".to_string() },
//!     Page { number: 2, text: "Section 2. Definitions.".to_string() },
//! ];
//! let chunks: Vec<_> = ChunkAssembler::new(pages.into_iter(), ChunkerConfig::default())
//!     .unwrap()
//!     .collect();
//!
//! assert_eq!(chunks.len(), 1);
//! assert_eq!((chunks[0].page_start, chunks[0].page_end), (1, 2));
//! ```

use std::collections::VecDeque;

use regex::Regex;
use tracing::trace;

use billdigest_core::{bucket_for_page, defaults, DocumentChunk, Error, Page, Result};

/// Sentence-ending punctuation followed by whitespace.
const SENTENCE_END: &str = r"[.!?]\s+";

/// Configuration for chunk assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Target chunk size in bytes of cleaned text.
    pub chunk_chars: usize,
    /// Bytes carried from the end of one chunk into the next.
    pub overlap: usize,
    /// Pages per bucket.
    pub bucket_pages: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_chars: defaults::CHUNK_CHARS,
            overlap: defaults::CHUNK_OVERLAP,
            bucket_pages: defaults::BUCKET_PAGES,
        }
    }
}

impl ChunkerConfig {
    pub fn new(chunk_chars: usize, overlap: usize, bucket_pages: u32) -> Self {
        Self {
            chunk_chars,
            overlap,
            bucket_pages,
        }
    }

    /// Reject parameters that would stall or never emit.
    ///
    /// Overlap must stay below half the target so that every cut advances
    /// the buffer.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_chars == 0 {
            return Err(Error::InvalidInput("chunk_chars must be > 0".to_string()));
        }
        if self.bucket_pages == 0 {
            return Err(Error::InvalidInput("bucket_pages must be > 0".to_string()));
        }
        if self.overlap >= self.chunk_chars / 2 && self.overlap > 0 {
            return Err(Error::InvalidInput(format!(
                "overlap ({}) must be less than half of chunk_chars ({})",
                self.overlap, self.chunk_chars
            )));
        }
        Ok(())
    }

    /// Radius of the sentence-boundary search around the target cut.
    pub fn search_radius(&self) -> usize {
        defaults::BREAK_SEARCH_RADIUS.min(self.chunk_chars / 2)
    }
}

// Helper functions

/// Find UTF-8 safe boundary at or before the given position.
fn find_char_boundary_before(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Find UTF-8 safe boundary at or after the given position.
fn find_char_boundary_after(text: &str, mut pos: usize) -> usize {
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos.min(text.len())
}

/// Choose where to cut `text` near `target`.
///
/// Prefers the sentence end (after its trailing whitespace) closest to the
/// target within `radius`; then the next space at or after the target; then
/// the target itself.
pub fn find_break_point(sentence_end: &Regex, text: &str, target: usize, radius: usize) -> usize {
    let target = find_char_boundary_before(text, target);
    let lo = find_char_boundary_before(text, target.saturating_sub(radius));
    let hi = find_char_boundary_after(text, target.saturating_add(radius));

    let mut best: Option<usize> = None;
    for m in sentence_end.find_iter(&text[lo..hi]) {
        let candidate = lo + m.end();
        let closer = match best {
            Some(b) => candidate.abs_diff(target) < b.abs_diff(target),
            None => true,
        };
        if closer {
            best = Some(candidate);
        }
    }
    if let Some(bp) = best {
        return bp;
    }

    match text[target..].find(' ') {
        Some(offset) => target + offset,
        None => target,
    }
}

/// Lazy chunk iterator over a page sequence.
///
/// Holds at most one target-sized buffer plus the page being appended.
pub struct ChunkAssembler<I> {
    pages: I,
    config: ChunkerConfig,
    sentence_end: Regex,
    buffer: String,
    /// Start offset in `buffer` of each page with content there, ascending.
    marks: VecDeque<(usize, u32)>,
    /// Bytes at the head of `buffer` already emitted in the previous chunk.
    carried: usize,
    next_index: i32,
    exhausted: bool,
}

impl<I> ChunkAssembler<I>
where
    I: Iterator<Item = Page>,
{
    pub fn new(pages: I, config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        let sentence_end = Regex::new(SENTENCE_END)
            .map_err(|e| Error::Internal(format!("sentence pattern: {}", e)))?;
        Ok(Self {
            pages,
            config,
            sentence_end,
            buffer: String::new(),
            marks: VecDeque::new(),
            carried: 0,
            next_index: 0,
            exhausted: false,
        })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    fn push_page(&mut self, page: Page) {
        if page.text.is_empty() {
            return;
        }
        if !self.buffer.is_empty() {
            self.buffer.push(' ');
        }
        self.marks.push_back((self.buffer.len(), page.number));
        self.buffer.push_str(&page.text);
    }

    /// Page containing the byte at `offset`.
    fn page_at(&self, offset: usize) -> u32 {
        self.marks
            .iter()
            .take_while(|(start, _)| *start <= offset)
            .last()
            .or_else(|| self.marks.front())
            .map(|(_, page)| *page)
            .unwrap_or(1)
    }

    /// Build a chunk from `buffer[from..to]`, or `None` if it is blank.
    fn make_chunk(&mut self, from: usize, to: usize) -> Option<DocumentChunk> {
        let raw = &self.buffer[from..to];
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }
        let first = from + (raw.len() - raw.trim_start().len());
        let last = from + raw.trim_end().len() - 1;
        let page_start = self.page_at(first);
        let page_end = self.page_at(last).max(page_start);

        let chunk = DocumentChunk {
            chunk_index: self.next_index,
            text: text.to_string(),
            page_start: page_start as i32,
            page_end: page_end as i32,
            bucket_id: bucket_for_page(page_start, self.config.bucket_pages) as i32,
        };
        self.next_index += 1;
        trace!(
            subsystem = "chunking",
            component = "assembler",
            chunk_index = chunk.chunk_index,
            page_start = chunk.page_start,
            page_end = chunk.page_end,
            len = chunk.text.len(),
            "Chunk emitted"
        );
        Some(chunk)
    }

    /// Cut one chunk off the front of a full buffer and retain the overlap.
    fn cut(&mut self) -> Option<DocumentChunk> {
        let mut target = find_char_boundary_before(&self.buffer, self.config.chunk_chars);
        if target == 0 {
            target = find_char_boundary_after(&self.buffer, 1);
        }
        let mut bp = find_break_point(
            &self.sentence_end,
            &self.buffer,
            target,
            self.config.search_radius(),
        );
        if bp == 0 {
            bp = target;
        }

        let chunk = self.make_chunk(0, bp);

        let mut keep_from =
            find_char_boundary_before(&self.buffer, bp.saturating_sub(self.config.overlap));
        if keep_from == 0 {
            keep_from = bp;
        }
        self.retain_from(keep_from);
        self.carried = bp - keep_from;
        chunk
    }

    /// Drop `buffer[..keep_from]`, rebasing page marks.
    fn retain_from(&mut self, keep_from: usize) {
        self.buffer.drain(..keep_from);
        if self.buffer.is_empty() {
            self.marks.clear();
            return;
        }
        let mut rebased = VecDeque::with_capacity(self.marks.len());
        let mut head = None;
        for (start, page) in self.marks.drain(..) {
            if start <= keep_from {
                head = Some(page);
            } else {
                rebased.push_back((start - keep_from, page));
            }
        }
        if let Some(page) = head {
            rebased.push_front((0, page));
        }
        self.marks = rebased;
    }

    /// Emit whatever fresh text remains after the stream ends.
    fn flush(&mut self) -> Option<DocumentChunk> {
        if self.buffer.len() <= self.carried || self.buffer[self.carried..].trim().is_empty() {
            self.buffer.clear();
            self.marks.clear();
            self.carried = 0;
            return None;
        }
        let end = self.buffer.len();
        let chunk = self.make_chunk(0, end);
        self.buffer.clear();
        self.marks.clear();
        self.carried = 0;
        chunk
    }
}

impl<I> Iterator for ChunkAssembler<I>
where
    I: Iterator<Item = Page>,
{
    type Item = DocumentChunk;

    fn next(&mut self) -> Option<DocumentChunk> {
        loop {
            if self.buffer.len() >= self.config.chunk_chars {
                if let Some(chunk) = self.cut() {
                    return Some(chunk);
                }
                continue;
            }
            if self.exhausted {
                return self.flush();
            }
            match self.pages.next() {
                Some(page) => self.push_page(page),
                None => self.exhausted = true,
            }
        }
    }
}
