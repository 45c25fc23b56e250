//! Sliding-window text chunking with sentence-aware cuts.
//!
//! Sizes are measured in characters. A window that would split text mid
//! sentence is pulled back to the nearest `. `, `! `, `? ` or blank line
//! inside its overlap zone.

use crate::types::{DocumentChunk, DocumentMetadata};
use sha2::{Digest, Sha256};

/// Boundaries searched for, as char pairs. The cut lands after the pair.
const BOUNDARIES: [[char; 2]; 4] = [['.', ' '], ['!', ' '], ['?', ' '], ['\n', '\n']];

/// A chunk with its character range in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
}

/// Split `text` into overlapping chunks of at most `chunk_size` characters.
///
/// Text no longer than `chunk_size` yields a single chunk. A `chunk_size`
/// of zero is treated as one and `overlap` is clamped below `chunk_size`.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    chunk_spans(text, chunk_size, overlap)
        .into_iter()
        .map(|span| span.text)
        .collect()
}

/// Like [`chunk_text`], keeping the trimmed character range of each chunk.
pub fn chunk_spans(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextSpan> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    if len <= chunk_size {
        return trimmed_span(&chars, 0, len).into_iter().collect();
    }

    let mut spans = Vec::new();
    let mut start = 0;

    loop {
        let mut end = (start + chunk_size).min(len);
        if end < len {
            if let Some(cut) = find_boundary(&chars, start, end, overlap) {
                end = cut;
            }
        }

        spans.extend(trimmed_span(&chars, start, end));

        if end >= len {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    tracing::debug!(
        chunks = spans.len(),
        chunk_size,
        overlap,
        chars = len,
        "Chunked text"
    );

    spans
}

fn trimmed_span(chars: &[char], start: usize, end: usize) -> Option<TextSpan> {
    let window = &chars[start..end];
    let lead = window.iter().take_while(|c| c.is_whitespace()).count();
    if lead == window.len() {
        return None;
    }
    let trail = window.iter().rev().take_while(|c| c.is_whitespace()).count();
    Some(TextSpan {
        char_start: start + lead,
        char_end: end - trail,
        text: window[lead..window.len() - trail].iter().collect(),
    })
}

/// Nearest cut position in `(start, end]` that follows a boundary pair
/// lying entirely inside the overlap zone `[end - overlap, end)`.
fn find_boundary(chars: &[char], start: usize, end: usize, overlap: usize) -> Option<usize> {
    let zone_start = end.saturating_sub(overlap).max(start);
    (zone_start + 2..=end).rev().find(|&cut| {
        let pair = [chars[cut - 2], chars[cut - 1]];
        BOUNDARIES.contains(&pair)
    })
}

/// Turns documents into [`DocumentChunk`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentProcessor {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for DocumentProcessor {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

impl DocumentProcessor {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self { chunk_size, overlap }
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.chunk_size, self.overlap)
    }

    /// Chunk a document and attach ids and metadata. Embeddings are left empty.
    pub fn process_document(
        &self,
        document_id: &str,
        text: &str,
        metadata: &DocumentMetadata,
    ) -> Vec<DocumentChunk> {
        let base = metadata.to_chunk_metadata();

        chunk_spans(text, self.chunk_size, self.overlap)
            .into_iter()
            .enumerate()
            .map(|(index, span)| {
                let mut chunk = DocumentChunk::new(document_id, index as u32, span.text);
                let mut meta = base.clone();
                meta.insert("char_start".into(), span.char_start.into());
                meta.insert("char_end".into(), span.char_end.into());
                meta.insert("content_hash".into(), content_hash(&chunk.content).into());
                chunk.metadata = meta;
                chunk
            })
            .collect()
    }
}

/// Hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
