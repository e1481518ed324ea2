//! Sentence-aligned text chunking.
//!
//! Splits extracted document text into overlapping windows of at most `max_size`
//! characters. When a window does not end at the end of the text, its right edge is
//! snapped back to the last sentence-terminating period found before the overlap
//! region, so chunks end on sentence boundaries when possible. Offsets are counted
//! in characters, not bytes, and refer to the trimmed span of each chunk.

use thiserror::Error;

/// Errors raised while validating chunking parameters.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunk size of zero can never make progress.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap at or above the chunk size would stall the window.
    #[error("chunk overlap ({overlap}) must be smaller than the chunk size ({max_size})")]
    OverlapExceedsChunkSize {
        /// Configured overlap in characters.
        overlap: usize,
        /// Configured maximum chunk size in characters.
        max_size: usize,
    },
}

/// A chunk of text with its `[start, end)` character offsets into the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkSlice {
    /// Trimmed chunk text.
    pub text: String,
    /// Character offset of the first retained character.
    pub start: usize,
    /// Character offset one past the last retained character.
    pub end: usize,
}

/// Split `text` into overlapping, sentence-aligned chunks.
///
/// Texts no longer than `max_size` are returned unchanged as a single chunk.
/// Otherwise a window of `max_size` characters advances through the text with the
/// requested `overlap`; windows are trimmed of surrounding whitespace and empty
/// results are skipped. A document with no sentence terminators falls back to hard
/// character cuts.
pub fn chunk_text(
    text: &str,
    max_size: usize,
    overlap: usize,
) -> Result<Vec<ChunkSlice>, ChunkingError> {
    if max_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if overlap >= max_size {
        return Err(ChunkingError::OverlapExceedsChunkSize { overlap, max_size });
    }

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    if total <= max_size {
        return Ok(vec![ChunkSlice {
            text: text.to_string(),
            start: 0,
            end: total,
        }]);
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let mut end = (start + max_size).min(total);

        // Not the last window: prefer ending just after the last period that
        // falls before the overlap region.
        if end < total {
            let search_end = end - overlap;
            if let Some(period) = (start..search_end).rev().find(|&i| chars[i] == '.') {
                if period > start {
                    end = period + 1;
                }
            }
        }

        if let Some(slice) = trimmed_slice(&chars, start, end) {
            chunks.push(slice);
        }

        if end >= total {
            break;
        }

        let next_start = end.saturating_sub(overlap);
        // Sentence snapping can pull the window back far enough that the overlap
        // would stall; drop the overlap for this step instead of looping.
        start = if next_start > start { next_start } else { end };
    }

    Ok(chunks)
}

fn trimmed_slice(chars: &[char], start: usize, end: usize) -> Option<ChunkSlice> {
    let mut from = start;
    let mut to = end;
    while from < to && chars[from].is_whitespace() {
        from += 1;
    }
    while to > from && chars[to - 1].is_whitespace() {
        to -= 1;
    }
    if from == to {
        return None;
    }
    Some(ChunkSlice {
        text: chars[from..to].iter().collect(),
        start: from,
        end: to,
    })
}
