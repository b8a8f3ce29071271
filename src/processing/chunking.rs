//! Boundary-aware sliding-window chunking.
//!
//! Sizes are measured in characters. Each window ends at the strongest natural boundary found
//! in its trailing quarter: a paragraph break, then a sentence end, then clause punctuation,
//! then any whitespace. Only when none exist is the window cut hard at the target size.
//! Consecutive windows overlap by roughly `overlap` characters, with the next window's start
//! snapped to a nearby sentence or word start so chunks rarely open mid-word.

use thiserror::Error;

/// Errors produced while validating chunking parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    /// Target chunk size was zero.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap was not smaller than the target size.
    #[error("chunk overlap {overlap} must be smaller than chunk size {target_size}")]
    InvalidOverlap {
        /// Requested overlap.
        overlap: usize,
        /// Requested target size.
        target_size: usize,
    },
}

/// Chunk sizing parameters, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Upper bound for a window.
    pub target_size: usize,
    /// Characters shared by consecutive windows.
    pub overlap: usize,
    /// Trailing remainders shorter than this are candidates for dropping.
    pub min_chunk_size: usize,
    /// Trailing remainders longer than this are always kept.
    pub min_trailing_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: 1000,
            overlap: 200,
            min_chunk_size: 100,
            min_trailing_chars: 10,
        }
    }
}

impl ChunkingConfig {
    /// Check that the parameters can produce progress.
    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.target_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if self.overlap >= self.target_size {
            return Err(ChunkingError::InvalidOverlap {
                overlap: self.overlap,
                target_size: self.target_size,
            });
        }
        Ok(())
    }
}

/// A chunk of text with its character offsets in the normalized document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Position of the chunk within the document.
    pub index: usize,
    /// Offset of the first character (inclusive).
    pub start: usize,
    /// Offset one past the last character.
    pub end: usize,
    /// Trimmed chunk text.
    pub text: String,
}

/// Split `text` into overlapping spans.
///
/// Start offsets are strictly increasing. Whitespace-only input yields no spans.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<ChunkSpan>, ChunkingError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut spans: Vec<ChunkSpan> = Vec::new();
    let mut start = 0usize;

    loop {
        while start < len && chars[start].is_whitespace() {
            start += 1;
        }
        if start >= len {
            break;
        }

        let window_end = (start + config.target_size).min(len);
        let end = if window_end == len {
            len
        } else {
            find_boundary(&chars, start, window_end, config.target_size)
        };

        let mut trimmed_end = end;
        while trimmed_end > start && chars[trimmed_end - 1].is_whitespace() {
            trimmed_end -= 1;
        }
        let span_len = trimmed_end - start;

        let is_tail = end >= len;
        if is_tail
            && !spans.is_empty()
            && span_len < config.min_chunk_size
            && span_len <= config.min_trailing_chars
        {
            tracing::trace!(chars = span_len, "Dropping short trailing remainder");
            break;
        }

        spans.push(ChunkSpan {
            index: spans.len(),
            start,
            end: trimmed_end,
            text: chars[start..trimmed_end].iter().collect(),
        });

        if is_tail {
            break;
        }

        let candidate = end.saturating_sub(config.overlap);
        let snapped = snap_start(&chars, candidate, config.overlap / 4, start);
        start = if snapped > start { snapped } else { end };
    }

    Ok(spans)
}

/// Pick the end offset for a window that stops before the end of the document.
fn find_boundary(chars: &[char], start: usize, window_end: usize, target_size: usize) -> usize {
    let search_from = window_end
        .saturating_sub((target_size / 4).max(1))
        .max(start + 1);
    let region = || (search_from..window_end).rev();
    let followed_by_space = |i: usize| chars.get(i + 1).is_some_and(|c| c.is_whitespace());

    if let Some(i) = region().find(|&i| chars[i] == '\n' && chars.get(i + 1) == Some(&'\n')) {
        return i;
    }
    if let Some(i) = region().find(|&i| {
        chars[i] == '\n' || (matches!(chars[i], '.' | '!' | '?') && followed_by_space(i))
    }) {
        return if chars[i] == '\n' { i } else { i + 1 };
    }
    if let Some(i) = region().find(|&i| matches!(chars[i], ',' | ';' | ':') && followed_by_space(i)) {
        return i + 1;
    }
    if let Some(i) = region().find(|&i| chars[i].is_whitespace()) {
        return i;
    }
    window_end
}

/// Move `candidate` to the nearest sentence start, else word start, within `radius`.
fn snap_start(chars: &[char], candidate: usize, radius: usize, current: usize) -> usize {
    let in_range = |p: usize| p > current && p < chars.len();
    let nearest = |accept: &dyn Fn(usize) -> bool| {
        (0..=radius).find_map(|distance| {
            let before = candidate.checked_sub(distance).filter(|&p| in_range(p) && accept(p));
            let after = Some(candidate + distance).filter(|&p| in_range(p) && accept(p));
            before.or(after)
        })
    };

    nearest(&|p| is_sentence_start(chars, p))
        .or_else(|| nearest(&|p| is_word_start(chars, p)))
        .unwrap_or(candidate)
}

fn is_word_start(chars: &[char], p: usize) -> bool {
    !chars[p].is_whitespace() && (p == 0 || chars[p - 1].is_whitespace())
}

fn is_sentence_start(chars: &[char], p: usize) -> bool {
    if p == 0 {
        return true;
    }
    if !is_word_start(chars, p) {
        return false;
    }
    let mut q = p - 1;
    while q > 0 && chars[q].is_whitespace() {
        if chars[q] == '\n' {
            return true;
        }
        q -= 1;
    }
    chars[q] == '\n' || matches!(chars[q], '.' | '!' | '?')
}
