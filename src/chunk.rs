//! Overlapping token-window chunker.
//!
//! Text is tokenized on whitespace and cut into windows of at most
//! `max_tokens` tokens, each starting `max_tokens - overlap_tokens` tokens
//! after the previous one. The last window always ends at the final token,
//! so every token lands in at least one window.
//!
//! ```text
//! tokens:  t0 t1 t2 t3 t4 t5 t6 t7 t8
//! max=4, overlap=1 (step 3)
//! w0:      t0 t1 t2 t3
//! w1:               t3 t4 t5 t6
//! w2:                        t6 t7 t8
//! ```
//!
//! [`TokenWindows`] is a lazy iterator over windows; it is `Clone`, and
//! [`TokenWindows::restart`] rewinds it to the first window. Window text is
//! sliced from the original input, so interior whitespace is preserved.
//!
//! Tokens are approximated by whitespace-delimited words.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

use crate::models::{DocumentChunk, TextUnit};

/// One window over the token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window<'a> {
    pub index: usize,
    /// First token (inclusive).
    pub start_token: usize,
    /// Last token (exclusive).
    pub end_token: usize,
    pub text: &'a str,
}

impl Window<'_> {
    pub fn token_count(&self) -> usize {
        self.end_token - self.start_token
    }
}

#[derive(Debug, Clone)]
pub struct TokenWindows<'a> {
    text: &'a str,
    spans: Vec<(usize, usize)>,
    max_tokens: usize,
    step: usize,
    next_start: usize,
    index: usize,
    done: bool,
}

impl<'a> TokenWindows<'a> {
    pub fn new(text: &'a str, max_tokens: usize, overlap_tokens: usize) -> Result<Self> {
        if max_tokens == 0 {
            bail!("window size must be > 0");
        }
        if overlap_tokens >= max_tokens {
            bail!(
                "overlap ({}) must be smaller than window size ({})",
                overlap_tokens,
                max_tokens
            );
        }
        Ok(Self {
            text,
            spans: token_spans(text),
            max_tokens,
            step: max_tokens - overlap_tokens,
            next_start: 0,
            index: 0,
            done: false,
        })
    }

    /// Number of whitespace tokens in the input.
    pub fn token_count(&self) -> usize {
        self.spans.len()
    }

    /// Rewind to the first window.
    pub fn restart(&mut self) {
        self.next_start = 0;
        self.index = 0;
        self.done = false;
    }
}

impl<'a> Iterator for TokenWindows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next_start >= self.spans.len() {
            return None;
        }

        let start = self.next_start;
        let end = (start + self.max_tokens).min(self.spans.len());
        let text: &'a str = self.text;
        let window = Window {
            index: self.index,
            start_token: start,
            end_token: end,
            text: &text[self.spans[start].0..self.spans[end - 1].1],
        };

        self.index += 1;
        if end == self.spans.len() {
            self.done = true;
        } else {
            self.next_start = start + self.step;
        }
        Some(window)
    }
}

fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Chunk each unit independently so every chunk keeps its unit's
/// provenance. Units with no tokens produce no chunks.
pub fn chunk_units(
    units: &[TextUnit],
    max_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<DocumentChunk>> {
    let mut chunks = Vec::new();
    for (ordinal, unit) in units.iter().enumerate() {
        for window in TokenWindows::new(&unit.text, max_tokens, overlap_tokens)? {
            chunks.push(make_chunk(unit, ordinal, window.index as i64, window.text));
        }
    }
    Ok(chunks)
}

/// Chunk ids derive from source, unit position, window index and text, so
/// re-indexing the same file into the same namespace replaces its rows.
fn make_chunk(unit: &TextUnit, ordinal: usize, index: i64, text: &str) -> DocumentChunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
    let id = format!(
        "{:x}",
        Sha256::digest(format!("{}\u{0}{}\u{0}{}\u{0}{}", unit.source, ordinal, index, hash).as_bytes())
    );

    DocumentChunk {
        id: id[..32].to_string(),
        source: unit.source.clone(),
        location: unit.location,
        kind: unit.kind,
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

/// At most `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
