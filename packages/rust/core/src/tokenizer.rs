//! Token boundaries for chunking.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

/// Splits text into contiguous token spans.
///
/// Spans must tile the input: the first starts at 0, each starts where the
/// previous one ended, and the last ends at `text.len()`. Chunks built from
/// them are then exact slices of the source text.
pub trait Tokenizer: Send + Sync {
    /// Byte ranges of every token, in order.
    fn token_spans(&self, text: &str) -> Vec<Range<usize>>;

    fn count_tokens(&self, text: &str) -> usize {
        self.token_spans(text).len()
    }
}

/// One token per whitespace-separated word, trailing whitespace included.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        static WORD_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\S+\s*").expect("valid regex"));

        if text.is_empty() {
            return Vec::new();
        }

        let mut spans: Vec<Range<usize>> = WORD_RE.find_iter(text).map(|m| m.range()).collect();
        match spans.first_mut() {
            // Leading whitespace belongs to the first word.
            Some(first) => first.start = 0,
            None => spans.push(0..text.len()),
        }
        spans
    }
}
