//! Token-bounded, overlapping windows over source text.

use tracing::debug;

use chronicler_shared::{Chunk, ChunkClassification};

use crate::tokenizer::Tokenizer;

/// Split `text` into chunks of `chunk_size` tokens, each starting `overlap`
/// tokens before the previous one ended.
///
/// `chunk_size` is clamped to at least 1 and `overlap` to below `chunk_size`.
/// Every chunk is an exact slice of `text`; together they cover it with no
/// gaps.
pub fn chunk_text(
    text: &str,
    tokenizer: &dyn Tokenizer,
    chunk_size: usize,
    overlap: usize,
) -> Vec<Chunk> {
    let spans = tokenizer.token_spans(text);
    if spans.is_empty() {
        return Vec::new();
    }

    let size = chunk_size.max(1);
    let overlap = overlap.min(size - 1);
    let step = size - overlap;
    let total = spans.len();

    let mut chunks = Vec::with_capacity(total.div_ceil(step));
    let mut token_start = 0;
    loop {
        let token_end = (token_start + size).min(total);
        let start_offset = spans[token_start].start;
        let end_offset = spans[token_end - 1].end;

        chunks.push(Chunk {
            sequence_index: chunks.len(),
            start_offset,
            end_offset,
            token_start,
            token_end,
            text: text[start_offset..end_offset].to_string(),
            classification: ChunkClassification::Unknown,
            extracted_content: String::new(),
        });

        if token_end == total {
            break;
        }
        token_start += step;
    }

    debug!(tokens = total, chunks = chunks.len(), size, overlap, "chunked text");
    chunks
}
