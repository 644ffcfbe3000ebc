//! Paragraph-aware, overlapping-window text chunker (§4.2.2).
//!
//! Generalises the non-overlapping paragraph chunker this was built from:
//! position is a byte offset into the UTF-8 body (Design Notes §9), chunks
//! prefer to break at a blank-line paragraph boundary at or before the
//! character limit, and every chunk after the first restarts `overlap_chars`
//! characters before the previous chunk's end.

/// One chunk of a document body: 0-based sequence number, byte offset into
/// the body, and the chunk's own text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    pub seq: usize,
    pub pos: usize,
    pub text: String,
}

/// Split `body` into overlapping chunks of at most `chunk_chars` characters,
/// each restarting `overlap_chars` characters before the prior chunk's end.
/// Always returns at least one chunk, even for empty input.
pub fn chunk_text(body: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<ContentChunk> {
    if body.is_empty() {
        return vec![ContentChunk {
            seq: 0,
            pos: 0,
            text: String::new(),
        }];
    }

    if char_count(body) <= chunk_chars {
        return vec![ContentChunk {
            seq: 0,
            pos: 0,
            text: body.to_string(),
        }];
    }

    let breaks = paragraph_breaks(body);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut seq = 0usize;

    loop {
        let limit = byte_offset_after_chars(body, start, chunk_chars);
        let min_end = byte_offset_after_chars(body, start, 1);

        let end = breaks
            .iter()
            .rev()
            .find(|&&bp| bp > start && bp <= limit)
            .copied()
            .unwrap_or(limit)
            .max(min_end)
            .min(body.len());

        chunks.push(ContentChunk {
            seq,
            pos: start,
            text: body[start..end].to_string(),
        });
        seq += 1;

        if end >= body.len() {
            break;
        }

        let overlap_start = byte_offset_back_chars(body, end, overlap_chars);
        start = overlap_start.max(min_end);
    }

    chunks
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset `n` characters after `from` (a char boundary), clamped to
/// `s.len()`. The result is always a char boundary.
fn byte_offset_after_chars(s: &str, from: usize, n: usize) -> usize {
    if n == 0 {
        return from;
    }
    s[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(s.len())
}

/// Byte offset `n` characters before `from` (a char boundary), clamped to 0.
fn byte_offset_back_chars(s: &str, from: usize, n: usize) -> usize {
    if n == 0 {
        return from;
    }
    s[..from]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Byte offsets marking the end of each paragraph's content, i.e. the start
/// of each blank-line separator ("\n\n") — the separator itself is never
/// included in either neighbouring chunk.
fn paragraph_breaks(s: &str) -> Vec<usize> {
    let mut breaks = Vec::new();
    let mut search_from = 0;
    while let Some(rel) = s[search_from..].find("\n\n") {
        let at = search_from + rel;
        breaks.push(at);
        search_from = search_from + rel + 2;
    }
    breaks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_yields_one_empty_chunk() {
        let chunks = chunk_text("", 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].pos, 0);
        assert_eq!(chunks[0].text, "");
    }

    #[test]
    fn short_body_is_a_single_chunk() {
        let chunks = chunk_text("hello world", 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
    }

    #[test]
    fn positions_are_strictly_increasing() {
        let body = "word ".repeat(200);
        let chunks = chunk_text(&body, 50, 10);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].pos > pair[0].pos);
        }
    }

    #[test]
    fn sequence_numbers_are_dense_from_zero() {
        let body = "word ".repeat(200);
        let chunks = chunk_text(&body, 50, 10);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.seq, i);
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let body = (0..40)
            .map(|i| format!("sentence{} ", i))
            .collect::<String>();
        let chunks = chunk_text(&body, 60, 20);
        for pair in chunks.windows(2) {
            let prev_end = pair[0].pos + pair[0].text.len();
            // the next chunk starts strictly before the previous one ended,
            // i.e. they share some text, except where a hard limit forces otherwise.
            assert!(pair[1].pos < prev_end);
        }
    }

    #[test]
    fn prefers_paragraph_boundary_over_hard_limit() {
        let body = format!("{}\n\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = chunk_text(&body, 40, 5);
        // the first chunk should end exactly at the paragraph break (byte 32),
        // not part-way through the second paragraph.
        assert_eq!(&chunks[0].text, &"a".repeat(30));
    }

    #[test]
    fn respects_utf8_char_boundaries() {
        let body = "café ".repeat(100);
        // must not panic slicing multi-byte characters
        let chunks = chunk_text(&body, 37, 10);
        for c in &chunks {
            assert!(body.is_char_boundary(c.pos));
        }
    }

    #[test]
    fn deterministic() {
        let body = "word ".repeat(200);
        let a = chunk_text(&body, 50, 10);
        let b = chunk_text(&body, 50, 10);
        assert_eq!(a, b);
    }
}
