//! Snippet extraction (§4.3 step 6) and line-number annotation for `get`.

const SNIPPET_WINDOW: usize = 300;

/// A snippet and the 1-based line on which it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub text: String,
    pub start_line: usize,
}

/// Extract up to 300 chars centred on the first case-insensitive occurrence
/// of any token in `query_tokens`; falls back to the document's first 300
/// chars when nothing matches.
pub fn extract_snippet(body: &str, query_tokens: &[&str]) -> Snippet {
    let lower = body.to_lowercase();
    let byte_pos = query_tokens
        .iter()
        .filter(|t| !t.is_empty())
        .filter_map(|t| lower.find(&t.to_lowercase()))
        .min();

    match byte_pos {
        Some(pos) => windowed_snippet(body, pos),
        None => windowed_snippet(body, 0),
    }
}

fn windowed_snippet(body: &str, center_byte: usize) -> Snippet {
    if body.is_empty() {
        return Snippet { text: String::new(), start_line: 1 };
    }

    let half = SNIPPET_WINDOW / 2;
    let start = byte_offset_back(body, center_byte, half);
    let end = byte_offset_forward(body, start, SNIPPET_WINDOW);

    let mut text = body[start..end].to_string();
    if start > 0 {
        text = format!("...{}", text);
    }
    if end < body.len() {
        text = format!("{}...", text);
    }

    let start_line = 1 + body[..start].matches('\n').count();
    Snippet { text, start_line }
}

fn byte_offset_back(body: &str, from: usize, chars_back: usize) -> usize {
    let mut offset = from.min(body.len());
    let mut remaining = chars_back;
    while remaining > 0 && offset > 0 {
        offset -= 1;
        while !body.is_char_boundary(offset) && offset > 0 {
            offset -= 1;
        }
        remaining -= 1;
    }
    offset
}

fn byte_offset_forward(body: &str, from: usize, chars_forward: usize) -> usize {
    let mut offset = from.min(body.len());
    let mut remaining = chars_forward;
    while remaining > 0 && offset < body.len() {
        offset += 1;
        while offset < body.len() && !body.is_char_boundary(offset) {
            offset += 1;
        }
        remaining -= 1;
    }
    offset
}

/// Prepend `from_line..` 1-based line numbers to a body slice, for the CLI
/// `get` printer (§4.6.1).
pub fn add_line_numbers(text: &str, from_line: usize) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| format!("{}: {}", from_line + i, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_snippet_around_first_match() {
        let body = format!("{}NEEDLE{}", "a".repeat(500), "b".repeat(500));
        let snippet = extract_snippet(&body, &["needle"]);
        assert!(snippet.text.to_lowercase().contains("needle"));
        assert!(snippet.text.starts_with("..."));
        assert!(snippet.text.ends_with("..."));
    }

    #[test]
    fn falls_back_to_document_start_when_no_match() {
        let body = "no matches anywhere in this text".repeat(20);
        let snippet = extract_snippet(&body, &["zzzznotfound"]);
        assert!(body.starts_with(&snippet.text.trim_end_matches("...").to_string()[..20]));
    }

    #[test]
    fn records_correct_start_line() {
        let body = format!("line one\nline two\n{}NEEDLE more text here", "pad ".repeat(100));
        let snippet = extract_snippet(&body, &["needle"]);
        assert_eq!(snippet.start_line, 3);
    }

    #[test]
    fn respects_utf8_boundaries() {
        let body = format!("{}NEEDLE{}", "café ".repeat(100), "b".repeat(500));
        let snippet = extract_snippet(&body, &["needle"]);
        assert!(snippet.text.to_lowercase().contains("needle"));
    }

    #[test]
    fn add_line_numbers_starts_at_given_line() {
        let out = add_line_numbers("a\nb\nc", 10);
        assert!(out.starts_with("10: a"));
        assert!(out.contains("12: c"));
    }
}
