//! Ingest and embed progress reporting (§4.2.3).
//!
//! Progress is emitted on **stderr** so stdout remains parseable for
//! scripts, matching the teacher's `progress.rs` event shape. The
//! TTY-detection and JSON CLI modes are out of scope (§1) — only the
//! human-readable reporter and a no-op survive.

use std::io::Write;

/// A single progress event for ingest.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Walking `root` for files matching the collection's glob; total unknown.
    Discovering { root: String },
    /// Ingesting file `n` of `total`.
    Ingesting { root: String, n: u64, total: u64 },
    /// Embedding chunk `n` of `total` for the current embedding pass.
    Embedding { n: u64, total: u64 },
}

/// Reports ingest/embed progress. Called from the ingest pipeline between
/// files and between chunks (§4.2.3).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "ingest /r  1,234 / 5,000 files".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Discovering { root } => format!("ingest {}  discovering...\n", root),
            SyncProgressEvent::Ingesting { root, n, total } => {
                format!("ingest {}  {} / {} files\n", root, format_number(*n), format_number(*total))
            }
            SyncProgressEvent::Embedding { n, total } => {
                format!("embed  {} / {} chunks\n", format_number(*n), format_number(*total))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// No-op reporter, used by the MCP server and tests where progress has no observer.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
