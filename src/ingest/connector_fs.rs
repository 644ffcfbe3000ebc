//! Filesystem connector (§4.2.1): walks a collection root and yields its
//! Markdown files, sorted for deterministic ingest order. Generalises the
//! teacher's `connector_fs::scan_filesystem` — one connector kind instead of
//! a pluggable registry, and no binary-document extraction, since QMD
//! indexes Markdown text only.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSetBuilder};
use walkdir::WalkDir;

/// Directories never walked into, regardless of the collection's glob.
const SKIP_LIST: &[&str] = &["node_modules", ".git", ".cache", "dist", "build", "vendor"];

/// One file discovered under a collection root, already read as UTF-8.
pub struct ScannedFile {
    pub filepath: String,
    pub body: String,
}

/// A file the connector found but could not decode as UTF-8 (§4.2.1: skip,
/// log, and count — never fail the batch).
pub struct SkippedFile {
    pub filepath: String,
    pub reason: String,
}

#[derive(Default)]
pub struct ScanResult {
    pub files: Vec<ScannedFile>,
    pub skipped: Vec<SkippedFile>,
}

/// Walk `root`, keeping files that match `glob` and aren't under a skipped
/// directory or a hidden (dotfile) one. Returns files sorted by path.
pub fn scan(root: &Path, glob: &str) -> Result<ScanResult> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new(glob)?);
    let glob_set = builder.build()?;

    let mut result = ScanResult::default();
    let mut matched: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_entry(|e| !is_skipped(e.path(), root)) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if glob_set.is_match(&rel_str) {
            matched.push(path.to_path_buf());
        }
    }

    matched.sort();

    for path in matched {
        match std::fs::read_to_string(&path) {
            Ok(body) => result.files.push(ScannedFile {
                filepath: path.to_string_lossy().to_string(),
                body,
            }),
            Err(e) => result.skipped.push(SkippedFile {
                filepath: path.to_string_lossy().to_string(),
                reason: format!("not valid UTF-8: {}", e),
            }),
        }
    }

    Ok(result)
}

fn is_skipped(path: &Path, root: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        SKIP_LIST.contains(&name.as_ref()) || (name.starts_with('.') && name.as_ref() != ".")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_matching_markdown_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A").unwrap();
        std::fs::write(dir.path().join("b.txt"), "not markdown").unwrap();

        let result = scan(dir.path(), "**/*.md").unwrap();
        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].filepath.ends_with("a.md"));
    }

    #[test]
    fn skips_configured_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/nope.md"), "# nope").unwrap();
        std::fs::write(dir.path().join("kept.md"), "# kept").unwrap();

        let result = scan(dir.path(), "**/*.md").unwrap();
        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].filepath.ends_with("kept.md"));
    }

    #[test]
    fn skips_hidden_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".obsidian")).unwrap();
        std::fs::write(dir.path().join(".obsidian/config.md"), "# hidden").unwrap();
        std::fs::write(dir.path().join("visible.md"), "# visible").unwrap();

        let result = scan(dir.path(), "**/*.md").unwrap();
        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].filepath.ends_with("visible.md"));
    }

    #[test]
    fn results_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("z.md"), "z").unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();

        let result = scan(dir.path(), "**/*.md").unwrap();
        assert!(result.files[0].filepath.ends_with("a.md"));
        assert!(result.files[1].filepath.ends_with("z.md"));
    }
}
