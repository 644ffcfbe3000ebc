//! Index path resolution and display-path derivation (§4.6).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Resolve the database file path for an index, in priority order:
/// a project-local `.qmd/<name>.db`, then `QMD_CACHE_DIR`, then
/// `XDG_CACHE_HOME`, then the platform user cache dir.
pub fn db_path(index_name: &str) -> PathBuf {
    let project_local = PathBuf::from(".qmd").join(format!("{}.db", index_name));
    if PathBuf::from(".qmd").is_dir() || project_local.exists() {
        return project_local;
    }

    if let Ok(dir) = std::env::var("QMD_CACHE_DIR") {
        return PathBuf::from(dir).join(format!("{}.db", index_name));
    }

    if let Ok(dir) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(dir)
            .join("qmd")
            .join(format!("{}.db", index_name));
    }

    user_cache_dir().join(format!("{}.db", index_name))
}

fn user_cache_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".cache").join("qmd");
    }
    PathBuf::from(".cache").join("qmd")
}

/// Compute the shortest suffix of `filepath` (relative to `collection_root`,
/// at least two path segments when available) that is unique among
/// `existing`. Per D2 this is evaluated at insertion time only — the result
/// is not re-derived later for stability.
pub fn display_path(filepath: &Path, collection_root: &Path, existing: &HashSet<String>) -> String {
    let relative = filepath.strip_prefix(collection_root).unwrap_or(filepath);
    let segments: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str().unwrap_or(""))
        .collect();

    if segments.is_empty() {
        return String::new();
    }

    let min_segments = segments.len().min(2);
    for take in min_segments..=segments.len() {
        let candidate = segments[segments.len() - take..].join("/");
        if !existing.contains(&candidate) {
            return candidate;
        }
    }

    // All suffixes collide (pathological case): fall back to the full relative path.
    segments.join("/")
}
