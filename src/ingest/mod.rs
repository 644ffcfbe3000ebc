//! Ingest (§4.2): reconcile a collection directory with the Store.
//!
//! Reshapes the teacher's checkpoint-based `run_sync` (which tracked a
//! per-connector watermark and only revisited files touched since the last
//! run) into a full-reconciliation walk keyed on content hash: every file
//! under `root` is read and hashed on every `ingest` call, so a file edited
//! and reverted between syncs is correctly seen as unchanged.

pub mod connector_fs;
pub mod embed_pass;

use anyhow::Result;

use crate::hashing::content_hash;
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::store::{Store, UpsertOutcome};

pub use embed_pass::{embed, EmbedCounts};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounts {
    pub indexed: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub removed: u64,
    pub needs_embedding: u64,
}

/// Run the `ingest(root, glob)` algorithm (§4.2 steps 1-5).
pub async fn ingest(store: &dyn Store, root: &str, glob: &str, progress: &dyn SyncProgressReporter, cancel: &dyn Fn() -> bool) -> Result<IngestCounts> {
    let collection_id = store.put_collection(root, glob).await?;

    progress.report(SyncProgressEvent::Discovering { root: root.to_string() });
    let scan = connector_fs::scan(std::path::Path::new(root), glob)?;

    let total = scan.files.len() as u64;
    let mut seen = Vec::with_capacity(scan.files.len());
    let mut counts = IngestCounts::default();

    for (i, file) in scan.files.into_iter().enumerate() {
        if cancel() {
            break;
        }

        let hash = content_hash(file.body.as_bytes());
        let title = derive_title(&file.body, &file.filepath);
        let outcome = store.upsert_document(collection_id, &file.filepath, &title, &hash, &file.body).await?;

        match outcome {
            UpsertOutcome::Indexed => counts.indexed += 1,
            UpsertOutcome::Updated => counts.updated += 1,
            UpsertOutcome::Unchanged => counts.unchanged += 1,
            UpsertOutcome::Rejected => {}
        }
        if outcome != UpsertOutcome::Rejected {
            seen.push(file.filepath);
        }

        progress.report(SyncProgressEvent::Ingesting { root: root.to_string(), n: i as u64 + 1, total });
    }

    counts.removed = store.deactivate_missing(collection_id, &seen).await? as u64;
    counts.needs_embedding = store.hashes_needing_embedding().await?.len() as u64;

    Ok(counts)
}

/// Convenience wrapper with no progress reporting or cancellation, for the
/// CLI's default `add` path.
pub async fn ingest_quiet(store: &dyn Store, root: &str, glob: &str) -> Result<IngestCounts> {
    ingest(store, root, glob, &NoProgress, &|| false).await
}

/// First ATX heading (`# Title`) if present, else the basename without
/// extension (§4.2 step 3b).
fn derive_title(body: &str, filepath: &str) -> String {
    for line in body.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix('#') {
            let heading = rest.trim_start_matches('#').trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }
    }

    std::path::Path::new(filepath)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filepath.to_string())
}
