//! Retention-window hard delete (D3), CLI `qmd cleanup`.
//!
//! Deliberately thin: the only design requirement is that hard deletion is
//! never an implicit side effect of ingest, only an explicit, windowed flow
//! a caller opts into. The integrity-check surface (orphan detection, FTS
//! rebuild) the teacher's doctor flows cover is out of scope here.

use anyhow::Result;
use chrono::{Duration, Utc};

use crate::store::Store;

const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Rerank cache entries older than this are evictable (§3: "Ollama/rerank
/// cache — read-through; entries older than seven days are evictable").
pub const RERANK_CACHE_TTL_DAYS: i64 = 7;

/// CLI entry point for `qmd cleanup` (§6.1). Hard-deletes documents that
/// have been inactive for longer than `older_than_days` (default 30), and
/// evicts stale rerank cache entries.
pub async fn run_cleanup(store: &dyn Store, older_than_days: Option<u32>) -> Result<()> {
    let days = older_than_days.unwrap_or(DEFAULT_RETENTION_DAYS);
    let cutoff = Utc::now() - Duration::days(days as i64);

    let deleted = store.hard_delete_expired(cutoff).await?;
    println!("cleanup: removed {} document(s) inactive for more than {} day(s)", deleted, days);

    let evicted = store.evict_rerank_cache(Duration::days(RERANK_CACHE_TTL_DAYS)).await?;
    println!("cleanup: evicted {} stale rerank cache entry(ies)", evicted);

    Ok(())
}
