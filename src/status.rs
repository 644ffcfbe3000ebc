//! Index status reporting (§4.1 `status()`, CLI `qmd status`).
//!
//! Generalises the teacher's `stats.rs` (a bespoke set of COUNT queries over
//! a fixed `documents`/`chunks`/`checkpoints` schema) into a thin printer
//! over `Store::status()`, since the aggregation itself now lives behind the
//! `Store` trait and must work identically for SQLite and the in-memory
//! double.

use anyhow::Result;

use crate::format::format_time_ago;
use crate::store::Store;

/// CLI entry point for `qmd status` (§6.1).
pub async fn run_status(store: &dyn Store, index_name: &str) -> Result<()> {
    let status = store.status().await?;

    println!("qmd — index status ({})", index_name);
    println!("{}", "=".repeat(24 + index_name.len()));
    println!();
    println!("  Documents:       {}", status.total_documents);
    println!(
        "  Needs embedding: {} ({}%)",
        status.needs_embedding,
        embedded_percent(status.total_documents, status.needs_embedding)
    );
    println!("  Vector index:    {}", if status.has_vector_index { "present" } else { "absent" });

    if !status.collections.is_empty() {
        println!();
        println!("  By collection:");
        println!("  {:<40} {:>8}   {}", "ROOT", "DOCS", "LAST UPDATED");
        println!("  {}", "-".repeat(70));
        for c in &status.collections {
            let updated = c.last_updated.map(format_time_ago).unwrap_or_else(|| "never".to_string());
            println!("  {:<40} {:>8}   {}", c.root_path, c.documents, updated);
        }
    }
    println!();

    Ok(())
}

fn embedded_percent(total: i64, needs_embedding: i64) -> i64 {
    if total == 0 {
        return 0;
    }
    let embedded = (total - needs_embedding).max(0);
    (embedded * 100) / total
}
