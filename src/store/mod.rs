//! Store abstraction (§4.1): persistence and retrieval primitives shared by
//! Ingest, Retrieval, and the CLI/MCP surfaces.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Outcome of `upsert_document`, per §4.1's contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Indexed,
    Updated,
    Unchanged,
    Rejected,
}

/// One lexical (FTS) search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct FtsHit {
    pub document_id: i64,
    pub file: String,
    pub display_path: String,
    pub title: String,
    pub body: String,
    /// Normalised BM25 score in [0, 1].
    pub score: f64,
    /// Raw (pre-normalisation) BM25 score, used by the strong-signal probe.
    pub raw_score: f64,
}

/// One vector (ANN) search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VecHit {
    pub document_id: i64,
    pub file: String,
    pub display_path: String,
    pub title: String,
    pub body: String,
    /// Cosine similarity mapped to [0, 1] via `(1 + cos) / 2`.
    pub score: f64,
    pub chunk_pos: Option<usize>,
}

/// A single `(content_hash, seq)` vector to persist.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub seq: i64,
    pub pos: i64,
    pub vector: Vec<f32>,
}

/// A document row as returned by `find_document` / `get_body`.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: i64,
    pub collection_id: i64,
    pub filepath: String,
    pub display_path: Option<String>,
    pub title: String,
    pub content_hash: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub active: bool,
}

/// Result of `find_document`.
pub enum FindResult {
    Found(DocumentRecord),
    NotFound { similar_paths: Vec<String> },
}

/// Result of `find_documents`.
#[derive(Debug, Default)]
pub struct FindManyResult {
    pub matches: Vec<DocumentRecord>,
    pub skipped: Vec<SkippedMatch>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SkippedMatch {
    pub filepath: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct FindManyOptions {
    pub include_body: bool,
    pub max_bytes: Option<usize>,
}

/// Aggregate index status (§4.1 `status()`).
#[derive(Debug, Clone)]
pub struct StoreStatus {
    pub total_documents: i64,
    pub needs_embedding: i64,
    pub has_vector_index: bool,
    pub collections: Vec<CollectionStatus>,
}

#[derive(Debug, Clone)]
pub struct CollectionStatus {
    pub name: String,
    pub root_path: String,
    pub glob_pattern: String,
    pub documents: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Persistence and retrieval primitives for one index. All write operations
/// are single SQL transactions: on failure they raise with no partial state
/// visible (§4.1 failure policy).
#[async_trait]
pub trait Store: Send + Sync {
    async fn put_collection(&self, root: &str, glob: &str) -> anyhow::Result<i64>;

    /// Insert, update, or reject a document per the contract in §4.1.
    async fn upsert_document(
        &self,
        collection_id: i64,
        filepath: &str,
        title: &str,
        content_hash: &str,
        body: &str,
    ) -> anyhow::Result<UpsertOutcome>;

    /// Deactivate every active document in `collection_id` whose filepath is
    /// not in `seen_paths`, then sweep orphaned vectors (§4.1.1) in the same
    /// transaction. Returns the count of deactivated rows.
    async fn deactivate_missing(&self, collection_id: i64, seen_paths: &[String]) -> anyhow::Result<i64>;

    async fn search_fts(
        &self,
        query: &str,
        limit: usize,
        collections_filter: Option<&[i64]>,
    ) -> anyhow::Result<Vec<FtsHit>>;

    async fn search_vec(
        &self,
        embedding: &[f32],
        limit: usize,
        collections_filter: Option<&[i64]>,
    ) -> anyhow::Result<Vec<VecHit>>;

    /// Create the vector-index table if absent; drop and recreate on
    /// dimension mismatch (V3).
    async fn ensure_vector_index(&self, dimension: usize) -> anyhow::Result<()>;

    /// Transactional insert of vectors for one content hash (upholds V1/V2).
    async fn insert_vectors(&self, content_hash: &str, entries: &[VectorEntry], model: &str) -> anyhow::Result<()>;

    /// Transactional delete of all vectors for one content hash (upholds V2).
    async fn delete_vectors(&self, content_hash: &str) -> anyhow::Result<()>;

    /// Distinct active content hashes with no `seq=0` vector row yet.
    async fn hashes_needing_embedding(&self) -> anyhow::Result<Vec<(String, String, String)>>;

    /// Delete every vector for every active document and drop/reset the
    /// vector-index table (§4.2 embed step 1, `force` mode).
    async fn reset_all_vectors(&self) -> anyhow::Result<()>;

    /// 1-indexed line slicing: inclusive at `from_line`, exclusive at
    /// `from_line + max_lines`.
    async fn get_body(
        &self,
        doc_or_hash: &str,
        from_line: Option<usize>,
        max_lines: Option<usize>,
    ) -> anyhow::Result<Option<String>>;

    async fn find_document(&self, path_or_docid: &str, include_body: bool) -> anyhow::Result<FindResult>;

    async fn find_documents(&self, glob_or_csv: &str, options: FindManyOptions) -> anyhow::Result<FindManyResult>;

    async fn status(&self) -> anyhow::Result<StoreStatus>;

    async fn log_search(&self, command: &str, query: &str, result_count: usize, index_name: &str) -> anyhow::Result<()>;

    /// Longest-prefix match of `filepath` against `path_contexts` (§4.3 step
    /// 7, §4.4 resource reads).
    async fn get_context(&self, filepath: &str) -> anyhow::Result<Option<String>>;

    /// Permanently delete every inactive document (and its now-orphaned
    /// vectors) last modified before `older_than` (D3: hard deletion is an
    /// explicit, retention-windowed flow — never an implicit side effect of
    /// ingest). Returns the count of documents deleted.
    async fn hard_delete_expired(&self, older_than: DateTime<Utc>) -> anyhow::Result<i64>;

    /// Read-through rerank cache lookup (§3 "Ollama/rerank cache"). Returns
    /// `None` on a miss or if the entry is older than `max_age`.
    async fn get_cached_rerank(&self, key: &str, max_age: chrono::Duration) -> anyhow::Result<Option<String>>;

    /// Write (or overwrite) a rerank cache entry.
    async fn put_cached_rerank(&self, key: &str, result_json: &str) -> anyhow::Result<()>;

    /// Evict rerank cache entries older than `max_age`. Returns the count
    /// evicted.
    async fn evict_rerank_cache(&self, max_age: chrono::Duration) -> anyhow::Result<i64>;

    /// Releases the handle. Safe to call more than once.
    async fn close(&self);
}
