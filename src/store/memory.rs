//! In-process `Store` test double. Mirrors `SqliteStore`'s contract (§4.1)
//! without a database: a lexical scan in place of FTS5, a linear cosine
//! scan in place of `vec0`. Used by retrieval/ingest unit tests that need a
//! `Store` without paying for a SQLite file.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::hashing::matches_short_hash;
use crate::model_runtime::cosine_similarity;
use crate::path_util::display_path;

use super::{
    CollectionStatus, DocumentRecord, FindManyOptions, FindManyResult, FindResult, FtsHit, SkippedMatch, Store,
    StoreStatus, UpsertOutcome, VecHit, VectorEntry,
};

#[derive(Clone)]
struct Collection {
    id: i64,
    root_path: String,
    glob_pattern: String,
}

#[derive(Clone)]
struct VectorRow {
    pos: i64,
    vector: Vec<f32>,
}

#[derive(Clone)]
struct RerankCacheEntry {
    result_json: String,
    created_at: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct State {
    collections: Vec<Collection>,
    documents: Vec<DocumentRecord>,
    next_doc_id: i64,
    vectors: HashMap<(String, i64), VectorRow>,
    vector_dim: Option<usize>,
    search_history: Vec<(String, String, usize, String)>,
    path_contexts: HashMap<String, String>,
    rerank_cache: HashMap<String, RerankCacheEntry>,
}

pub struct InMemoryStore {
    state: Mutex<State>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_doc_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Test/fixture helper: seed a `path_contexts` entry directly.
    pub fn set_context(&self, path_prefix: &str, context: &str) {
        let mut state = self.state.lock().unwrap();
        state.path_contexts.insert(path_prefix.to_string(), context.to_string());
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_collection(&self, root: &str, glob: &str) -> anyhow::Result<i64> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .collections
            .iter()
            .find(|c| c.root_path == root && c.glob_pattern == glob)
        {
            return Ok(existing.id);
        }
        let id = state.collections.len() as i64 + 1;
        state.collections.push(Collection {
            id,
            root_path: root.to_string(),
            glob_pattern: glob.to_string(),
        });
        Ok(id)
    }

    async fn upsert_document(
        &self,
        collection_id: i64,
        filepath: &str,
        title: &str,
        content_hash: &str,
        body: &str,
    ) -> anyhow::Result<UpsertOutcome> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        if let Some(pos) = state
            .documents
            .iter()
            .position(|d| d.filepath == filepath && d.active)
        {
            if state.documents[pos].collection_id != collection_id {
                return Ok(UpsertOutcome::Rejected);
            }
            if state.documents[pos].content_hash == content_hash {
                state.documents[pos].title = title.to_string();
                return Ok(UpsertOutcome::Unchanged);
            }

            state.documents[pos].active = false;
            state.documents[pos].modified_at = now;

            let root_path = state
                .collections
                .iter()
                .find(|c| c.id == collection_id)
                .map(|c| c.root_path.clone())
                .unwrap_or_default();
            let existing: HashSet<String> = state
                .documents
                .iter()
                .filter(|d| d.active)
                .filter_map(|d| d.display_path.clone())
                .collect();
            let new_display = display_path(std::path::Path::new(filepath), std::path::Path::new(&root_path), &existing);

            let id = state.next_doc_id;
            state.next_doc_id += 1;
            state.documents.push(DocumentRecord {
                id,
                collection_id,
                filepath: filepath.to_string(),
                display_path: Some(new_display),
                title: title.to_string(),
                content_hash: content_hash.to_string(),
                body: body.to_string(),
                created_at: now,
                modified_at: now,
                active: true,
            });
            return Ok(UpsertOutcome::Updated);
        }

        let root_path = state
            .collections
            .iter()
            .find(|c| c.id == collection_id)
            .map(|c| c.root_path.clone())
            .unwrap_or_default();
        let existing: HashSet<String> = state
            .documents
            .iter()
            .filter(|d| d.active)
            .filter_map(|d| d.display_path.clone())
            .collect();
        let new_display = display_path(std::path::Path::new(filepath), std::path::Path::new(&root_path), &existing);

        let id = state.next_doc_id;
        state.next_doc_id += 1;
        state.documents.push(DocumentRecord {
            id,
            collection_id,
            filepath: filepath.to_string(),
            display_path: Some(new_display),
            title: title.to_string(),
            content_hash: content_hash.to_string(),
            body: body.to_string(),
            created_at: now,
            modified_at: now,
            active: true,
        });
        Ok(UpsertOutcome::Indexed)
    }

    async fn deactivate_missing(&self, collection_id: i64, seen_paths: &[String]) -> anyhow::Result<i64> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let seen: HashSet<&String> = seen_paths.iter().collect();

        let mut deactivated = 0i64;
        for doc in state.documents.iter_mut() {
            if doc.collection_id == collection_id && doc.active && !seen.contains(&doc.filepath) {
                doc.active = false;
                doc.modified_at = now;
                deactivated += 1;
            }
        }

        let live_hashes: HashSet<String> = state
            .documents
            .iter()
            .filter(|d| d.active)
            .map(|d| d.content_hash.clone())
            .collect();
        state.vectors.retain(|(hash, _), _| live_hashes.contains(hash));

        Ok(deactivated)
    }

    async fn search_fts(&self, query: &str, limit: usize, collections_filter: Option<&[i64]>) -> anyhow::Result<Vec<FtsHit>> {
        let state = self.state.lock().unwrap();
        let needle = query.to_lowercase();
        let terms: Vec<&str> = needle.split_whitespace().collect();

        let mut hits: Vec<FtsHit> = Vec::new();
        for doc in state.documents.iter().filter(|d| d.active) {
            if let Some(ids) = collections_filter {
                if !ids.is_empty() && !ids.contains(&doc.collection_id) {
                    continue;
                }
            }
            let haystack = doc.body.to_lowercase();
            let matches = terms.iter().filter(|t| haystack.contains(**t)).count();
            if matches == 0 {
                continue;
            }
            let raw_score = matches as f64;
            let normalized = raw_score / (raw_score + 1.0);
            hits.push(FtsHit {
                document_id: doc.id,
                display_path: doc.display_path.clone().unwrap_or_else(|| doc.filepath.clone()),
                file: doc.filepath.clone(),
                title: doc.title.clone(),
                body: doc.body.clone(),
                score: normalized,
                raw_score,
            });
        }
        hits.sort_by(|a, b| b.raw_score.partial_cmp(&a.raw_score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn search_vec(&self, embedding: &[f32], limit: usize, collections_filter: Option<&[i64]>) -> anyhow::Result<Vec<VecHit>> {
        let state = self.state.lock().unwrap();

        let mut scored: Vec<(String, i64, f64)> = state
            .vectors
            .iter()
            .map(|((hash, seq), row)| (hash.clone(), *seq, cosine_similarity(embedding, &row.vector) as f64))
            .collect();
        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let mut hits = Vec::new();
        for (hash, seq, similarity) in scored {
            let score = (1.0 + similarity) / 2.0;
            for doc in state.documents.iter().filter(|d| d.active && d.content_hash == hash) {
                if let Some(ids) = collections_filter {
                    if !ids.is_empty() && !ids.contains(&doc.collection_id) {
                        continue;
                    }
                }
                let pos = state.vectors.get(&(hash.clone(), seq)).map(|row| row.pos as usize);
                hits.push(VecHit {
                    document_id: doc.id,
                    display_path: doc.display_path.clone().unwrap_or_else(|| doc.filepath.clone()),
                    file: doc.filepath.clone(),
                    title: doc.title.clone(),
                    body: doc.body.clone(),
                    score,
                    chunk_pos: pos,
                });
            }
        }
        Ok(hits)
    }

    async fn ensure_vector_index(&self, dimension: usize) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.vector_dim != Some(dimension) {
            state.vectors.clear();
            state.vector_dim = Some(dimension);
        }
        Ok(())
    }

    async fn insert_vectors(&self, content_hash: &str, entries: &[VectorEntry], _model: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        for entry in entries {
            state.vectors.insert(
                (content_hash.to_string(), entry.seq),
                VectorRow {
                    pos: entry.pos,
                    vector: entry.vector.clone(),
                },
            );
        }
        Ok(())
    }

    async fn delete_vectors(&self, content_hash: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.vectors.retain(|(hash, _), _| hash != content_hash);
        Ok(())
    }

    async fn reset_all_vectors(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.vectors.clear();
        state.vector_dim = None;
        Ok(())
    }

    async fn hashes_needing_embedding(&self) -> anyhow::Result<Vec<(String, String, String)>> {
        let state = self.state.lock().unwrap();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for doc in state.documents.iter().filter(|d| d.active) {
            if !seen.insert(doc.content_hash.clone()) {
                continue;
            }
            if !state.vectors.contains_key(&(doc.content_hash.clone(), 0)) {
                out.push((doc.content_hash.clone(), doc.body.clone(), doc.title.clone()));
            }
        }
        Ok(out)
    }

    async fn get_body(&self, doc_or_hash: &str, from_line: Option<usize>, max_lines: Option<usize>) -> anyhow::Result<Option<String>> {
        let record = match self.find_document(doc_or_hash, true).await? {
            FindResult::Found(doc) => doc,
            FindResult::NotFound { .. } => return Ok(None),
        };

        let Some(from) = from_line else {
            return Ok(Some(record.body));
        };

        let lines: Vec<&str> = record.body.lines().collect();
        let start = from.saturating_sub(1).min(lines.len());
        let end = match max_lines {
            Some(n) => (start + n).min(lines.len()),
            None => lines.len(),
        };
        Ok(Some(lines[start..end].join("\n")))
    }

    async fn find_document(&self, path_or_docid: &str, include_body: bool) -> anyhow::Result<FindResult> {
        let state = self.state.lock().unwrap();
        let strip_body = |doc: &DocumentRecord| -> DocumentRecord {
            if include_body {
                doc.clone()
            } else {
                DocumentRecord { body: String::new(), ..doc.clone() }
            }
        };

        if let Some(prefix) = path_or_docid.strip_prefix('#') {
            for doc in state.documents.iter().filter(|d| d.active) {
                if matches_short_hash(&doc.content_hash, prefix) {
                    return Ok(FindResult::Found(strip_body(doc)));
                }
            }
            return Ok(FindResult::NotFound { similar_paths: vec![] });
        }

        if let Ok(id) = path_or_docid.parse::<i64>() {
            if let Some(doc) = state.documents.iter().find(|d| d.id == id && d.active) {
                return Ok(FindResult::Found(strip_body(doc)));
            }
        }

        if let Some(doc) = state.documents.iter().find(|d| d.filepath == path_or_docid && d.active) {
            return Ok(FindResult::Found(strip_body(doc)));
        }
        if let Some(doc) = state
            .documents
            .iter()
            .find(|d| d.active && d.display_path.as_deref() == Some(path_or_docid))
        {
            return Ok(FindResult::Found(strip_body(doc)));
        }
        if let Some(doc) = state.documents.iter().find(|d| d.active && d.filepath.ends_with(path_or_docid)) {
            return Ok(FindResult::Found(strip_body(doc)));
        }

        let mut scored: Vec<(usize, String)> = state
            .documents
            .iter()
            .filter(|d| d.active)
            .map(|d| (edit_distance(path_or_docid, &d.filepath), d.filepath.clone()))
            .collect();
        scored.sort_by_key(|(d, _)| *d);
        let similar_paths = scored.into_iter().take(5).map(|(_, p)| p).collect();
        Ok(FindResult::NotFound { similar_paths })
    }

    async fn find_documents(&self, glob_or_csv: &str, options: FindManyOptions) -> anyhow::Result<FindManyResult> {
        let state = self.state.lock().unwrap();
        let patterns: Vec<&str> = glob_or_csv.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
        let mut builder = globset::GlobSetBuilder::new();
        for p in &patterns {
            builder.add(globset::Glob::new(p)?);
        }
        let glob_set = builder.build()?;

        let mut result = FindManyResult::default();
        for doc in state.documents.iter().filter(|d| d.active) {
            if !glob_set.is_match(&doc.filepath) {
                continue;
            }
            if let Some(max_bytes) = options.max_bytes {
                if doc.body.len() > max_bytes {
                    result.skipped.push(SkippedMatch {
                        filepath: doc.filepath.clone(),
                        reason: format!("body exceeds max_bytes ({} > {})", doc.body.len(), max_bytes),
                    });
                    continue;
                }
            }
            result.matches.push(if options.include_body {
                doc.clone()
            } else {
                DocumentRecord { body: String::new(), ..doc.clone() }
            });
        }
        Ok(result)
    }

    async fn status(&self) -> anyhow::Result<StoreStatus> {
        let state = self.state.lock().unwrap();
        let total_documents = state.documents.iter().filter(|d| d.active).count() as i64;

        let mut embedded_hashes: HashSet<&String> = HashSet::new();
        for ((hash, seq), _) in state.vectors.iter() {
            if *seq == 0 {
                embedded_hashes.insert(hash);
            }
        }
        let needs_embedding = state
            .documents
            .iter()
            .filter(|d| d.active)
            .map(|d| &d.content_hash)
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|h| !embedded_hashes.contains(*h))
            .count() as i64;

        let collections = state
            .collections
            .iter()
            .map(|c| {
                let docs: Vec<&DocumentRecord> = state
                    .documents
                    .iter()
                    .filter(|d| d.collection_id == c.id && d.active)
                    .collect();
                let last_updated = docs.iter().map(|d| d.modified_at).max();
                CollectionStatus {
                    name: c.root_path.clone(),
                    root_path: c.root_path.clone(),
                    glob_pattern: c.glob_pattern.clone(),
                    documents: docs.len() as i64,
                    last_updated,
                }
            })
            .collect();

        Ok(StoreStatus {
            total_documents,
            needs_embedding,
            has_vector_index: state.vector_dim.is_some(),
            collections,
        })
    }

    async fn log_search(&self, command: &str, query: &str, result_count: usize, index_name: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .search_history
            .push((command.to_string(), query.to_string(), result_count, index_name.to_string()));
        Ok(())
    }

    async fn get_context(&self, filepath: &str) -> anyhow::Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .path_contexts
            .iter()
            .filter(|(prefix, _)| filepath.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, context)| context.clone()))
    }

    async fn hard_delete_expired(&self, older_than: chrono::DateTime<Utc>) -> anyhow::Result<i64> {
        let mut state = self.state.lock().unwrap();
        let before = state.documents.len();
        state.documents.retain(|d| d.active || d.modified_at >= older_than);
        let deleted = (before - state.documents.len()) as i64;

        let live_hashes: HashSet<String> = state.documents.iter().filter(|d| d.active).map(|d| d.content_hash.clone()).collect();
        state.vectors.retain(|(hash, _), _| live_hashes.contains(hash));

        Ok(deleted)
    }

    async fn get_cached_rerank(&self, key: &str, max_age: chrono::Duration) -> anyhow::Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.rerank_cache.get(key) else {
            return Ok(None);
        };
        if Utc::now() - entry.created_at > max_age {
            state.rerank_cache.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.result_json.clone()))
    }

    async fn put_cached_rerank(&self, key: &str, result_json: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .rerank_cache
            .insert(key.to_string(), RerankCacheEntry { result_json: result_json.to_string(), created_at: Utc::now() });
        Ok(())
    }

    async fn evict_rerank_cache(&self, max_age: chrono::Duration) -> anyhow::Result<i64> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let before = state.rerank_cache.len();
        state.rerank_cache.retain(|_, entry| now - entry.created_at <= max_age);
        Ok((before - state.rerank_cache.len()) as i64)
    }

    async fn close(&self) {}
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_unchanged_then_updated() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();

        let outcome = store.upsert_document(cid, "/r/a.md", "A", "hash1", "hello world").await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Indexed);

        let outcome = store.upsert_document(cid, "/r/a.md", "A", "hash1", "hello world").await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);

        let outcome = store.upsert_document(cid, "/r/a.md", "A", "hash2", "hello mars").await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
    }

    #[tokio::test]
    async fn duplicate_filepath_in_other_collection_is_rejected() {
        let store = InMemoryStore::new();
        let c1 = store.put_collection("/r1", "**/*.md").await.unwrap();
        let c2 = store.put_collection("/r2", "**/*.md").await.unwrap();

        store.upsert_document(c1, "/shared.md", "X", "hash", "x").await.unwrap();
        let outcome = store.upsert_document(c2, "/shared.md", "X", "hash", "x").await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Rejected);
    }

    #[tokio::test]
    async fn fts_search_finds_indexed_body() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store
            .upsert_document(cid, "/r/ops.md", "Ops", "hash", "deploying the service to production")
            .await
            .unwrap();

        let hits = store.search_fts("deploying", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file, "/r/ops.md");
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine_similarity() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/a.md", "A", "hash-a", "a").await.unwrap();
        store.upsert_document(cid, "/r/b.md", "B", "hash-b", "b").await.unwrap();
        store.ensure_vector_index(2).await.unwrap();
        store
            .insert_vectors("hash-a", &[VectorEntry { seq: 0, pos: 0, vector: vec![1.0, 0.0] }], "test")
            .await
            .unwrap();
        store
            .insert_vectors("hash-b", &[VectorEntry { seq: 0, pos: 0, vector: vec![0.0, 1.0] }], "test")
            .await
            .unwrap();

        let hits = store.search_vec(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits[0].file, "/r/a.md");
    }

    #[tokio::test]
    async fn deactivate_missing_sweeps_orphan_vectors() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/a.md", "A", "hash", "hello world").await.unwrap();
        store.ensure_vector_index(3).await.unwrap();
        store
            .insert_vectors("hash", &[VectorEntry { seq: 0, pos: 0, vector: vec![1.0, 0.0, 0.0] }], "test-model")
            .await
            .unwrap();

        store.deactivate_missing(cid, &[]).await.unwrap();

        let status = store.status().await.unwrap();
        assert_eq!(status.total_documents, 0);
    }

    #[test]
    fn edit_distance_basic() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }

    #[tokio::test]
    async fn hard_delete_only_removes_old_inactive_documents() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/a.md", "A", "hash-a", "body").await.unwrap();
        store.deactivate_missing(cid, &[]).await.unwrap();

        let deleted = store.hard_delete_expired(Utc::now() - chrono::Duration::days(1)).await.unwrap();
        assert_eq!(deleted, 0);

        let deleted = store.hard_delete_expired(Utc::now() + chrono::Duration::days(1)).await.unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn reset_all_vectors_clears_dimension_and_rows() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/a.md", "A", "hash-a", "body").await.unwrap();
        store.ensure_vector_index(3).await.unwrap();
        store
            .insert_vectors("hash-a", &[VectorEntry { seq: 0, pos: 0, vector: vec![1.0, 0.0, 0.0] }], "test")
            .await
            .unwrap();
        assert!(store.hashes_needing_embedding().await.unwrap().is_empty());

        store.reset_all_vectors().await.unwrap();

        assert_eq!(store.status().await.unwrap().has_vector_index, false);
        assert_eq!(store.hashes_needing_embedding().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rerank_cache_is_read_through_with_ttl_eviction() {
        let store = InMemoryStore::new();
        assert_eq!(store.get_cached_rerank("k", chrono::Duration::days(7)).await.unwrap(), None);

        store.put_cached_rerank("k", "{}").await.unwrap();
        assert_eq!(store.get_cached_rerank("k", chrono::Duration::days(7)).await.unwrap(), Some("{}".to_string()));

        {
            let mut state = store.state.lock().unwrap();
            state.rerank_cache.get_mut("k").unwrap().created_at = Utc::now() - chrono::Duration::days(8);
        }
        assert_eq!(store.get_cached_rerank("k", chrono::Duration::days(7)).await.unwrap(), None);
    }
}
