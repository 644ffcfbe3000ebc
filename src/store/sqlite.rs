//! SQLite-backed `Store` implementation.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::hashing::{content_hash, matches_short_hash};
use crate::model_runtime::vec_to_blob;
use crate::path_util::display_path;

use super::{
    CollectionStatus, DocumentRecord, FindManyOptions, FindManyResult, FindResult, FtsHit, SkippedMatch, Store,
    StoreStatus, UpsertOutcome, VecHit, VectorEntry,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if absent) the database at `path`, running forward
    /// migrations (§4.1 `open`).
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = crate::db::connect(path).await?;
        crate::migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow, include_body: bool) -> Result<DocumentRecord> {
        Ok(DocumentRecord {
            id: row.try_get("id")?,
            collection_id: row.try_get("collection_id")?,
            filepath: row.try_get("filepath")?,
            display_path: row.try_get("display_path")?,
            title: row.try_get("title")?,
            content_hash: row.try_get("content_hash")?,
            body: if include_body { row.try_get("body")? } else { String::new() },
            created_at: row.try_get("created_at")?,
            modified_at: row.try_get("modified_at")?,
            active: row.try_get::<i64, _>("active")? != 0,
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn put_collection(&self, root: &str, glob: &str) -> Result<i64> {
        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM collections WHERE root_path = ? AND glob_pattern = ?")
                .bind(root)
                .bind(glob)
                .fetch_optional(&self.pool)
                .await?;
        if let Some((id,)) = existing {
            return Ok(id);
        }

        let now = Utc::now();
        let result = sqlx::query("INSERT INTO collections (root_path, glob_pattern, created_at) VALUES (?, ?, ?)")
            .bind(root)
            .bind(glob)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn upsert_document(
        &self,
        collection_id: i64,
        filepath: &str,
        title: &str,
        hash: &str,
        body: &str,
    ) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let existing: Option<(i64, i64, String)> =
            sqlx::query_as("SELECT id, collection_id, content_hash FROM documents WHERE filepath = ? AND active = 1")
                .bind(filepath)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some((doc_id, existing_collection_id, existing_hash)) = existing {
            if existing_collection_id != collection_id {
                tx.commit().await?;
                return Ok(UpsertOutcome::Rejected);
            }

            if existing_hash == hash {
                sqlx::query("UPDATE documents SET title = ? WHERE id = ?")
                    .bind(title)
                    .bind(doc_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                return Ok(UpsertOutcome::Unchanged);
            }

            sqlx::query("UPDATE documents SET active = 0, modified_at = ? WHERE id = ?")
                .bind(now)
                .bind(doc_id)
                .execute(&mut *tx)
                .await?;

            let new_path = Self::fresh_display_path(&mut tx, collection_id, filepath).await?;
            sqlx::query(
                "INSERT INTO documents (collection_id, filepath, display_path, title, content_hash, body, created_at, modified_at, active) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)",
            )
            .bind(collection_id)
            .bind(filepath)
            .bind(new_path)
            .bind(title)
            .bind(hash)
            .bind(body)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(UpsertOutcome::Updated);
        }

        let new_path = Self::fresh_display_path(&mut tx, collection_id, filepath).await?;
        sqlx::query(
            "INSERT INTO documents (collection_id, filepath, display_path, title, content_hash, body, created_at, modified_at, active) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(collection_id)
        .bind(filepath)
        .bind(new_path)
        .bind(title)
        .bind(hash)
        .bind(body)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(UpsertOutcome::Indexed)
    }

    async fn deactivate_missing(&self, collection_id: i64, seen_paths: &[String]) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, filepath FROM documents WHERE collection_id = ? AND active = 1")
                .bind(collection_id)
                .fetch_all(&mut *tx)
                .await?;

        let seen: HashSet<&String> = seen_paths.iter().collect();
        let mut deactivated = 0i64;
        for (id, filepath) in rows {
            if !seen.contains(&filepath) {
                sqlx::query("UPDATE documents SET active = 0, modified_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                deactivated += 1;
            }
        }

        let orphans: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT cv.content_hash FROM content_vectors cv \
             WHERE NOT EXISTS (SELECT 1 FROM documents d WHERE d.content_hash = cv.content_hash AND d.active = 1)",
        )
        .fetch_all(&mut *tx)
        .await?;

        for (hash,) in orphans {
            sqlx::query("DELETE FROM content_vectors WHERE content_hash = ?")
                .bind(&hash)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM vec_index WHERE content_hash = ?")
                .bind(&hash)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(deactivated)
    }

    async fn search_fts(&self, query: &str, limit: usize, collections_filter: Option<&[i64]>) -> Result<Vec<FtsHit>> {
        let mut sql = String::from(
            "SELECT d.id as id, d.filepath as filepath, d.display_path as display_path, d.title as title, d.body as body, \
             bm25(documents_fts) as raw_bm25 \
             FROM documents_fts JOIN documents d ON d.id = documents_fts.rowid \
             WHERE documents_fts MATCH ? AND d.active = 1",
        );
        if let Some(ids) = collections_filter {
            if !ids.is_empty() {
                let list = ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",");
                sql.push_str(&format!(" AND d.collection_id IN ({})", list));
            }
        }
        sql.push_str(" ORDER BY raw_bm25 LIMIT ?");

        let rows = sqlx::query(&sql)
            .bind(query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .with_context(|| "fts search failed")?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: f64 = row.try_get("raw_bm25")?;
            let raw_score = -raw; // fts5 bm25() is lower-is-better; flip so higher is better
            let normalized = raw_score.max(0.0) / (raw_score.max(0.0) + 1.0);
            let filepath: String = row.try_get("filepath")?;
            let display: Option<String> = row.try_get("display_path")?;
            hits.push(FtsHit {
                document_id: row.try_get("id")?,
                display_path: display.unwrap_or_else(|| filepath.clone()),
                file: filepath,
                title: row.try_get("title")?,
                body: row.try_get("body")?,
                score: normalized,
                raw_score,
            });
        }
        Ok(hits)
    }

    async fn search_vec(&self, embedding: &[f32], limit: usize, collections_filter: Option<&[i64]>) -> Result<Vec<VecHit>> {
        let blob = vec_to_blob(embedding);
        let rows: Vec<(String, i64, f64)> = sqlx::query_as(
            "SELECT content_hash, seq, distance FROM vec_index WHERE embedding MATCH ? AND k = ? ORDER BY distance",
        )
        .bind(blob)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| "vector search failed")?;

        let mut hits = Vec::new();
        for (hash, seq, distance) in rows {
            let mut doc_sql = String::from(
                "SELECT id, filepath, display_path, title, body FROM documents WHERE content_hash = ? AND active = 1",
            );
            if let Some(ids) = collections_filter {
                if !ids.is_empty() {
                    let list = ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",");
                    doc_sql.push_str(&format!(" AND collection_id IN ({})", list));
                }
            }
            let docs = sqlx::query(&doc_sql).bind(&hash).fetch_all(&self.pool).await?;

            let pos: Option<(i64,)> = sqlx::query_as("SELECT pos FROM content_vectors WHERE content_hash = ? AND seq = ?")
                .bind(&hash)
                .bind(seq)
                .fetch_optional(&self.pool)
                .await?;

            let similarity = 1.0 - distance;
            let score = (1.0 + similarity) / 2.0;

            for doc in docs {
                let filepath: String = doc.try_get("filepath")?;
                let display: Option<String> = doc.try_get("display_path")?;
                hits.push(VecHit {
                    document_id: doc.try_get("id")?,
                    display_path: display.unwrap_or_else(|| filepath.clone()),
                    file: filepath,
                    title: doc.try_get("title")?,
                    body: doc.try_get("body")?,
                    score,
                    chunk_pos: pos.map(|(p,)| p as usize),
                });
            }
        }
        Ok(hits)
    }

    async fn ensure_vector_index(&self, dimension: usize) -> Result<()> {
        crate::migrate::ensure_vector_index(&self.pool, dimension).await
    }

    async fn insert_vectors(&self, hash: &str, entries: &[VectorEntry], model: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        for entry in entries {
            let blob = vec_to_blob(&entry.vector);
            sqlx::query(
                "INSERT INTO content_vectors (content_hash, seq, pos, model, embedded_at, vector) VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(content_hash, seq) DO UPDATE SET pos = excluded.pos, model = excluded.model, \
                 embedded_at = excluded.embedded_at, vector = excluded.vector",
            )
            .bind(hash)
            .bind(entry.seq)
            .bind(entry.pos)
            .bind(model)
            .bind(now)
            .bind(&blob)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM vec_index WHERE content_hash = ? AND seq = ?")
                .bind(hash)
                .bind(entry.seq)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO vec_index (content_hash, seq, embedding) VALUES (?, ?, ?)")
                .bind(hash)
                .bind(entry.seq)
                .bind(&blob)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_vectors(&self, hash: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM content_vectors WHERE content_hash = ?")
            .bind(hash)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM vec_index WHERE content_hash = ?")
            .bind(hash)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reset_all_vectors(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM content_vectors").execute(&mut *tx).await?;
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name='vec_index'")
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_some() {
            sqlx::query("DROP TABLE vec_index").execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn hashes_needing_embedding(&self) -> Result<Vec<(String, String, String)>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT DISTINCT d.content_hash, d.body, d.title FROM documents d \
             WHERE d.active = 1 AND NOT EXISTS ( \
                SELECT 1 FROM content_vectors cv WHERE cv.content_hash = d.content_hash AND cv.seq = 0 \
             )",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_body(&self, doc_or_hash: &str, from_line: Option<usize>, max_lines: Option<usize>) -> Result<Option<String>> {
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

    async fn find_document(&self, path_or_docid: &str, include_body: bool) -> Result<FindResult> {
        if let Some(prefix) = path_or_docid.strip_prefix('#') {
            let rows: Vec<sqlx::sqlite::SqliteRow> =
                sqlx::query("SELECT * FROM documents WHERE active = 1").fetch_all(&self.pool).await?;
            for row in &rows {
                let hash: String = row.try_get("content_hash")?;
                if matches_short_hash(&hash, prefix) {
                    return Ok(FindResult::Found(Self::row_to_document(row, include_body)?));
                }
            }
            return Ok(FindResult::NotFound { similar_paths: vec![] });
        }

        if let Ok(id) = path_or_docid.parse::<i64>() {
            let row = sqlx::query("SELECT * FROM documents WHERE id = ? AND active = 1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                return Ok(FindResult::Found(Self::row_to_document(&row, include_body)?));
            }
        }

        let exact = sqlx::query("SELECT * FROM documents WHERE filepath = ? AND active = 1")
            .bind(path_or_docid)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = exact {
            return Ok(FindResult::Found(Self::row_to_document(&row, include_body)?));
        }

        let by_display = sqlx::query("SELECT * FROM documents WHERE display_path = ? AND active = 1")
            .bind(path_or_docid)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = by_display {
            return Ok(FindResult::Found(Self::row_to_document(&row, include_body)?));
        }

        let suffix_pattern = format!("%{}", path_or_docid);
        let by_suffix = sqlx::query("SELECT * FROM documents WHERE filepath LIKE ? AND active = 1 LIMIT 1")
            .bind(&suffix_pattern)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = by_suffix {
            return Ok(FindResult::Found(Self::row_to_document(&row, include_body)?));
        }

        let all_paths: Vec<(String,)> = sqlx::query_as("SELECT filepath FROM documents WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;
        let mut scored: Vec<(usize, String)> = all_paths
            .into_iter()
            .map(|(p,)| (edit_distance(path_or_docid, &p), p))
            .collect();
        scored.sort_by_key(|(d, _)| *d);
        let similar_paths = scored.into_iter().take(5).map(|(_, p)| p).collect();
        Ok(FindResult::NotFound { similar_paths })
    }

    async fn find_documents(&self, glob_or_csv: &str, options: FindManyOptions) -> Result<FindManyResult> {
        let patterns: Vec<&str> = glob_or_csv.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
        let glob_set = {
            let mut builder = globset::GlobSetBuilder::new();
            for p in &patterns {
                builder.add(globset::Glob::new(p)?);
            }
            builder.build()?
        };

        let rows: Vec<sqlx::sqlite::SqliteRow> =
            sqlx::query("SELECT * FROM documents WHERE active = 1").fetch_all(&self.pool).await?;

        let mut result = FindManyResult::default();
        for row in rows {
            let filepath: String = row.try_get("filepath")?;
            if !glob_set.is_match(&filepath) {
                continue;
            }
            let body: String = row.try_get("body")?;
            if let Some(max_bytes) = options.max_bytes {
                if body.len() > max_bytes {
                    result.skipped.push(SkippedMatch {
                        filepath,
                        reason: format!("body exceeds max_bytes ({} > {})", body.len(), max_bytes),
                    });
                    continue;
                }
            }
            result.matches.push(Self::row_to_document(&row, options.include_body)?);
        }
        Ok(result)
    }

    async fn status(&self) -> Result<StoreStatus> {
        let (total,): (i64,) = sqlx::query_as("SELECT count(*) FROM documents WHERE active = 1")
            .fetch_one(&self.pool)
            .await?;
        let (needs_embedding,): (i64,) = sqlx::query_as(
            "SELECT count(DISTINCT d.content_hash) FROM documents d WHERE d.active = 1 \
             AND NOT EXISTS (SELECT 1 FROM content_vectors cv WHERE cv.content_hash = d.content_hash AND cv.seq = 0)",
        )
        .fetch_one(&self.pool)
        .await?;
        let has_vector_index: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name='vec_index'")
                .fetch_optional(&self.pool)
                .await?;

        let collection_rows: Vec<(i64, String, String)> =
            sqlx::query_as("SELECT id, root_path, glob_pattern FROM collections")
                .fetch_all(&self.pool)
                .await?;

        let mut collections = Vec::with_capacity(collection_rows.len());
        for (id, root_path, glob_pattern) in collection_rows {
            let (documents,): (i64,) = sqlx::query_as("SELECT count(*) FROM documents WHERE collection_id = ? AND active = 1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
            let last_updated: Option<(DateTime<Utc>,)> =
                sqlx::query_as("SELECT max(modified_at) FROM documents WHERE collection_id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            collections.push(CollectionStatus {
                name: root_path.clone(),
                root_path,
                glob_pattern,
                documents,
                last_updated: last_updated.map(|(t,)| t),
            });
        }

        Ok(StoreStatus {
            total_documents: total,
            needs_embedding,
            has_vector_index: has_vector_index.is_some(),
            collections,
        })
    }

    async fn log_search(&self, command: &str, query: &str, result_count: usize, index_name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO search_history (ts, command, query, result_count, index_name) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Utc::now())
        .bind(command)
        .bind(query)
        .bind(result_count as i64)
        .bind(index_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_context(&self, filepath: &str) -> Result<Option<String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT path_prefix, context FROM path_contexts")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter(|(prefix, _)| filepath.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, context)| context))
    }

    async fn hard_delete_expired(&self, older_than: DateTime<Utc>) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let expired: Vec<(i64,)> = sqlx::query_as("SELECT id FROM documents WHERE active = 0 AND modified_at < ?")
            .bind(older_than)
            .fetch_all(&mut *tx)
            .await?;

        for (id,) in &expired {
            sqlx::query("DELETE FROM documents WHERE id = ?").bind(id).execute(&mut *tx).await?;
        }

        let orphans: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT cv.content_hash FROM content_vectors cv \
             WHERE NOT EXISTS (SELECT 1 FROM documents d WHERE d.content_hash = cv.content_hash AND d.active = 1)",
        )
        .fetch_all(&mut *tx)
        .await?;

        for (hash,) in orphans {
            sqlx::query("DELETE FROM content_vectors WHERE content_hash = ?").bind(&hash).execute(&mut *tx).await?;
            sqlx::query("DELETE FROM vec_index WHERE content_hash = ?").bind(&hash).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(expired.len() as i64)
    }

    async fn get_cached_rerank(&self, key: &str, max_age: chrono::Duration) -> Result<Option<String>> {
        let row: Option<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT result_json, created_at FROM rerank_cache WHERE cache_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        let Some((result_json, created_at)) = row else {
            return Ok(None);
        };
        if Utc::now() - created_at > max_age {
            sqlx::query("DELETE FROM rerank_cache WHERE cache_key = ?").bind(key).execute(&self.pool).await?;
            return Ok(None);
        }
        Ok(Some(result_json))
    }

    async fn put_cached_rerank(&self, key: &str, result_json: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO rerank_cache (cache_key, result_json, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(cache_key) DO UPDATE SET result_json = excluded.result_json, created_at = excluded.created_at",
        )
        .bind(key)
        .bind(result_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn evict_rerank_cache(&self, max_age: chrono::Duration) -> Result<i64> {
        let cutoff = Utc::now() - max_age;
        let result = sqlx::query("DELETE FROM rerank_cache WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as i64)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

impl SqliteStore {
    async fn fresh_display_path(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        collection_id: i64,
        filepath: &str,
    ) -> Result<String> {
        let root: Option<(String,)> = sqlx::query_as("SELECT root_path FROM collections WHERE id = ?")
            .bind(collection_id)
            .fetch_optional(&mut **tx)
            .await?;
        let root_path = root.map(|(r,)| r).unwrap_or_default();

        let existing: Vec<(String,)> =
            sqlx::query_as("SELECT display_path FROM documents WHERE active = 1 AND display_path IS NOT NULL")
                .fetch_all(&mut **tx)
                .await?;
        let existing_set: HashSet<String> = existing.into_iter().map(|(p,)| p).collect();

        Ok(display_path(Path::new(filepath), Path::new(&root_path), &existing_set))
    }
}

/// Simple Levenshtein distance, used to rank near-miss paths on a `find_document` lookup failure.
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

/// Hash a cache key for the rerank cache (§3's "opaque result" entries).
pub fn rerank_cache_key(endpoint: &str, canonical_request: &str) -> String {
    content_hash(format!("{}\u{2225}{}", endpoint, canonical_request).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VectorEntry;

    async fn open_test_store() -> SqliteStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        std::mem::forget(dir);
        SqliteStore::open(&path).await.unwrap()
    }

    #[tokio::test]
    async fn upsert_then_unchanged_then_updated() {
        let store = open_test_store().await;
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();

        let hash1 = content_hash(b"hello world");
        let outcome = store
            .upsert_document(cid, "/r/a.md", "A", &hash1, "hello world")
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Indexed);

        let outcome = store
            .upsert_document(cid, "/r/a.md", "A", &hash1, "hello world")
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);

        let hash2 = content_hash(b"hello mars");
        let outcome = store
            .upsert_document(cid, "/r/a.md", "A", &hash2, "hello mars")
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
    }

    #[tokio::test]
    async fn duplicate_filepath_in_other_collection_is_rejected() {
        let store = open_test_store().await;
        let c1 = store.put_collection("/r1", "**/*.md").await.unwrap();
        let c2 = store.put_collection("/r2", "**/*.md").await.unwrap();
        let hash = content_hash(b"x");

        store.upsert_document(c1, "/shared.md", "X", &hash, "x").await.unwrap();
        let outcome = store.upsert_document(c2, "/shared.md", "X", &hash, "x").await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Rejected);
    }

    #[tokio::test]
    async fn deactivate_missing_sweeps_orphan_vectors() {
        let store = open_test_store().await;
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        let hash = content_hash(b"hello world");
        store
            .upsert_document(cid, "/r/a.md", "A", &hash, "hello world")
            .await
            .unwrap();
        store.ensure_vector_index(3).await.unwrap();
        store
            .insert_vectors(&hash, &[VectorEntry { seq: 0, pos: 0, vector: vec![1.0, 0.0, 0.0] }], "test-model")
            .await
            .unwrap();

        store.deactivate_missing(cid, &[]).await.unwrap();

        let remaining: (i64,) = sqlx::query_as("SELECT count(*) FROM content_vectors")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(remaining.0, 0);
    }

    #[tokio::test]
    async fn fts_search_finds_indexed_body() {
        let store = open_test_store().await;
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        let hash = content_hash(b"deploying the service to production");
        store
            .upsert_document(cid, "/r/ops.md", "Ops", &hash, "deploying the service to production")
            .await
            .unwrap();

        let hits = store.search_fts("deploying", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file, "/r/ops.md");
    }

    #[test]
    fn edit_distance_basic() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
    }

    #[tokio::test]
    async fn reset_all_vectors_drops_index_and_clears_rows() {
        let store = open_test_store().await;
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        let hash = content_hash(b"hello world");
        store.upsert_document(cid, "/r/a.md", "A", &hash, "hello world").await.unwrap();
        store.ensure_vector_index(3).await.unwrap();
        store
            .insert_vectors(&hash, &[VectorEntry { seq: 0, pos: 0, vector: vec![1.0, 0.0, 0.0] }], "test-model")
            .await
            .unwrap();
        assert!(store.hashes_needing_embedding().await.unwrap().is_empty());

        store.reset_all_vectors().await.unwrap();

        let remaining: (i64,) = sqlx::query_as("SELECT count(*) FROM content_vectors").fetch_one(&store.pool).await.unwrap();
        assert_eq!(remaining.0, 0);
        let vec_index_exists: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name='vec_index'")
                .fetch_optional(&store.pool)
                .await
                .unwrap();
        assert!(vec_index_exists.is_none());
        assert_eq!(store.hashes_needing_embedding().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rerank_cache_is_read_through_with_ttl_eviction() {
        let store = open_test_store().await;
        let key = rerank_cache_key("http://example/rerank", "q=deploy");

        assert_eq!(store.get_cached_rerank(&key, chrono::Duration::days(7)).await.unwrap(), None);

        store.put_cached_rerank(&key, "{\"results\":[]}").await.unwrap();
        assert_eq!(
            store.get_cached_rerank(&key, chrono::Duration::days(7)).await.unwrap(),
            Some("{\"results\":[]}".to_string())
        );

        sqlx::query("UPDATE rerank_cache SET created_at = ? WHERE cache_key = ?")
            .bind(Utc::now() - chrono::Duration::days(8))
            .bind(&key)
            .execute(&store.pool)
            .await
            .unwrap();
        assert_eq!(store.get_cached_rerank(&key, chrono::Duration::days(7)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn evict_rerank_cache_removes_only_stale_entries() {
        let store = open_test_store().await;
        store.put_cached_rerank("fresh", "{}").await.unwrap();
        store.put_cached_rerank("stale", "{}").await.unwrap();
        sqlx::query("UPDATE rerank_cache SET created_at = ? WHERE cache_key = 'stale'")
            .bind(Utc::now() - chrono::Duration::days(8))
            .execute(&store.pool)
            .await
            .unwrap();

        let evicted = store.evict_rerank_cache(chrono::Duration::days(7)).await.unwrap();
        assert_eq!(evicted, 1);
        let (remaining,): (i64,) = sqlx::query_as("SELECT count(*) FROM rerank_cache").fetch_one(&store.pool).await.unwrap();
        assert_eq!(remaining, 1);
    }
}
