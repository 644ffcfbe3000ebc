//! Embedding pass (§4.2 "Embedding pass" steps 1-6). Generalises the
//! teacher's `embed_cmd`/`ingest.rs::replace_chunks` inline-embedding flow
//! from a per-chunk-row SQL table to hash-keyed vectors behind the `Store`
//! trait, and adds cooperative cancellation between chunks (§4.2.3).

use anyhow::Result;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::model_runtime::{EmbedRole, ModelRuntime};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::store::{Store, VectorEntry};

#[derive(Debug, Clone, Default)]
pub struct EmbedCounts {
    pub embedded: u64,
    pub skipped: u64,
    pub cancelled: bool,
}

/// Run the embedding pass (§4.2 embed steps 1-6).
///
/// If `force`, all existing vectors are deleted before re-embedding. A
/// `cancel` check between chunks rolls back the in-flight hash only, so a
/// cancelled pass is always resumable (§4.2.3).
pub async fn embed(
    store: &dyn Store,
    runtime: &dyn ModelRuntime,
    chunking: &ChunkingConfig,
    force: bool,
    progress: &dyn SyncProgressReporter,
    cancel: &dyn Fn() -> bool,
) -> Result<EmbedCounts> {
    if force {
        store.reset_all_vectors().await?;
    }

    let pending = store.hashes_needing_embedding().await?;
    let mut counts = EmbedCounts::default();
    if pending.is_empty() {
        return Ok(counts);
    }

    let total = pending.len() as u64;
    let mut dimension_known = false;

    for (i, (hash, body, title)) in pending.into_iter().enumerate() {
        if cancel() {
            counts.cancelled = true;
            break;
        }

        let chunks = chunk_text(&body, chunking.chunk_chars, chunking.chunk_overlap);
        let mut entries = Vec::with_capacity(chunks.len());
        let mut model_name = String::new();
        let mut ok = true;

        for chunk in &chunks {
            if cancel() {
                counts.cancelled = true;
                ok = false;
                break;
            }

            let Some(embedded) = runtime.embed(&chunk.text, EmbedRole::Document { title: &title }).await else {
                ok = false;
                break;
            };

            if !dimension_known {
                store.ensure_vector_index(embedded.vector.len()).await?;
                dimension_known = true;
            }

            model_name = embedded.model;
            entries.push(VectorEntry {
                seq: chunk.seq as i64,
                pos: chunk.pos as i64,
                vector: embedded.vector,
            });
        }

        if ok && !entries.is_empty() {
            store.insert_vectors(&hash, &entries, &model_name).await?;
            counts.embedded += 1;
        } else {
            counts.skipped += 1;
        }

        progress.report(SyncProgressEvent::Embedding { n: i as u64 + 1, total });
    }

    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_runtime::{EmbeddingResult, RerankCandidate, RerankOutput};
    use crate::progress::NoProgress;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    struct FixedRuntime;

    #[async_trait]
    impl ModelRuntime for FixedRuntime {
        async fn embed(&self, _text: &str, _role: EmbedRole<'_>) -> Option<EmbeddingResult> {
            Some(EmbeddingResult { vector: vec![1.0, 0.0], model: "fixed".into() })
        }
        async fn embed_batch(&self, texts: &[String]) -> Vec<Option<EmbeddingResult>> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t, EmbedRole::Query).await);
            }
            out
        }
        async fn generate(&self, _prompt: &str) -> Option<String> {
            None
        }
        async fn expand_query(&self, text: &str, _context: Option<&str>, include_lexical: bool) -> Vec<crate::model_runtime::Queryable> {
            crate::model_runtime::fallback_expansion(text, include_lexical)
        }
        async fn rerank(&self, _query: &str, _candidates: &[RerankCandidate]) -> Option<RerankOutput> {
            None
        }
        fn model_exists(&self, _name: &str) -> bool {
            true
        }
        async fn dispose(&self) {}
    }

    #[tokio::test]
    async fn embeds_all_pending_hashes() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/a.md", "A", "hash-a", "alpha content").await.unwrap();
        store.upsert_document(cid, "/r/b.md", "B", "hash-b", "beta content").await.unwrap();

        let runtime = FixedRuntime;
        let chunking = ChunkingConfig { chunk_chars: 1000, chunk_overlap: 200 };
        let counts = embed(&store, &runtime, &chunking, false, &NoProgress, &|| false).await.unwrap();

        assert_eq!(counts.embedded, 2);
        assert!(store.hashes_needing_embedding().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_hash() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/a.md", "A", "hash-a", "alpha content").await.unwrap();
        store.upsert_document(cid, "/r/b.md", "B", "hash-b", "beta content").await.unwrap();

        let runtime = FixedRuntime;
        let chunking = ChunkingConfig { chunk_chars: 1000, chunk_overlap: 200 };
        let counts = embed(&store, &runtime, &chunking, false, &NoProgress, &|| true).await.unwrap();

        assert!(counts.cancelled);
        assert_eq!(counts.embedded, 0);
    }

    #[tokio::test]
    async fn force_reembeds_hashes_that_already_have_vectors() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/a.md", "A", "hash-a", "alpha content").await.unwrap();

        let runtime = FixedRuntime;
        let chunking = ChunkingConfig { chunk_chars: 1000, chunk_overlap: 200 };

        let first = embed(&store, &runtime, &chunking, false, &NoProgress, &|| false).await.unwrap();
        assert_eq!(first.embedded, 1);
        assert!(store.hashes_needing_embedding().await.unwrap().is_empty());

        let second = embed(&store, &runtime, &chunking, true, &NoProgress, &|| false).await.unwrap();
        assert_eq!(second.embedded, 1, "force should re-embed documents that already have vectors");
        assert!(store.hashes_needing_embedding().await.unwrap().is_empty());
    }
}
