//! Retrieval pipeline (§4.3): normalised query → strong-signal probe →
//! expansion → concurrent sub-searches → RRF fusion → reranking → snippets.

pub mod expand;
pub mod rrf;
pub mod snippet;

use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::model_runtime::{EmbedRole, ModelRuntime, QueryableKind, RerankCandidate};
use crate::store::Store;

pub use expand::{NormalizedQuery, SubSearchSpec};
pub use rrf::RankedHit;
pub use snippet::{extract_snippet, Snippet};

/// One scored, snippeted search result (§4.3 step 7).
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document_id: i64,
    pub file: String,
    pub title: String,
    pub score: f64,
    pub context: Option<String>,
    pub snippet: String,
    pub snippet_start_line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub min_score: Option<f64>,
    pub collections: Option<Vec<i64>>,
    pub intent: Option<String>,
    pub context_hint: Option<String>,
}

/// Run the full pipeline against `store`/`runtime` for query `q`.
pub async fn search(
    store: &dyn Store,
    runtime: &dyn ModelRuntime,
    config: &RetrievalConfig,
    q: &NormalizedQuery,
    options: &SearchOptions,
) -> anyhow::Result<Vec<SearchResult>> {
    let final_limit = options.limit.unwrap_or(config.default_final_limit);
    let fetch_limit = (2 * final_limit).max(50);

    // Step 1: strong-signal probe.
    let probe_bypasses_expansion = q.sub_searches.is_none()
        && !q.has_caller_expansions()
        && options.intent.is_none()
        && {
            let probe = store.search_fts(&q.text, 1, options.collections.as_deref()).await?;
            probe.first().map(|h| h.raw_score > config.strong_signal_threshold).unwrap_or(false)
        };

    // Step 2: expansion.
    let sub_queries = if probe_bypasses_expansion {
        vec![crate::model_runtime::Queryable {
            kind: QueryableKind::Lex,
            text: q.text.clone(),
        }]
    } else {
        expand::expand(q, runtime, options.context_hint.as_deref(), true).await
    };

    if sub_queries.is_empty() {
        return Ok(Vec::new());
    }

    // Step 3: execute each sub-query on its backend, concurrently.
    let sub_futures = sub_queries.iter().map(|sub| {
        run_sub_query(store, runtime, sub, fetch_limit, options.collections.as_deref())
    });
    let executed: Vec<(Vec<RankedHit>, HashMap<String, (i64, String, String)>)> =
        futures_util::future::join_all(sub_futures).await.into_iter().collect::<anyhow::Result<_>>()?;

    let lists: Vec<Vec<RankedHit>> = executed.iter().map(|(l, _)| l.clone()).collect();
    let mut doc_meta: HashMap<String, (i64, String, String)> = HashMap::new();
    for (_, meta) in &executed {
        for (file, v) in meta {
            doc_meta.entry(file.clone()).or_insert_with(|| v.clone());
        }
    }

    let weights: Vec<f64> = (0..lists.len()).map(|i| if i == 0 { 2.0 } else { 1.0 }).collect();
    let descriptors: Vec<&str> = sub_queries
        .iter()
        .map(|s| match s.kind {
            QueryableKind::Lex => "lex",
            QueryableKind::Vec => "vec",
            QueryableKind::Hyde => "hyde",
        })
        .collect();

    // Step 4: RRF fusion.
    let fused = rrf::rrf_fuse(&lists, &weights, &descriptors, config.rrf_k);

    // Step 5: rerank the top `rerank_candidates`.
    let top_n: Vec<(usize, String, f64)> = fused
        .iter()
        .enumerate()
        .take(config.rerank_candidates)
        .map(|(i, (file, score))| (i + 1, file.clone(), *score))
        .collect();

    let candidates: Vec<RerankCandidate> = top_n
        .iter()
        .filter_map(|(_, file, _)| {
            doc_meta.get(file).map(|(_, _, body)| RerankCandidate {
                file: file.clone(),
                text: body.clone(),
            })
        })
        .collect();

    let rerank_scores: HashMap<String, f64> = rerank_with_cache(store, runtime, &q.text, &candidates).await?;

    let mut blended: Vec<(String, f64)> = top_n
        .into_iter()
        .map(|(rank, file, rrf_score)| {
            let (rrf_weight, rerank_weight) = blend_weights(config, rank);
            let rerank_score = rerank_scores.get(&file).copied();
            let blended_score = match rerank_score {
                Some(rs) => rrf_weight * rrf_score + rerank_weight * rs,
                None => rrf_score,
            };
            (file, (blended_score * 100.0).round() / 100.0)
        })
        .collect();
    blended.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    // Steps 6-7: snippets, truncation, min_score, context.
    let query_tokens: Vec<&str> = q.text.split_whitespace().collect();
    let mut results = Vec::new();
    for (file, score) in blended {
        if let Some(min_score) = options.min_score {
            if score < min_score {
                continue;
            }
        }
        let Some((document_id, title, body)) = doc_meta.get(&file) else {
            continue;
        };
        let snippet = extract_snippet(body, &query_tokens);
        let context = store.get_context(&file).await?;
        results.push(SearchResult {
            document_id: *document_id,
            file,
            title: title.clone(),
            score,
            context,
            snippet: snippet.text,
            snippet_start_line: snippet.start_line,
        });
        if results.len() >= final_limit {
            break;
        }
    }

    Ok(results)
}

/// Read-through rerank cache (§3 "Ollama/rerank cache"): a hit skips the
/// network call entirely, a miss reranks then writes the result through.
async fn rerank_with_cache(
    store: &dyn Store,
    runtime: &dyn ModelRuntime,
    query: &str,
    candidates: &[RerankCandidate],
) -> anyhow::Result<HashMap<String, f64>> {
    if candidates.is_empty() {
        return Ok(HashMap::new());
    }

    let mut canonical = query.to_string();
    for c in candidates {
        canonical.push('\u{1}');
        canonical.push_str(&c.file);
        canonical.push('\u{1}');
        canonical.push_str(&c.text);
    }
    let key = crate::store::sqlite::rerank_cache_key("rerank", &canonical);
    let ttl = chrono::Duration::days(crate::cleanup::RERANK_CACHE_TTL_DAYS);

    if let Some(cached) = store.get_cached_rerank(&key, ttl).await? {
        if let Ok(scores) = serde_json::from_str::<HashMap<String, f64>>(&cached) {
            return Ok(scores);
        }
    }

    let scores: HashMap<String, f64> = match runtime.rerank(query, candidates).await {
        Some(output) => output.results.into_iter().map(|r| (r.file, r.score)).collect(),
        None => HashMap::new(),
    };
    if !scores.is_empty() {
        if let Ok(json) = serde_json::to_string(&scores) {
            store.put_cached_rerank(&key, &json).await?;
        }
    }
    Ok(scores)
}

fn blend_weights(config: &RetrievalConfig, fused_rank: usize) -> (f64, f64) {
    match fused_rank {
        1..=3 => config.rerank_blend_top,
        4..=10 => config.rerank_blend_mid,
        _ => config.rerank_blend_tail,
    }
}

type SubSearchOutput = (Vec<RankedHit>, HashMap<String, (i64, String, String)>);

async fn run_sub_query(
    store: &dyn Store,
    runtime: &dyn ModelRuntime,
    sub: &crate::model_runtime::Queryable,
    fetch_limit: usize,
    collections: Option<&[i64]>,
) -> anyhow::Result<SubSearchOutput> {
    match sub.kind {
        QueryableKind::Lex => {
            let hits = store.search_fts(&sub.text, fetch_limit, collections).await?;
            let mut meta = HashMap::new();
            let ranked = hits
                .into_iter()
                .map(|h| {
                    meta.insert(h.file.clone(), (h.document_id, h.title.clone(), h.body.clone()));
                    RankedHit { file: h.file, score: h.score }
                })
                .collect();
            Ok((ranked, meta))
        }
        QueryableKind::Vec | QueryableKind::Hyde => {
            let Some(embedded) = runtime.embed(&sub.text, EmbedRole::Query).await else {
                return Ok((Vec::new(), HashMap::new()));
            };
            let hits = store.search_vec(&embedded.vector, fetch_limit, collections).await?;
            let mut meta = HashMap::new();
            let ranked = hits
                .into_iter()
                .map(|h| {
                    meta.insert(h.file.clone(), (h.document_id, h.title.clone(), h.body.clone()));
                    RankedHit { file: h.file, score: h.score }
                })
                .collect();
            Ok((ranked, meta))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::model_runtime::{EmbeddingResult, RerankOutput, RerankResult};
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    struct CountingRerankRuntime {
        inner: MockRuntime,
        rerank_calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ModelRuntime for CountingRerankRuntime {
        async fn embed(&self, text: &str, role: EmbedRole<'_>) -> Option<EmbeddingResult> {
            self.inner.embed(text, role).await
        }
        async fn embed_batch(&self, texts: &[String]) -> Vec<Option<EmbeddingResult>> {
            self.inner.embed_batch(texts).await
        }
        async fn generate(&self, prompt: &str) -> Option<String> {
            self.inner.generate(prompt).await
        }
        async fn expand_query(&self, text: &str, context: Option<&str>, include_lexical: bool) -> Vec<crate::model_runtime::Queryable> {
            self.inner.expand_query(text, context, include_lexical).await
        }
        async fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Option<RerankOutput> {
            self.rerank_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.rerank(query, candidates).await
        }
        fn model_exists(&self, name: &str) -> bool {
            self.inner.model_exists(name)
        }
        async fn dispose(&self) {}
    }

    struct MockRuntime;

    #[async_trait]
    impl ModelRuntime for MockRuntime {
        async fn embed(&self, text: &str, _role: EmbedRole<'_>) -> Option<EmbeddingResult> {
            let v = if text.contains("mars") { vec![0.0, 1.0] } else { vec![1.0, 0.0] };
            Some(EmbeddingResult { vector: v, model: "mock".into() })
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
        async fn rerank(&self, _query: &str, candidates: &[RerankCandidate]) -> Option<RerankOutput> {
            let results = candidates
                .iter()
                .enumerate()
                .map(|(i, c)| RerankResult { file: c.file.clone(), score: 1.0 - (i as f64 * 0.1), index: i })
                .collect();
            Some(RerankOutput { results, model: "mock".into() })
        }
        fn model_exists(&self, _name: &str) -> bool {
            true
        }
        async fn dispose(&self) {}
    }

    #[tokio::test]
    async fn hybrid_search_returns_fused_and_reranked_results() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store
            .upsert_document(cid, "/r/deploy.md", "Deploy", "hash-a", "deploying the service to production")
            .await
            .unwrap();
        store
            .upsert_document(cid, "/r/mars.md", "Mars", "hash-b", "facts about the planet mars")
            .await
            .unwrap();
        store.ensure_vector_index(2).await.unwrap();
        store
            .insert_vectors("hash-a", &[crate::store::VectorEntry { seq: 0, pos: 0, vector: vec![1.0, 0.0] }], "mock")
            .await
            .unwrap();
        store
            .insert_vectors("hash-b", &[crate::store::VectorEntry { seq: 0, pos: 0, vector: vec![0.0, 1.0] }], "mock")
            .await
            .unwrap();

        let runtime = MockRuntime;
        let config = RetrievalConfig::default();
        let q = NormalizedQuery::from_text("deploying");
        let results = search(&store, &runtime, &config, &q, &SearchOptions::default()).await.unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].file, "/r/deploy.md");
    }

    #[tokio::test]
    async fn min_score_filters_low_scoring_results() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/a.md", "A", "hash-a", "alpha content here").await.unwrap();
        let runtime = MockRuntime;
        let config = RetrievalConfig::default();
        let q = NormalizedQuery::from_text("alpha");
        let options = SearchOptions {
            min_score: Some(10.0),
            ..Default::default()
        };
        let results = search(&store, &runtime, &config, &q, &options).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn attaches_path_context() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/ops/deploy.md", "Deploy", "hash-a", "deploying the service").await.unwrap();
        store.set_context("/r/ops", "operations runbook");

        let runtime = MockRuntime;
        let config = RetrievalConfig::default();
        let q = NormalizedQuery::from_text("deploying");
        let results = search(&store, &runtime, &config, &q, &SearchOptions::default()).await.unwrap();

        assert_eq!(results[0].context.as_deref(), Some("operations runbook"));
    }

    #[tokio::test]
    async fn rerank_result_is_cached_between_identical_queries() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store
            .upsert_document(cid, "/r/deploy.md", "Deploy", "hash-a", "deploying the service to production")
            .await
            .unwrap();

        let runtime = CountingRerankRuntime { inner: MockRuntime, rerank_calls: std::sync::atomic::AtomicUsize::new(0) };
        let config = RetrievalConfig::default();
        let q = NormalizedQuery::from_text("deploying");

        search(&store, &runtime, &config, &q, &SearchOptions::default()).await.unwrap();
        search(&store, &runtime, &config, &q, &SearchOptions::default()).await.unwrap();

        assert_eq!(runtime.rerank_calls.load(std::sync::atomic::Ordering::SeqCst), 1, "second search should hit the rerank cache");
    }
}
