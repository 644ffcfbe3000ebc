//! Model Runtime (§4.5): embedding, reranking, and query expansion behind a
//! provider-agnostic interface. Generalises the teacher's `EmbeddingProvider`
//! trait (embed-only) into the full capability set the retrieval pipeline
//! needs, and adds the session manager (§4.5.2) and provider registry
//! (§4.5.1) the teacher has no equivalent of.

pub mod local;
pub mod remote;
pub mod session;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::config::{Config, LlmProvider, RemoteEndpoints};

/// One expanded sub-query, tagged by retrieval channel (§4.3 query surface).
#[derive(Debug, Clone, PartialEq)]
pub struct Queryable {
    pub kind: QueryableKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryableKind {
    Lex,
    Vec,
    Hyde,
}

/// Role an embedded text plays, used to choose the provider's formatting
/// prefix (`"search_query: "` vs `"search_document: <title>\n\n"`).
pub enum EmbedRole<'a> {
    Query,
    Document { title: &'a str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RerankCandidate {
    pub file: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RerankResult {
    pub file: String,
    pub score: f64,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RerankOutput {
    pub results: Vec<RerankResult>,
    pub model: String,
}

/// Provider-agnostic capability set (§4.5). Embedding/rerank failures are
/// recoverable — they return `None`/a deterministic fallback and log, per
/// the "must not throw" contract — while a `dispose` failure is fatal.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn embed(&self, text: &str, role: EmbedRole<'_>) -> Option<EmbeddingResult>;

    /// Preserves input order; lossy on a per-item error.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<EmbeddingResult>>;

    async fn generate(&self, prompt: &str) -> Option<String>;

    /// Returns a non-empty list on success; on failure returns the
    /// deterministic fallback `[{lex,text},{vec,text}]` (or vec-only when
    /// `include_lexical` is false).
    async fn expand_query(&self, text: &str, context: Option<&str>, include_lexical: bool) -> Vec<Queryable>;

    /// Sorted by score descending; scores in `[0, 1]`.
    async fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Option<RerankOutput>;

    fn model_exists(&self, name: &str) -> bool;

    /// Release native resources in reverse dependency order. Safe to call
    /// more than once.
    async fn dispose(&self);
}

/// Deterministic fallback per §4.5's `expand_query` contract.
pub fn fallback_expansion(text: &str, include_lexical: bool) -> Vec<Queryable> {
    let mut out = Vec::new();
    if include_lexical {
        out.push(Queryable {
            kind: QueryableKind::Lex,
            text: text.to_string(),
        });
    }
    out.push(Queryable {
        kind: QueryableKind::Vec,
        text: text.to_string(),
    });
    out
}

/// Named factory for one Model Runtime variant, grounded on the pack's
/// backend-registry pattern (§4.5.1): a small trait so the registry can be
/// extended with a new provider without touching call sites.
pub trait RuntimeFactory: Send + Sync {
    fn create(&self, config: &Config, endpoints: &RemoteEndpoints) -> anyhow::Result<Box<dyn ModelRuntime>>;
}

struct LocalFactory;
impl RuntimeFactory for LocalFactory {
    fn create(&self, config: &Config, _endpoints: &RemoteEndpoints) -> anyhow::Result<Box<dyn ModelRuntime>> {
        Ok(Box::new(local::LocalRuntime::new(config)?))
    }
}

struct OpenRouterFactory;
impl RuntimeFactory for OpenRouterFactory {
    fn create(&self, config: &Config, endpoints: &RemoteEndpoints) -> anyhow::Result<Box<dyn ModelRuntime>> {
        Ok(Box::new(remote::RemoteRuntime::new(config, endpoints.clone())?))
    }
}

/// Maps `QMD_LLM_PROVIDER` values to concrete runtime constructors.
pub struct ProviderRegistry {
    factories: HashMap<&'static str, Box<dyn RuntimeFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let mut factories: HashMap<&'static str, Box<dyn RuntimeFactory>> = HashMap::new();
        factories.insert("local", Box::new(LocalFactory));
        factories.insert("openrouter", Box::new(OpenRouterFactory));
        Self { factories }
    }

    pub fn available_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn create(&self, provider: LlmProvider, config: &Config, endpoints: &RemoteEndpoints) -> anyhow::Result<Box<dyn ModelRuntime>> {
        let name = match provider {
            LlmProvider::Local => "local",
            LlmProvider::OpenRouter => "openrouter",
        };
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("no Model Runtime factory registered for '{}'", name))?;
        factory.create(config, endpoints)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the active Model Runtime from `QMD_LLM_PROVIDER` and the
/// `QMD_API_*` endpoint env vars (§6).
pub fn build_active_runtime(config: &Config) -> anyhow::Result<Box<dyn ModelRuntime>> {
    let registry = ProviderRegistry::new();
    let provider = LlmProvider::from_env();
    let endpoints = RemoteEndpoints::from_env();
    registry.create(provider, config, &endpoints)
}

/// Encode a float vector as a little-endian `f32` BLOB (sqlite-vec format).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`] back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn registry_lists_both_providers() {
        let registry = ProviderRegistry::new();
        assert_eq!(registry.available_names(), vec!["local", "openrouter"]);
    }

    #[test]
    fn fallback_expansion_includes_lexical_when_requested() {
        let exp = fallback_expansion("deploy", true);
        assert_eq!(exp.len(), 2);
        assert_eq!(exp[0].kind, QueryableKind::Lex);
        assert_eq!(exp[1].kind, QueryableKind::Vec);
    }

    #[test]
    fn fallback_expansion_is_vec_only_without_lexical() {
        let exp = fallback_expansion("deploy", false);
        assert_eq!(exp.len(), 1);
        assert_eq!(exp[0].kind, QueryableKind::Vec);
    }
}
