//! Local (on-device) Model Runtime variant, adapted from the teacher's
//! `fastembed`-backed `LocalProvider`. Reranking and generation are not
//! available locally in this build — `rerank`/`generate` fall back to the
//! deterministic "no score" / `None` behaviour §4.5 allows for a recoverable
//! failure, and `expand_query` uses the same cheap heuristic fallback.

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::Config;

use super::{fallback_expansion, EmbedRole, EmbeddingResult, ModelRuntime, Queryable, RerankCandidate, RerankOutput};

const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

fn resolve_dims(model_name: &str) -> usize {
    match model_name {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    use fastembed::EmbeddingModel::*;
    Ok(match name {
        "all-minilm-l6-v2" => AllMiniLML6V2,
        "bge-small-en-v1.5" => BGESmallENV15,
        "bge-base-en-v1.5" => BGEBaseENV15,
        "bge-large-en-v1.5" => BGELargeENV15,
        "nomic-embed-text-v1" => NomicEmbedTextV1,
        "nomic-embed-text-v1.5" => NomicEmbedTextV15,
        "multilingual-e5-small" => MultilingualE5Small,
        "multilingual-e5-base" => MultilingualE5Base,
        "multilingual-e5-large" => MultilingualE5Large,
        other => anyhow::bail!("unknown local embedding model: '{}'", other),
    })
}

pub struct LocalRuntime {
    model_name: String,
    dims: usize,
    batch_size: usize,
}

impl LocalRuntime {
    pub fn new(config: &Config) -> Result<Self> {
        let model_name = std::env::var("QMD_EMBED_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let dims = resolve_dims(&model_name);
        Ok(Self {
            model_name,
            dims,
            batch_size: config.embedding.batch_size,
        })
    }

    fn format(&self, text: &str, role: &EmbedRole<'_>) -> String {
        match role {
            EmbedRole::Query => format!("search_query: {}", text),
            EmbedRole::Document { title } => format!("search_document: {}\n\n{}", title, text),
        }
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    async fn embed_one(&self, formatted: String) -> Result<Vec<f32>> {
        let model_name = self.model_name.clone();
        let batch_size = self.batch_size;
        tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
            let fastembed_model = config_to_fastembed_model(&model_name)?;
            let mut model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
            )
            .context("failed to initialize local embedding model")?;
            let mut embeddings = model
                .embed(vec![formatted], Some(batch_size))
                .context("local embedding failed")?;
            embeddings
                .pop()
                .ok_or_else(|| anyhow::anyhow!("local embedding returned no vectors"))
        })
        .await?
    }

    #[cfg(not(feature = "local-embeddings-fastembed"))]
    async fn embed_one(&self, _formatted: String) -> Result<Vec<f32>> {
        anyhow::bail!(
            "local embedding requires the local-embeddings-fastembed (or local-embeddings-tract) feature"
        )
    }
}

#[async_trait]
impl ModelRuntime for LocalRuntime {
    async fn embed(&self, text: &str, role: EmbedRole<'_>) -> Option<EmbeddingResult> {
        let formatted = self.format(text, &role);
        match self.embed_one(formatted).await {
            Ok(vector) => {
                if vector.len() != self.dims {
                    tracing::warn!(expected = self.dims, actual = vector.len(), "embedding dimension mismatch");
                }
                Some(EmbeddingResult {
                    vector,
                    model: self.model_name.clone(),
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "local embed failed");
                None
            }
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<EmbeddingResult>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text, EmbedRole::Query).await);
        }
        out
    }

    async fn generate(&self, _prompt: &str) -> Option<String> {
        tracing::warn!("generate is not available on the local runtime");
        None
    }

    async fn expand_query(&self, text: &str, _context: Option<&str>, include_lexical: bool) -> Vec<Queryable> {
        fallback_expansion(text, include_lexical)
    }

    async fn rerank(&self, _query: &str, _candidates: &[RerankCandidate]) -> Option<RerankOutput> {
        tracing::warn!("rerank is not available on the local runtime");
        None
    }

    fn model_exists(&self, name: &str) -> bool {
        name == self.model_name
    }

    async fn dispose(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_model_dims() {
        assert_eq!(resolve_dims("bge-base-en-v1.5"), 768);
        assert_eq!(resolve_dims("unknown-model"), 384);
    }
}
