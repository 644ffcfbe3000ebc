//! Remote (OpenAI-compatible) Model Runtime variant, adapted from the
//! teacher's `OpenAIProvider`/`embed_openai` retry-with-backoff logic and
//! extended with a dedicated rerank endpoint and `expand_query` over chat
//! completions, per §4.5's "OpenAI-compatible remote" / "Rerank-capable
//! remote" variants.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::{Config, RemoteEndpoints};

use super::{
    fallback_expansion, EmbedRole, EmbeddingResult, ModelRuntime, Queryable, QueryableKind, RerankCandidate,
    RerankOutput, RerankResult,
};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct RemoteRuntime {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    embed_model: String,
    rerank_key: Option<String>,
    rerank_base_url: Option<String>,
    rerank_model: Option<String>,
    max_retries: u32,
}

impl RemoteRuntime {
    pub fn new(config: &Config, endpoints: RemoteEndpoints) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.embedding.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: endpoints.api_key,
            base_url: endpoints.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            embed_model: endpoints.embed_model.unwrap_or_else(|| "text-embedding-3-small".to_string()),
            rerank_key: endpoints.rerank_key,
            rerank_base_url: endpoints.rerank_base_url,
            rerank_model: endpoints.rerank_model,
            max_retries: config.embedding.max_retries,
        })
    }

    fn format(&self, text: &str, role: &EmbedRole<'_>) -> String {
        match role {
            EmbedRole::Query => format!("search_query: {}", text),
            EmbedRole::Document { title } => format!("search_document: {}\n\n{}", title, text),
        }
    }

    async fn embed_remote(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("QMD_API_KEY not set"))?;

        let body = serde_json::json!({ "model": self.embed_model, "input": texts });
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embeddings_response(&json);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!("remote embeddings error {}", status));
                        continue;
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("remote embeddings error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("remote embedding failed after retries")))
    }

    async fn rerank_remote(&self, query: &str, candidates: &[RerankCandidate]) -> Result<RerankOutput> {
        let base_url = self
            .rerank_base_url
            .as_deref()
            .or(Some(self.base_url.as_str()))
            .unwrap();
        let key = self.rerank_key.as_deref().or(self.api_key.as_deref());
        let key = key.ok_or_else(|| anyhow::anyhow!("no rerank API key configured"))?;
        let model = self.rerank_model.clone().unwrap_or_else(|| "rerank-v1".to_string());

        let documents: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        let body = serde_json::json!({ "model": model, "query": query, "documents": documents });
        let url = format!("{}/rerank", base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", key))
            .json(&body)
            .send()
            .await
            .context("rerank request failed")?;

        if !response.status().is_success() {
            bail!("rerank endpoint returned {}", response.status());
        }

        let json: serde_json::Value = response.json().await?;
        let results_json = json
            .get("results")
            .and_then(|r| r.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid rerank response: missing results"))?;

        let mut results = Vec::with_capacity(results_json.len());
        for item in results_json {
            let index = item.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let score = item.get("relevance_score").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let file = candidates.get(index).map(|c| c.file.clone()).unwrap_or_default();
            results.push(RerankResult { file, score, index });
        }
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        Ok(RerankOutput { results, model })
    }
}

fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing embedding"))?;
        embeddings.push(embedding.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect());
    }
    Ok(embeddings)
}

#[async_trait]
impl ModelRuntime for RemoteRuntime {
    async fn embed(&self, text: &str, role: EmbedRole<'_>) -> Option<EmbeddingResult> {
        let formatted = self.format(text, &role);
        match self.embed_remote(&[formatted]).await {
            Ok(mut vectors) => vectors.pop().map(|vector| EmbeddingResult {
                vector,
                model: self.embed_model.clone(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "remote embed failed");
                None
            }
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<EmbeddingResult>> {
        let formatted: Vec<String> = texts.iter().map(|t| self.format(t, &EmbedRole::Query)).collect();
        match self.embed_remote(&formatted).await {
            Ok(vectors) => vectors
                .into_iter()
                .map(|v| {
                    Some(EmbeddingResult {
                        vector: v,
                        model: self.embed_model.clone(),
                    })
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "remote embed_batch failed");
                texts.iter().map(|_| None).collect()
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Option<String> {
        let api_key = self.api_key.as_deref()?;
        let body = serde_json::json!({
            "model": self.rerank_model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
            "messages": [{"role": "user", "content": prompt}],
        });
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self.client.post(&url).header("Authorization", format!("Bearer {}", api_key)).json(&body).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let json: serde_json::Value = response.json().await.ok()?;
        json.get("choices")?.get(0)?.get("message")?.get("content")?.as_str().map(|s| s.to_string())
    }

    async fn expand_query(&self, text: &str, context: Option<&str>, include_lexical: bool) -> Vec<Queryable> {
        let prompt = format!(
            "Expand the following search query into lexical keywords and a short hypothetical passage. \
             Context: {}. Query: {}",
            context.unwrap_or("none"),
            text
        );
        match self.generate(&prompt).await {
            Some(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(value) => parse_expansion(&value, text, include_lexical),
                Err(_) => fallback_expansion(text, include_lexical),
            },
            None => fallback_expansion(text, include_lexical),
        }
    }

    async fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Option<RerankOutput> {
        match self.rerank_remote(query, candidates).await {
            Ok(out) => Some(out),
            Err(e) => {
                tracing::warn!(error = %e, "remote rerank failed");
                None
            }
        }
    }

    fn model_exists(&self, name: &str) -> bool {
        name == self.embed_model
    }

    async fn dispose(&self) {}
}

fn parse_expansion(value: &serde_json::Value, original: &str, include_lexical: bool) -> Vec<Queryable> {
    let mut out = Vec::new();
    if include_lexical {
        if let Some(keywords) = value.get("lex").and_then(|v| v.as_array()) {
            for kw in keywords {
                if let Some(s) = kw.as_str() {
                    out.push(Queryable {
                        kind: QueryableKind::Lex,
                        text: format!("{} {}", original, s),
                    });
                }
            }
        }
    }
    if let Some(concepts) = value.get("vec").and_then(|v| v.as_array()) {
        for c in concepts {
            if let Some(s) = c.as_str() {
                out.push(Queryable {
                    kind: QueryableKind::Vec,
                    text: s.to_string(),
                });
            }
        }
    }
    if let Some(passage) = value.get("hyde").and_then(|v| v.as_str()) {
        out.push(Queryable {
            kind: QueryableKind::Hyde,
            text: passage.to_string(),
        });
    }

    if out.is_empty() {
        return fallback_expansion(original, include_lexical);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_embeddings_response_extracts_vectors() {
        let json = serde_json::json!({
            "data": [{"embedding": [1.0, 2.0]}, {"embedding": [3.0, 4.0]}]
        });
        let vectors = parse_embeddings_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn parse_expansion_falls_back_when_empty() {
        let value = serde_json::json!({});
        let out = parse_expansion(&value, "deploy", true);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn parse_expansion_reads_each_channel() {
        let value = serde_json::json!({
            "lex": ["staging"],
            "vec": ["rollout process"],
            "hyde": "a document about deploying services"
        });
        let out = parse_expansion(&value, "deploy", true);
        assert_eq!(out.len(), 3);
        assert!(out.iter().any(|q| q.kind == QueryableKind::Hyde));
    }
}
