//! Configuration parsing and validation.
//!
//! QMD is configured from, in order of increasing precedence: built-in
//! defaults, an optional project-local `qmd.toml` / `.qmd/config.toml`, then
//! `QMD_*` environment variable overrides (§6). `load_config` rejects invalid
//! combinations eagerly, before the Store is opened.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Characters per chunk (§4.2 embed pass step 3). Default 1000.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    /// Overlap in characters between consecutive chunks. Default 200.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_chars() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

/// Tunables for the retrieval pipeline (§4.3.1 — these are deliberately
/// configuration, not constants, per Design Notes §9's open question).
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Raw BM25 score above which the strong-signal probe (§4.3 step 1)
    /// short-circuits expansion.
    #[serde(default = "default_strong_signal_threshold")]
    pub strong_signal_threshold: f64,
    /// RRF's `K` constant (§4.3 step 4).
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Default number of results returned when the caller doesn't specify `limit`.
    #[serde(default = "default_final_limit")]
    pub default_final_limit: usize,
    /// How many fused candidates are sent to the reranker (§4.3 step 5).
    #[serde(default = "default_rerank_candidates")]
    pub rerank_candidates: usize,
    /// Blend weight (RRF, rerank) for fused rank 1-3.
    #[serde(default = "default_ramp_top")]
    pub rerank_blend_top: (f64, f64),
    /// Blend weight (RRF, rerank) for fused rank 4-10.
    #[serde(default = "default_ramp_mid")]
    pub rerank_blend_mid: (f64, f64),
    /// Blend weight (RRF, rerank) for fused rank 11+.
    #[serde(default = "default_ramp_tail")]
    pub rerank_blend_tail: (f64, f64),
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            strong_signal_threshold: default_strong_signal_threshold(),
            rrf_k: default_rrf_k(),
            default_final_limit: default_final_limit(),
            rerank_candidates: default_rerank_candidates(),
            rerank_blend_top: default_ramp_top(),
            rerank_blend_mid: default_ramp_mid(),
            rerank_blend_tail: default_ramp_tail(),
        }
    }
}

fn default_strong_signal_threshold() -> f64 {
    8.0
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_final_limit() -> usize {
    12
}
fn default_rerank_candidates() -> usize {
    30
}
fn default_ramp_top() -> (f64, f64) {
    (0.75, 0.25)
}
fn default_ramp_mid() -> (f64, f64) {
    (0.60, 0.40)
}
fn default_ramp_tail() -> (f64, f64) {
    (0.40, 0.60)
}

/// Selects and configures the embedding half of the Model Runtime (§4.5).
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    60
}

/// Rerank-specific overrides, separate from the embedding endpoint because
/// §6 allows independent `QMD_API_RERANK_*` env vars.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RerankConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7865".to_string()
}

/// Session manager tunables (§4.5 session manager, §5 timeouts).
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_idle_unload_secs")]
    pub idle_unload_secs: u64,
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    #[serde(default)]
    pub aggressive_reclaim: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_unload_secs: default_idle_unload_secs(),
            max_duration_secs: default_max_duration_secs(),
            aggressive_reclaim: false,
        }
    }
}

fn default_idle_unload_secs() -> u64 {
    5 * 60
}
fn default_max_duration_secs() -> u64 {
    10 * 60
}

/// Active Model Runtime provider, from `QMD_LLM_PROVIDER` (§6). Unknown
/// values fall back to `Local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Local,
    OpenRouter,
}

impl LlmProvider {
    pub fn from_env() -> Self {
        match std::env::var("QMD_LLM_PROVIDER").as_deref() {
            Ok("openrouter") => LlmProvider::OpenRouter,
            _ => LlmProvider::Local,
        }
    }
}

/// Remote embedding endpoint settings, read from env at runtime construction
/// rather than stored in `Config` — they may contain a secret API key and
/// shouldn't round-trip through a TOML file.
#[derive(Debug, Clone, Default)]
pub struct RemoteEndpoints {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub embed_model: Option<String>,
    pub rerank_key: Option<String>,
    pub rerank_base_url: Option<String>,
    pub rerank_model: Option<String>,
}

impl RemoteEndpoints {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("QMD_API_KEY").ok(),
            base_url: std::env::var("QMD_API_BASE_URL").ok(),
            embed_model: std::env::var("QMD_API_EMBED_MODEL").ok(),
            rerank_key: std::env::var("QMD_API_RERANK_KEY").ok(),
            rerank_base_url: std::env::var("QMD_API_RERANK_BASE_URL").ok(),
            rerank_model: std::env::var("QMD_API_RERANK_MODEL").ok(),
        }
    }
}

/// Load configuration from `path` if it exists, else defaults; then apply
/// nothing further here — env var overrides for provider selection and
/// remote endpoints are read directly at Model Runtime construction time
/// since §6 documents them as runtime, not config-file, inputs.
pub fn load_config(path: &Path) -> Result<Config> {
    let config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "failed to parse config file")?
    } else {
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_chars == 0 {
        anyhow::bail!("chunking.chunk_chars must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_chars {
        anyhow::bail!("chunking.chunk_overlap must be less than chunking.chunk_chars");
    }
    if config.retrieval.default_final_limit < 1 {
        anyhow::bail!("retrieval.default_final_limit must be >= 1");
    }
    if config.retrieval.rrf_k <= 0.0 {
        anyhow::bail!("retrieval.rrf_k must be > 0");
    }
    if config.retrieval.rerank_candidates < config.retrieval.default_final_limit {
        anyhow::bail!("retrieval.rerank_candidates must be >= retrieval.default_final_limit");
    }
    Ok(())
}

/// Index name resolution helper: project dir basename, or "default".
pub fn default_index_name() -> String {
    std::env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "default".to_string())
}

/// Resolve the database path for the active index (§3, §4.6 `db_path`).
pub fn resolve_db_path(index_name: &str) -> PathBuf {
    crate::path_util::db_path(index_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let mut config = Config::default();
        config.chunking.chunk_chars = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk() {
        let mut config = Config::default();
        config.chunking.chunk_overlap = config.chunking.chunk_chars;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn provider_falls_back_to_local_on_unknown() {
        std::env::set_var("QMD_LLM_PROVIDER", "something-else");
        assert_eq!(LlmProvider::from_env(), LlmProvider::Local);
        std::env::remove_var("QMD_LLM_PROVIDER");
    }

    #[test]
    fn provider_selects_openrouter() {
        std::env::set_var("QMD_LLM_PROVIDER", "openrouter");
        assert_eq!(LlmProvider::from_env(), LlmProvider::OpenRouter);
        std::env::remove_var("QMD_LLM_PROVIDER");
    }
}
