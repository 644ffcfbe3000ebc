//! # qmd
//!
//! **A local-first hybrid search engine over Markdown documents.**
//!
//! qmd ingests a directory tree of Markdown files into a SQLite index, then
//! answers queries by fusing lexical (FTS5/BM25) and semantic (vector/ANN)
//! retrieval with reciprocal rank fusion and an optional cross-encoder
//! reranking pass. It is exposed both as a CLI and as an MCP server (stdio or
//! streamable-HTTP) for use from AI coding assistants.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌───────────┐
//! │ Filesystem │──▶│  Ingest   │──▶│  SQLite    │
//! │  walker    │   │ chunk+hash│   │ FTS5+vec0  │
//! └────────────┘   └───────────┘   └─────┬─────┘
//!                                        │
//!                     ┌──────────────────┤
//!                     ▼                  ▼
//!                ┌──────────┐      ┌───────────┐
//!                │   CLI    │      │  MCP/HTTP  │
//!                │  (qmd)   │      │  (rmcp)    │
//!                └──────────┘      └───────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. [`ingest`] walks a collection root, hashes each file's content, and
//!    upserts it into the [`store`].
//! 2. [`ingest::embed_pass`] chunks any document still missing vectors
//!    ([`chunk`]) and embeds each chunk through the active [`model_runtime`].
//! 3. [`retrieval`] normalises a query, expands it into lexical/vector/HyDE
//!    sub-queries, fuses the hits with [`retrieval::rrf`], optionally
//!    reranks the top candidates, and extracts a snippet per hit.
//! 4. Results reach callers via the CLI (`qmd search`/`vsearch`/`query`) or
//!    the [`mcp`] server's `query`/`get`/`multi_get`/`status` tools.
//!
//! ## Quick start
//!
//! ```bash
//! qmd init                      # create the index
//! qmd add "notes/**/*.md"       # ingest a collection
//! qmd embed                     # generate embeddings
//! qmd query "how do I deploy"   # hybrid search with fusion + rerank
//! qmd mcp                       # start the MCP server
//! ```
//!
//! ## Search surfaces
//!
//! | Command | Engine | Requires embeddings |
//! |---------|--------|----------------------|
//! | `search` | SQLite FTS5 (BM25) only | No |
//! | `vsearch` | Vector/ANN only | Yes |
//! | `query` | RRF fusion of both, optionally reranked | Yes |
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing, validation, env overrides |
//! | [`error`] | `QmdError` typed kinds for the CLI exit-code / MCP `isError` boundary |
//! | [`path_util`] | Index path resolution, display-path derivation |
//! | [`hashing`] | Content hashing for change detection |
//! | [`chunk`] | Overlapping paragraph-boundary text chunker |
//! | [`db`] | SQLite connection pool, WAL mode, `sqlite-vec` extension load |
//! | [`migrate`] | Idempotent schema creation |
//! | [`store`] | `Store` trait: all persistence and retrieval primitives |
//! | [`model_runtime`] | `ModelRuntime` trait: embed/rerank/expand, provider registry, session manager |
//! | [`ingest`] | Filesystem scan → hash/upsert reconciliation, embedding pass |
//! | [`retrieval`] | Query normalisation, expansion, RRF fusion, reranking, snippets |
//! | [`get`] | Document retrieval by path, shared by the CLI and MCP surfaces |
//! | [`status`] | `qmd status` printer over `Store::status()` |
//! | [`cleanup`] | Retention-window hard delete (`qmd cleanup`) |
//! | [`format`] | Human-readable byte/time/ETA/score formatting |
//! | [`progress`] | Sync progress reporting during `add`/`embed` |
//! | [`mcp`] | `rmcp` server handler plus stdio/HTTP transports |
//!
//! ## Configuration
//!
//! qmd is configured from a project-local `qmd.toml`, overridden by `QMD_*`
//! environment variables. See [`config`] for every option and
//! [`config::load_config`] for validation rules.

pub mod chunk;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod get;
pub mod hashing;
pub mod ingest;
pub mod mcp;
pub mod migrate;
pub mod model_runtime;
pub mod path_util;
pub mod progress;
pub mod retrieval;
pub mod status;
pub mod store;
