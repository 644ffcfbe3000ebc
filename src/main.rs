//! `qmd` — local-first hybrid search over Markdown documents.
//!
//! This binary wires the [`qmd`] library's Store, Model Runtime, Ingest, and
//! Retrieval modules onto the CLI surface documented in SPEC_FULL.md §6.1:
//! `add`, `embed`, `search`, `vsearch`, `query`, `get`, `status`, `mcp`,
//! `init`, `cleanup`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use qmd::config::{self, Config};
use qmd::error::QmdError;
use qmd::model_runtime::{build_active_runtime, ModelRuntime};
use qmd::progress::StderrProgress;
use qmd::retrieval::expand::SubSearchSpec;
use qmd::retrieval::{self, NormalizedQuery, SearchOptions, SearchResult};
use qmd::store::sqlite::SqliteStore;
use qmd::store::Store;

#[derive(Parser)]
#[command(name = "qmd", about = "A local-first hybrid search engine over Markdown documents", version)]
struct Cli {
    /// Path to a qmd.toml configuration file
    #[arg(long, global = true, default_value = "qmd.toml")]
    config: PathBuf,

    /// Index name, used to resolve the database file (default: project directory name)
    #[arg(long, global = true)]
    index: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index database if it doesn't already exist
    Init,

    /// Ingest (or re-ingest) every file matching a glob
    Add {
        /// Glob pattern, relative to the current directory (e.g. "notes/**/*.md")
        glob: String,

        /// Extra positional args: present only when the shell expanded the glob itself
        #[arg(trailing_var_arg = true, hide = true)]
        shell_expanded: Vec<String>,
    },

    /// Generate embeddings for every document that doesn't have one yet
    Embed {
        /// Delete and regenerate every embedding, not just missing ones
        #[arg(long)]
        force: bool,
    },

    /// Lexical (BM25) search only
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Vector (semantic) search only
    Vsearch {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Hybrid search: lexical + vector, fused with RRF and reranked
    Query {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        min_score: Option<f64>,
    },

    /// Print a document by path (accepts "path:line" to jump to a line)
    Get { path: String },

    /// Print index and per-collection status
    Status,

    /// Run the MCP server (stdio by default)
    Mcp {
        /// Serve over streamable HTTP instead of stdio
        #[arg(long)]
        http: bool,
        /// Port to bind when --http is set (default: config's server.bind port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Hard-delete documents inactive for longer than the retention window
    Cleanup {
        #[arg(long)]
        older_than_days: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("qmd: {}", err);
            std::process::exit(err.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<(), QmdError> {
    let config = config::load_config(&cli.config)?;
    let index_name = cli.index.unwrap_or_else(config::default_index_name);
    let db_path = config::resolve_db_path(&index_name);

    match cli.command {
        Commands::Init => {
            SqliteStore::open(&db_path).await?;
            println!("initialized index '{}' at {}", index_name, db_path.display());
            Ok(())
        }
        Commands::Add { glob, shell_expanded } => {
            if !shell_expanded.is_empty() {
                return Err(QmdError::Usage(format!(
                    "expected a single glob pattern, got {} extra argument(s) — quote the glob so the shell doesn't expand it (e.g. \"{}\")",
                    shell_expanded.len(),
                    glob,
                )));
            }
            let store = SqliteStore::open(&db_path).await?;
            let counts = qmd::ingest::ingest(&store, ".", &glob, &StderrProgress, &|| false).await?;
            println!(
                "add: {} indexed, {} updated, {} unchanged, {} removed, {} pending embedding",
                counts.indexed, counts.updated, counts.unchanged, counts.removed, counts.needs_embedding
            );
            store.close().await;
            Ok(())
        }
        Commands::Embed { force } => {
            let store = SqliteStore::open(&db_path).await?;
            let runtime = build_active_runtime(&config)?;
            let counts = qmd::ingest::embed(&store, runtime.as_ref(), &config.chunking, force, &StderrProgress, &|| false).await?;
            println!("embed: {} embedded, {} skipped", counts.embedded, counts.skipped);
            runtime.dispose().await;
            store.close().await;
            Ok(())
        }
        Commands::Search { query, limit } => {
            run_single_channel(&db_path, &config, query, limit, SubSearchSpecKind::Lex).await
        }
        Commands::Vsearch { query, limit } => {
            run_single_channel(&db_path, &config, query, limit, SubSearchSpecKind::Vec).await
        }
        Commands::Query { query, limit, min_score } => {
            let store = SqliteStore::open(&db_path).await?;
            let runtime = build_active_runtime(&config)?;
            let q = NormalizedQuery::from_text(query.clone());
            let options = SearchOptions { limit, min_score, ..Default::default() };
            let results = retrieval::search(&store, runtime.as_ref(), &config.retrieval, &q, &options).await?;
            print_results(&results);
            store.log_search("query", &query, results.len(), &index_name).await?;
            runtime.dispose().await;
            store.close().await;
            Ok(())
        }
        Commands::Get { path } => {
            let store = SqliteStore::open(&db_path).await?;
            qmd::get::run_get(&store, &path, false).await?;
            store.close().await;
            Ok(())
        }
        Commands::Status => {
            let store = SqliteStore::open(&db_path).await?;
            qmd::status::run_status(&store, &index_name).await?;
            store.close().await;
            Ok(())
        }
        Commands::Mcp { http, port } => {
            let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path).await?);
            let runtime: Arc<dyn ModelRuntime> = build_active_runtime(&config)?.into();
            let state = Arc::new(qmd::mcp::AppState::new(store, runtime, Arc::new(config.clone()), index_name));
            if http {
                let bind_addr = resolve_bind_addr(&config, port)?;
                qmd::mcp::http::run(bind_addr, state).await?;
            } else {
                qmd::mcp::stdio::run(state).await?;
            }
            Ok(())
        }
        Commands::Cleanup { older_than_days } => {
            let store = SqliteStore::open(&db_path).await?;
            qmd::cleanup::run_cleanup(&store, older_than_days).await?;
            store.close().await;
            Ok(())
        }
    }
}

enum SubSearchSpecKind {
    Lex,
    Vec,
}

async fn run_single_channel(
    db_path: &std::path::Path,
    config: &Config,
    query: String,
    limit: Option<usize>,
    kind: SubSearchSpecKind,
) -> Result<(), QmdError> {
    let store = SqliteStore::open(db_path).await?;
    let runtime = build_active_runtime(config)?;
    let sub_kind = match kind {
        SubSearchSpecKind::Lex => qmd::model_runtime::QueryableKind::Lex,
        SubSearchSpecKind::Vec => qmd::model_runtime::QueryableKind::Vec,
    };
    let q = NormalizedQuery {
        text: query.clone(),
        sub_searches: Some(vec![SubSearchSpec { kind: sub_kind, query: query.clone() }]),
        ..Default::default()
    };
    let options = SearchOptions { limit, ..Default::default() };
    let results = retrieval::search(&store, runtime.as_ref(), &config.retrieval, &q, &options).await?;
    print_results(&results);
    runtime.dispose().await;
    store.close().await;
    Ok(())
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("no results");
        return;
    }
    for (i, r) in results.iter().enumerate() {
        println!("{}. {}  [{}]", i + 1, r.title, qmd::format::format_score(r.score));
        println!("   {}", r.file);
        if let Some(context) = &r.context {
            println!("   context: {}", context);
        }
        for line in r.snippet.lines() {
            println!("   {}", line);
        }
        println!();
    }
}

fn resolve_bind_addr(config: &Config, port: Option<u16>) -> Result<std::net::SocketAddr, QmdError> {
    let configured: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .map_err(|e| QmdError::Usage(format!("invalid server.bind address '{}': {}", config.server.bind, e)))?;
    match port {
        Some(p) => Ok(std::net::SocketAddr::new(configured.ip(), p)),
        None => Ok(configured),
    }
}
