//! HTTP transport for the MCP surface (§4.4.1): `/health`, `/search`, and
//! `/query` REST aliases alongside the `/mcp` JSON-RPC endpoint, the way the
//! teacher's `server.rs` mounts REST handlers behind a permissive CORS layer
//! — plus a streamable-HTTP-mounted `rmcp` service, which the teacher's
//! hand-rolled REST facade never had.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use super::{AppState, QmdMcpServer};

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct HttpError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail { code: self.code.to_string(), message: self.message },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> HttpError {
    HttpError { status: StatusCode::BAD_REQUEST, code: "bad_request", message: message.into() }
}

fn internal_error(message: impl Into<String>) -> HttpError {
    HttpError { status: StatusCode::INTERNAL_SERVER_ERROR, code: "internal", message: message.into() }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    uptime: u64,
    version: String,
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime: state.uptime_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Deserialize)]
struct QueryRequest {
    searches: Vec<SubSearchRequest>,
    limit: Option<usize>,
    #[serde(rename = "minScore")]
    min_score: Option<f64>,
    collections: Option<Vec<i64>>,
}

#[derive(Deserialize)]
struct SubSearchRequest {
    #[serde(rename = "type")]
    kind: String,
    query: String,
}

#[derive(Serialize)]
struct QueryResponse {
    results: Vec<serde_json::Value>,
}

/// `POST /query` (and its `/search` alias) — REST alias of the `query` MCP
/// tool, for clients that don't speak JSON-RPC (§4.4.1 "plain axum routes
/// (`/health`, `/search`, `/query`) under one Router").
async fn handle_query(State(state): State<Arc<AppState>>, Json(req): Json<QueryRequest>) -> Result<Json<QueryResponse>, HttpError> {
    if req.searches.is_empty() || req.searches.len() > 10 {
        return Err(bad_request("searches must contain between 1 and 10 entries"));
    }

    let sub_searches: Vec<crate::retrieval::expand::SubSearchSpec> = req
        .searches
        .iter()
        .map(|s| {
            let kind = match s.kind.as_str() {
                "lex" => crate::model_runtime::QueryableKind::Lex,
                "vec" => crate::model_runtime::QueryableKind::Vec,
                "hyde" => crate::model_runtime::QueryableKind::Hyde,
                other => return Err(bad_request(format!("unknown sub-search type '{}'", other))),
            };
            Ok(crate::retrieval::expand::SubSearchSpec { kind, query: s.query.clone() })
        })
        .collect::<Result<_, HttpError>>()?;

    let primary_text = sub_searches.first().map(|s| s.query.clone()).unwrap_or_default();
    let q = crate::retrieval::NormalizedQuery {
        text: primary_text,
        sub_searches: Some(sub_searches),
        ..Default::default()
    };
    let options = crate::retrieval::SearchOptions {
        limit: req.limit,
        min_score: req.min_score,
        collections: req.collections,
        ..Default::default()
    };

    let results = crate::retrieval::search(state.store.as_ref(), state.runtime.as_ref(), &state.config.retrieval, &q, &options)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(QueryResponse {
        results: results
            .into_iter()
            .map(|r| {
                serde_json::json!({
                    "docid": r.document_id, "file": r.file, "title": r.title,
                    "score": r.score, "context": r.context, "snippet": r.snippet,
                })
            })
            .collect(),
    }))
}

/// Start the HTTP transport: binds `bind_addr`, serves `/health`, `/search`,
/// `/query` (REST), and `/mcp` (streamable-HTTP JSON-RPC) until SIGINT/SIGTERM.
pub async fn run(bind_addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let mcp_state = state.clone();
    let mcp_service = StreamableHttpService::new(
        move || {
            let state = mcp_state.clone();
            Box::pin(async move { Ok(QmdMcpServer::new(state).await) })
        },
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_query))
        .route("/query", post(handle_query))
        .nest_service("/mcp", mcp_service)
        .layer(cors)
        .with_state(state.clone());

    tracing::info!(%bind_addr, "qmd MCP HTTP server listening");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.store.close().await;
    state.runtime.dispose().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining qmd MCP HTTP server");
}
