//! stdio transport for the MCP surface (§4.4.1 "the stdio transport runs
//! `rmcp`'s stdio server loop directly"). Used when an AI coding assistant
//! launches `qmd mcp` as a child process rather than connecting over HTTP.

use std::sync::Arc;

use rmcp::transport::stdio;
use rmcp::ServiceExt;

use super::{AppState, QmdMcpServer};

/// Serve one MCP session over stdin/stdout until the peer disconnects.
pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let server = QmdMcpServer::new(state.clone()).await;
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    state.store.close().await;
    state.runtime.dispose().await;
    Ok(())
}
