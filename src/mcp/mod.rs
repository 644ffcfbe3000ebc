//! MCP JSON-RPC surface (§4.4): `query`/`get`/`multi_get`/`status` tools plus
//! the `qmd://{+path}` resource template, wired the way the teacher's
//! `McpBridge` wires its tool registry onto `rmcp::ServerHandler` — minus the
//! Lua/agent-prompt machinery, since QMD has no scripting surface.

pub mod http;
pub mod stdio;

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::model_runtime::ModelRuntime;
use crate::retrieval::expand::{NormalizedQuery, SubSearchSpec};
use crate::retrieval::{self, SearchOptions};
use crate::store::{FindManyOptions, Store};

/// Shared state behind every MCP session — a clone of this struct is cheap
/// (everything is an `Arc`), matching the teacher's `McpBridge`/axum `AppState`
/// shape.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub runtime: Arc<dyn ModelRuntime>,
    pub config: Arc<Config>,
    pub started_at: Instant,
    pub index_name: String,
    search_count: AtomicU64,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, runtime: Arc<dyn ModelRuntime>, config: Arc<Config>, index_name: String) -> Self {
        Self {
            store,
            runtime,
            config,
            started_at: Instant::now(),
            index_name,
            search_count: AtomicU64::new(0),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn record_search(&self) {
        self.search_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct QmdMcpServer {
    state: Arc<AppState>,
    instructions: Arc<str>,
}

impl QmdMcpServer {
    /// Build the server, rendering the `initialize` instructions text from
    /// current Store status (§4.4 "Instruction text... generated at connect
    /// time"). Rendered once here rather than per-connection, since
    /// `ServerHandler::get_info` is synchronous.
    pub async fn new(state: Arc<AppState>) -> Self {
        let instructions = render_instructions(&state).await;
        Self {
            state,
            instructions: Arc::from(instructions),
        }
    }
}

async fn render_instructions(state: &AppState) -> String {
    match state.store.status().await {
        Ok(status) => format!(
            "qmd — hybrid search over {} Markdown documents across {} collection(s) \
             ({} awaiting embedding). Use `query` to search, `get`/`multi_get` to retrieve \
             a document or pattern of documents by path, and `status` for index health.",
            status.total_documents,
            status.collections.len(),
            status.needs_embedding
        ),
        Err(_) => "qmd — hybrid search over Markdown documents. Use `query` to search, \
                    `get`/`multi_get` to retrieve documents by path, and `status` for index health."
            .to_string(),
    }
}

// ── Tool input/output shapes (§4.4) ─────────────────────────────────────────

#[derive(Deserialize)]
struct SubSearchInput {
    #[serde(rename = "type")]
    kind: String,
    query: String,
}

#[derive(Deserialize)]
struct QueryInput {
    searches: Vec<SubSearchInput>,
    limit: Option<usize>,
    #[serde(rename = "minScore")]
    min_score: Option<f64>,
    collections: Option<Vec<i64>>,
}

#[derive(Serialize)]
struct QueryResultItem {
    docid: i64,
    file: String,
    title: String,
    score: f64,
    context: Option<String>,
    snippet: String,
}

#[derive(Serialize)]
struct QueryOutput {
    results: Vec<QueryResultItem>,
}

#[derive(Deserialize)]
struct GetInput {
    file: String,
    #[serde(rename = "fromLine")]
    from_line: Option<usize>,
    #[serde(rename = "maxLines")]
    max_lines: Option<usize>,
    #[serde(rename = "lineNumbers")]
    line_numbers: Option<bool>,
}

#[derive(Deserialize)]
struct MultiGetInput {
    pattern: String,
    #[serde(rename = "maxLines")]
    max_lines: Option<usize>,
    #[serde(rename = "maxBytes")]
    max_bytes: Option<usize>,
    #[serde(rename = "lineNumbers")]
    line_numbers: Option<bool>,
}

const DEFAULT_MULTI_GET_MAX_BYTES: usize = 10_240;

fn parse_sub_search_kind(kind: &str) -> Option<crate::model_runtime::QueryableKind> {
    match kind {
        "lex" => Some(crate::model_runtime::QueryableKind::Lex),
        "vec" => Some(crate::model_runtime::QueryableKind::Vec),
        "hyde" => Some(crate::model_runtime::QueryableKind::Hyde),
        _ => None,
    }
}

async fn handle_query(state: &AppState, input: QueryInput) -> anyhow::Result<QueryOutput> {
    if input.searches.is_empty() || input.searches.len() > 10 {
        anyhow::bail!("searches must contain between 1 and 10 entries");
    }

    let sub_searches = input
        .searches
        .iter()
        .map(|s| {
            parse_sub_search_kind(&s.kind)
                .map(|kind| SubSearchSpec { kind, query: s.query.clone() })
                .ok_or_else(|| anyhow::anyhow!("unknown sub-search type '{}'", s.kind))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let primary_text = sub_searches.first().map(|s| s.query.clone()).unwrap_or_default();
    let q = NormalizedQuery {
        text: primary_text,
        sub_searches: Some(sub_searches),
        ..Default::default()
    };

    let options = SearchOptions {
        limit: input.limit,
        min_score: input.min_score,
        collections: input.collections,
        ..Default::default()
    };

    let results = retrieval::search(state.store.as_ref(), state.runtime.as_ref(), &state.config.retrieval, &q, &options).await?;
    state.record_search();
    state
        .store
        .log_search("query", &q.text, results.len(), &state.index_name)
        .await
        .ok();

    Ok(QueryOutput {
        results: results
            .into_iter()
            .map(|r| QueryResultItem {
                docid: r.document_id,
                file: r.file,
                title: r.title,
                score: r.score,
                context: r.context,
                snippet: r.snippet,
            })
            .collect(),
    })
}

struct ResolvedDocument {
    uri: String,
    name: String,
    title: String,
    text: String,
}

async fn resolve_get(state: &AppState, input: &GetInput) -> anyhow::Result<ResolvedDocument> {
    let doc = crate::get::get_document(
        state.store.as_ref(),
        &input.file,
        input.from_line,
        input.max_lines,
        input.line_numbers.unwrap_or(false),
    )
    .await?;

    Ok(ResolvedDocument {
        uri: format!("qmd://{}", urlencoding_preserve_slashes(&doc.display_path)),
        name: doc.display_path,
        title: doc.title,
        text: doc.text,
    })
}

/// Percent-encode everything except `/`, preserving the resource-template's
/// path structure (§4.4 "percent-encoding preserves slashes").
fn urlencoding_preserve_slashes(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            segment
                .bytes()
                .map(|b| {
                    if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
                        (b as char).to_string()
                    } else {
                        format!("%{:02X}", b)
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("/")
}

async fn handle_multi_get(state: &AppState, input: MultiGetInput) -> anyhow::Result<Vec<ResolvedDocument>> {
    let max_bytes = input.max_bytes.unwrap_or(DEFAULT_MULTI_GET_MAX_BYTES);
    let result = state
        .store
        .find_documents(&input.pattern, FindManyOptions { include_body: true, max_bytes: Some(max_bytes) })
        .await?;

    let mut docs = Vec::with_capacity(result.matches.len() + result.skipped.len());
    for doc in result.matches {
        let body = match (input.max_lines, None::<usize>) {
            (Some(n), _) => state.store.get_body(&doc.content_hash, Some(1), Some(n)).await?.unwrap_or(doc.body.clone()),
            (None, _) => doc.body.clone(),
        };
        let text = if input.line_numbers.unwrap_or(false) {
            crate::retrieval::snippet::add_line_numbers(&body, 1)
        } else {
            body
        };
        let display = doc.display_path.clone().unwrap_or_else(|| doc.filepath.clone());
        docs.push(ResolvedDocument {
            uri: format!("qmd://{}", urlencoding_preserve_slashes(&display)),
            name: display,
            title: doc.title,
            text,
        });
    }
    for skipped in result.skipped {
        docs.push(ResolvedDocument {
            uri: format!("qmd://{}", urlencoding_preserve_slashes(&skipped.filepath)),
            name: skipped.filepath,
            title: "skipped".to_string(),
            text: format!("(skipped: {})", skipped.reason),
        });
    }
    Ok(docs)
}

#[derive(Serialize)]
struct StatusOutput {
    total_documents: i64,
    needs_embedding: i64,
    has_vector_index: bool,
    collections: Vec<StatusCollection>,
}

#[derive(Serialize)]
struct StatusCollection {
    name: String,
    root_path: String,
    documents: i64,
}

async fn handle_status(state: &AppState) -> anyhow::Result<StatusOutput> {
    let status = state.store.status().await?;
    Ok(StatusOutput {
        total_documents: status.total_documents,
        needs_embedding: status.needs_embedding,
        has_vector_index: status.has_vector_index,
        collections: status
            .collections
            .into_iter()
            .map(|c| StatusCollection { name: c.name, root_path: c.root_path, documents: c.documents })
            .collect(),
    })
}

fn tool(name: &str, description: &str, schema: serde_json::Value) -> Tool {
    let input_schema = match schema {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    };
    Tool {
        name: Cow::Owned(name.to_string()),
        title: None,
        description: Some(Cow::Owned(description.to_string())),
        input_schema,
        output_schema: None,
        annotations: Some(ToolAnnotations::new().read_only(true)),
        execution: None,
        icons: None,
        meta: None,
    }
}

fn mcp_error(message: impl Into<String>) -> McpError {
    McpError::new(ErrorCode::INTERNAL_ERROR, message.into(), None)
}

impl ServerHandler for QmdMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().enable_resources().build(),
            server_info: Implementation {
                name: "qmd".to_string(),
                title: Some("qmd".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(self.instructions.to_string()),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools = vec![
            tool(
                "query",
                "Hybrid lexical+semantic search over the indexed Markdown documents.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "searches": {"type": "array", "minItems": 1, "maxItems": 10,
                            "items": {"type": "object", "properties": {"type": {"enum": ["lex", "vec", "hyde"]}, "query": {"type": "string"}}, "required": ["type", "query"]}},
                        "limit": {"type": "integer"},
                        "minScore": {"type": "number"},
                        "collections": {"type": "array", "items": {"type": "integer"}}
                    },
                    "required": ["searches"]
                }),
            ),
            tool(
                "get",
                "Retrieve a single document by path, optionally starting at a line.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "file": {"type": "string"},
                        "fromLine": {"type": "integer"},
                        "maxLines": {"type": "integer"},
                        "lineNumbers": {"type": "boolean"}
                    },
                    "required": ["file"]
                }),
            ),
            tool(
                "multi_get",
                "Retrieve every document matching a glob pattern.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "pattern": {"type": "string"},
                        "maxLines": {"type": "integer"},
                        "maxBytes": {"type": "integer"},
                        "lineNumbers": {"type": "boolean"}
                    },
                    "required": ["pattern"]
                }),
            ),
            tool("status", "Report index health and per-collection document counts.", serde_json::json!({"type": "object", "properties": {}})),
        ];
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let params = request.arguments.map(serde_json::Value::Object).unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        let outcome: anyhow::Result<String> = async {
            match request.name.as_ref() {
                "query" => {
                    let input: QueryInput = serde_json::from_value(params)?;
                    let out = handle_query(&self.state, input).await?;
                    Ok(serde_json::to_string_pretty(&out)?)
                }
                "get" => {
                    let input: GetInput = serde_json::from_value(params)?;
                    let doc = resolve_get(&self.state, &input).await?;
                    Ok(serde_json::to_string_pretty(&serde_json::json!({
                        "uri": doc.uri, "name": doc.name, "title": doc.title,
                        "mimeType": "text/markdown", "text": doc.text,
                    }))?)
                }
                "multi_get" => {
                    let input: MultiGetInput = serde_json::from_value(params)?;
                    let docs = handle_multi_get(&self.state, input).await?;
                    let rendered: Vec<_> = docs
                        .iter()
                        .map(|d| serde_json::json!({"uri": d.uri, "name": d.name, "title": d.title, "mimeType": "text/markdown", "text": d.text}))
                        .collect();
                    Ok(serde_json::to_string_pretty(&rendered)?)
                }
                "status" => {
                    let out = handle_status(&self.state).await?;
                    Ok(serde_json::to_string_pretty(&out)?)
                }
                other => anyhow::bail!("no tool registered with name: {}", other),
            }
        }
        .await;

        match outcome {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }

    fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourceTemplatesResult, McpError>> + Send + '_ {
        let template = ResourceTemplate {
            uri_template: "qmd://{+path}".to_string(),
            name: "document".to_string(),
            title: None,
            description: Some("A Markdown document indexed by qmd, addressed by its display path.".to_string()),
            mime_type: Some("text/markdown".to_string()),
            icons: None,
            meta: None,
        };
        std::future::ready(Ok(ListResourceTemplatesResult {
            resource_templates: vec![template],
            next_cursor: None,
        }))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let path = request
            .uri
            .strip_prefix("qmd://")
            .ok_or_else(|| mcp_error(format!("unsupported resource scheme: {}", request.uri)))?;
        let decoded = percent_decode(path);

        let input = GetInput {
            file: decoded,
            from_line: None,
            max_lines: None,
            line_numbers: Some(false),
        };
        let doc = resolve_get(&self.state, &input).await.map_err(|e| mcp_error(e.to_string()))?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(doc.text, request.uri.clone())],
        })
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_preserving_slashes() {
        let encoded = urlencoding_preserve_slashes("notes/my doc.md");
        assert_eq!(encoded, "notes/my%20doc.md");
    }

    #[test]
    fn percent_decode_roundtrips() {
        let encoded = urlencoding_preserve_slashes("notes/my doc.md");
        assert_eq!(percent_decode(&encoded), "notes/my doc.md");
    }
}
