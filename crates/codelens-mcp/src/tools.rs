//! MCP tool definitions for codelens.
//!
//! Each tool is annotated with `#[tool]` and exposes a code intelligence
//! capability to AI coding agents via the Model Context Protocol. Tool
//! output is a JSON-stringified body wrapped in a single text content
//! block, per the tool-server contract.
//!
//! ## Thread Safety
//!
//! `Engine` serializes store access internally behind a `parking_lot::Mutex`,
//! so tool handlers share one `Arc<Engine>` rather than each owning a copy.

use std::sync::Arc;

use codelens_core::bundle;
use codelens_core::error::OmniError;
use codelens_core::search::SearchEngine;
use codelens_core::Engine;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*, tool,
    tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use serde::Deserialize;
use serde_json::json;

const DEFAULT_QUERY_LIMIT: usize = 10;
const DEFAULT_SEARCH_THRESHOLD: f64 = 0.0;
const INVESTIGATE_SEARCH_LIMIT: usize = 25;

/// Parameters for `agent/query`.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AgentQueryParams {
    /// Natural-language or symbol-name search query.
    pub query: String,
    /// Maximum number of results to return (default: 10).
    pub limit: Option<usize>,
}

/// Parameters for `agent/investigate`.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AgentInvestigateParams {
    /// Description of the feature or change being investigated.
    pub description: String,
}

/// Parameters for `read_file`.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ReadFileParams {
    /// File path relative to the project root.
    pub path: String,
}

/// codelens tool server.
///
/// Exposes code intelligence tools to AI coding agents over the Model
/// Context Protocol.
#[derive(Clone)]
pub struct CodelensServer {
    engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CodelensServer {
    /// Create a new MCP server backed by the given engine.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "agent/discover",
        description = "Return an architectural overview of the indexed project: bundle counts, per-bundle file counts, notable purposes, and the total chunk count."
    )]
    pub async fn agent_discover(&self) -> Result<CallToolResult, McpError> {
        let all_files = self.engine.enumerate_files().map_err(omni_err)?;
        let index = self.engine.index().lock();
        let bundles = bundle::list_bundles(&index, &all_files).map_err(omni_err)?;
        let chunk_count = index.chunk_count().map_err(omni_err)?;
        let file_count = index.file_count().map_err(omni_err)?;
        let purposes = index.distinct_purposes().map_err(omni_err)?;
        drop(index);

        let body = json!({
            "file_count": file_count,
            "chunk_count": chunk_count,
            "bundle_count": bundles.len(),
            "bundles": bundles.iter().map(|b| json!({
                "name": b.name,
                "file_count": b.files.len(),
            })).collect::<Vec<_>>(),
            "notable_purposes": purposes,
        });
        Ok(json_result(&body))
    }

    #[tool(
        name = "agent/query",
        description = "Run a semantic search over the indexed codebase and return the top matching chunks with file, line, name, similarity, and purpose."
    )]
    pub async fn agent_query(
        &self,
        params: Parameters<AgentQueryParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.0.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        let results = {
            let index = self.engine.index().lock();
            SearchEngine::search(&params.0.query, limit, DEFAULT_SEARCH_THRESHOLD, &index, self.engine.embedder())
                .map_err(omni_err)?
        };

        let body = json!({
            "query": params.0.query,
            "results": results.iter().map(|r| json!({
                "file": r.chunk.file,
                "line": r.chunk.start_line,
                "name": r.chunk.name,
                "similarity": r.similarity,
                "purpose": r.chunk.purpose,
            })).collect::<Vec<_>>(),
        });
        Ok(json_result(&body))
    }

    #[tool(
        name = "agent/investigate",
        description = "Classify a feature description into candidate integration points: searches semantically, groups results by file and by purpose, and highlights purposes with no matches."
    )]
    pub async fn agent_investigate(
        &self,
        params: Parameters<AgentInvestigateParams>,
    ) -> Result<CallToolResult, McpError> {
        let (results, all_purposes) = {
            let index = self.engine.index().lock();
            let results = SearchEngine::search(
                &params.0.description,
                INVESTIGATE_SEARCH_LIMIT,
                DEFAULT_SEARCH_THRESHOLD,
                &index,
                self.engine.embedder(),
            )
            .map_err(omni_err)?;
            let all_purposes = index.distinct_purposes().map_err(omni_err)?;
            (results, all_purposes)
        };

        let mut by_file: std::collections::BTreeMap<String, Vec<String>> = std::collections::BTreeMap::new();
        let mut by_purpose: std::collections::BTreeMap<String, Vec<String>> = std::collections::BTreeMap::new();
        let mut matched_purposes = std::collections::BTreeSet::new();

        for result in &results {
            by_file.entry(result.chunk.file.clone()).or_default().push(result.chunk.name.clone());
            by_purpose.entry(result.chunk.purpose.clone()).or_default().push(result.chunk.name.clone());
            matched_purposes.insert(result.chunk.purpose.clone());
        }

        let gaps: Vec<&String> = all_purposes.iter().filter(|p| !matched_purposes.contains(*p)).collect();

        let body = json!({
            "description": params.0.description,
            "by_file": by_file,
            "by_purpose": by_purpose,
            "gaps": gaps,
        });
        Ok(json_result(&body))
    }

    #[tool(
        name = "list_bundles",
        description = "Return the union of manual and non-empty smart bundles, with file counts and dirty/size metadata for manual bundles."
    )]
    pub async fn list_bundles(&self) -> Result<CallToolResult, McpError> {
        let all_files = self.engine.enumerate_files().map_err(omni_err)?;
        let index = self.engine.index().lock();
        let bundles = bundle::list_bundles(&index, &all_files).map_err(omni_err)?;
        let entries: Vec<_> = bundles
            .iter()
            .map(|b| {
                let manual = index.manual_bundle(&b.name).ok().flatten();
                match manual {
                    Some(codelens_core::types::Bundle::Manual { dirty, size_bytes, last_generated_ms, .. }) => json!({
                        "name": b.name,
                        "file_count": b.files.len(),
                        "kind": "manual",
                        "dirty": dirty,
                        "size_bytes": size_bytes,
                        "last_generated_ms": last_generated_ms,
                    }),
                    _ => json!({
                        "name": b.name,
                        "file_count": b.files.len(),
                        "kind": "smart",
                    }),
                }
            })
            .collect();
        drop(index);

        Ok(json_result(&json!({ "bundles": entries })))
    }

    #[tool(
        name = "read_file",
        description = "Return the text content of a file relative to the project root. Refuses paths that resolve outside the project root."
    )]
    pub async fn read_file(&self, params: Parameters<ReadFileParams>) -> Result<CallToolResult, McpError> {
        let repo_root = self
            .engine
            .config()
            .repo_path
            .canonicalize()
            .map_err(|e| McpError::internal_error(format!("project root unreadable: {e}"), None))?;

        let candidate = repo_root.join(&params.0.path);
        let resolved = candidate
            .canonicalize()
            .map_err(|e| McpError::internal_error(format!("cannot resolve {}: {e}", params.0.path), None))?;

        if !resolved.starts_with(&repo_root) {
            return Err(McpError::invalid_params(
                format!("path `{}` resolves outside the project root", params.0.path),
                None,
            ));
        }

        let content = std::fs::read_to_string(&resolved)
            .map_err(|e| McpError::internal_error(format!("failed to read {}: {e}", params.0.path), None))?;

        Ok(json_result(&json!({ "path": params.0.path, "content": content })))
    }
}

#[tool_handler]
impl ServerHandler for CodelensServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "codelens provides deep code intelligence for AI coding agents over a local, \
                 per-repository semantic index. Use agent/discover for an architectural overview, \
                 agent/query for semantic search, agent/investigate to find integration points for \
                 a feature description, list_bundles to enumerate grouped file sets, and read_file \
                 to fetch a file's contents."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}

fn json_result(body: &serde_json::Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(body.to_string())])
}

fn omni_err(e: OmniError) -> McpError {
    McpError::internal_error(e.to_string(), None)
}
