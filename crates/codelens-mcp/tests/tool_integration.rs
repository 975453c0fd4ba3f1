//! Integration tests for the MCP tool handlers.
//!
//! Builds a real `Engine` over a tempdir, runs an initial scan, and
//! exercises each tool through `CodelensServer`'s public async methods.
//!
//! Uses multi_thread flavor because `Engine` performs blocking I/O
//! (SQLite, file reads) that must not run on a single-threaded executor.
//!
//! `OMNI_SKIP_MODEL_DOWNLOAD` keeps the embedder in keyword-only mode so
//! tests never attempt to fetch the embedding model; `agent/query` and
//! `agent/investigate` degrade to empty result sets in that mode, which
//! the relevant tests assert rather than work around.
//!
//! Assertions inspect the tool's `Debug` rendering rather than its
//! `Content` internals, since the JSON-stringified body is the only part
//! of a `CallToolResult` this crate's own code ever constructs (see
//! `json_result` in `src/tools.rs`) -- the surrounding envelope shape is
//! rmcp's to define, not ours to pattern-match on.

use std::sync::{Arc, Once};

use codelens_core::Engine;
use codelens_mcp::CodelensServer;
use rmcp::handler::server::wrapper::Parameters;
use tempfile::TempDir;

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| {
        std::env::set_var("OMNI_SKIP_MODEL_DOWNLOAD", "1");
    });
}

async fn create_indexed_server() -> (CodelensServer, TempDir) {
    init();
    let dir = TempDir::new().expect("create temp dir");
    let dir_path = dir.path().to_path_buf();

    std::fs::write(
        dir_path.join("auth.py"),
        r#""""Authentication module."""

class AuthService:
    def __init__(self, db):
        self.db = db

    def validate_token(self, token: str) -> bool:
        """Validate a JWT token."""
        return bool(token) and self.db.check_token(token)
"#,
    )
    .unwrap();

    std::fs::write(
        dir_path.join("config.rs"),
        r#"//! Configuration loading.
pub struct Config {
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self { port: 8080 }
    }
}
"#,
    )
    .unwrap();

    let dir_for_engine = dir_path.clone();
    let engine = tokio::task::spawn_blocking(move || Engine::new(&dir_for_engine).expect("create engine"))
        .await
        .expect("spawn_blocking join");
    let engine = Arc::new(engine);
    engine.initial_scan().await.expect("initial scan");

    (CodelensServer::new(engine), dir)
}

/// Render a tool result the way its JSON-stringified body would read,
/// for substring assertions, without assuming rmcp's envelope field names.
fn rendered(result: &rmcp::model::CallToolResult) -> String {
    format!("{result:?}")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_agent_discover_reports_file_and_chunk_counts() {
    let (server, _dir) = create_indexed_server().await;
    let result = server.agent_discover().await.expect("agent/discover");
    let rendered = rendered(&result);

    assert!(rendered.contains("file_count"));
    assert!(rendered.contains("chunk_count"));
    assert!(!rendered.contains("\\\"file_count\\\":0"), "a freshly scanned repo should index at least one file");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_agent_query_degrades_to_empty_without_embedder() {
    let (server, _dir) = create_indexed_server().await;
    let params = Parameters(codelens_mcp::tools::AgentQueryParams {
        query: "authentication".to_string(),
        limit: Some(5),
    });
    let result = server.agent_query(params).await.expect("agent/query");
    let rendered = rendered(&result);

    assert!(rendered.contains("authentication"));
    assert!(rendered.contains("\\\"results\\\":[]"), "without an embedder, search should yield no results");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_agent_investigate_reports_gaps_without_embedder() {
    let (server, _dir) = create_indexed_server().await;
    let params = Parameters(codelens_mcp::tools::AgentInvestigateParams {
        description: "add a new login flow".to_string(),
    });
    let result = server.agent_investigate(params).await.expect("agent/investigate");
    let rendered = rendered(&result);

    assert!(rendered.contains("\\\"by_file\\\":{}"), "without an embedder, nothing should be grouped by file");
    assert!(rendered.contains("gaps"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_list_bundles_is_empty_for_a_fresh_repo() {
    let (server, _dir) = create_indexed_server().await;
    let result = server.list_bundles().await.expect("list_bundles");
    let rendered = rendered(&result);

    assert!(rendered.contains("\\\"bundles\\\":[]"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_file_returns_contents() {
    let (server, _dir) = create_indexed_server().await;
    let params = Parameters(codelens_mcp::tools::ReadFileParams { path: "config.rs".to_string() });
    let result = server.read_file(params).await.expect("read_file");
    let rendered = rendered(&result);

    assert!(rendered.contains("pub struct Config"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_file_refuses_path_traversal() {
    let (server, _dir) = create_indexed_server().await;
    let params = Parameters(codelens_mcp::tools::ReadFileParams { path: "../../etc/passwd".to_string() });
    let err = server.read_file(params).await.expect_err("traversal must be refused");
    let message = format!("{err:?}");
    assert!(message.contains("outside the project root") || message.contains("cannot resolve"));
}
