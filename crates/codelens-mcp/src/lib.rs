//! Tool server library for codelens.
//!
//! Exposes [`serve_stdio`], the entry point the `mcp` CLI command and the
//! `codelens-mcp` binary both call into to start the JSON-RPC tool server
//! on standard input/output.

pub mod tools;

use std::path::Path;
use std::sync::Arc;

use codelens_core::Engine;
use rmcp::transport::io::stdio;
use rmcp::ServiceExt;
use tokio::sync::watch;

pub use tools::CodelensServer;

/// Build an engine for `repo_path`, start its background pipeline, and
/// serve tool calls over stdio until the client disconnects.
pub async fn serve_stdio(repo_path: &Path) -> anyhow::Result<()> {
    let engine = Arc::new(Engine::new(repo_path)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline_engine = Arc::clone(&engine);
    let pipeline_handle = tokio::spawn(async move {
        if let Err(e) = pipeline_engine.run(shutdown_rx).await {
            tracing::error!(error = %e, "pipeline orchestrator exited with error");
        }
    });

    let server = CodelensServer::new(Arc::clone(&engine));
    let running = server.serve(stdio()).await?;
    running.waiting().await?;

    let _ = shutdown_tx.send(true);
    pipeline_handle.abort();
    Ok(())
}
