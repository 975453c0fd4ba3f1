//! codelens tool server binary.
//!
//! Exposes code intelligence tools to AI coding agents via the Model
//! Context Protocol over stdio.

use anyhow::Result;
use clap::Parser;

/// codelens tool server
#[derive(Parser, Debug)]
#[command(name = "codelens-mcp", version, about)]
struct Args {
    /// Path to the repository to index.
    #[arg(long, default_value = ".")]
    repo: String,

    /// Log level.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt().with_env_filter(&args.log_level).init();

    let repo_path = std::path::Path::new(&args.repo);
    if !repo_path.exists() {
        anyhow::bail!("repository path does not exist: {}", args.repo);
    }

    tracing::info!(repo = %args.repo, "codelens tool server starting");
    codelens_mcp::serve_stdio(repo_path).await?;
    Ok(())
}
