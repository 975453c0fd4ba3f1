//! codelens CLI.
//!
//! Thin command-line front-end over `codelens-core`'s engine and
//! `codelens-mcp`'s tool server. Per the engine's scope, this binary owns
//! only process wiring (argument parsing, exit codes, file writes for
//! `init`/`setup-mcp`) -- no indexing or retrieval logic lives here.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use codelens_core::{bundle, ignore, Engine, OmniError};

/// Exit code for a generic error.
const EXIT_GENERIC_ERROR: i32 = 1;
/// Exit code for an unknown bundle name passed to `bundle <name>`.
const EXIT_UNKNOWN_BUNDLE: i32 = 2;
/// Exit code for an unreadable project root.
const EXIT_UNREADABLE_ROOT: i32 = 3;

/// codelens -- local code intelligence engine for AI coding agents.
#[derive(Parser, Debug)]
#[command(name = "codelens", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the state directory, default configuration, ignore manifest,
    /// and tool-discovery manifest for a project.
    Init {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,
    },
    /// Start the indexing pipeline and watch for changes.
    Watch {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,
    },
    /// Start the tool server on stdio and block.
    Mcp {
        /// Path to the repository root.
        #[arg(long, default_value = ".")]
        repo: String,
    },
    /// Force-regenerate one bundle and print its materialized artifact.
    Bundle {
        /// Bundle name (`master`, a manual bundle, or `smart:<name>`).
        name: String,
        /// Path to the repository root.
        #[arg(long, default_value = ".")]
        repo: String,
    },
    /// Print file count, bundle count, and a per-bundle summary.
    Status {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,
    },
    /// Write the tool-discovery manifest to the local desktop MCP client
    /// configuration location.
    SetupMcp {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,
    },
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_env_filter(&cli.log_level).init();

    let code = match run(cli.command) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(OmniError::NotFound { .. }) = err.downcast_ref::<OmniError>() {
        return EXIT_UNKNOWN_BUNDLE;
    }
    EXIT_GENERIC_ERROR
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Init { path } => cmd_init(&path),
        Commands::Watch { path } => cmd_watch(&path),
        Commands::Mcp { repo } => cmd_mcp(&repo),
        Commands::Bundle { name, repo } => cmd_bundle(&repo, &name),
        Commands::Status { path } => cmd_status(&path),
        Commands::SetupMcp { path } => cmd_setup_mcp(&path),
    }
}

fn checked_repo_path(path: &str) -> Result<PathBuf> {
    let repo_path = Path::new(path)
        .canonicalize()
        .map_err(|e| anyhow::anyhow!(project_root_error(path, &e)))?;
    if !repo_path.is_dir() {
        anyhow::bail!(project_root_error(path, &std::io::Error::other("not a directory")));
    }
    Ok(repo_path)
}

fn project_root_error(path: &str, source: &dyn std::fmt::Display) -> String {
    format!("project root `{path}` is unreadable: {source}")
}

fn cmd_init(path: &str) -> Result<()> {
    let repo_path = resolve_or_exit(path)?;

    let config = codelens_core::Config::defaults(&repo_path);
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let config_json = serde_json::json!({ "bundles": {} });
    std::fs::write(data_dir.join("config.json"), serde_json::to_string_pretty(&config_json)?)?;

    let hidden_files_json = serde_json::json!({
        "global": [],
        "per_bundle": {},
        "user_patterns": [],
        "disabled_system_patterns": [],
    });
    std::fs::write(data_dir.join("hidden-files.json"), serde_json::to_string_pretty(&hidden_files_json)?)?;

    let ignore_manifest_path = repo_path.join(".codelensignore");
    if !ignore_manifest_path.exists() {
        let mut file = std::fs::File::create(&ignore_manifest_path)?;
        writeln!(file, "# codelens ignore manifest -- one glob pattern per line, '#' for comments")?;
        for pattern in ignore::builtin_patterns() {
            writeln!(file, "{pattern}")?;
        }
    }

    write_tool_discovery_manifest(&repo_path)?;

    println!("Initialized codelens project at {}", repo_path.display());
    println!("State directory: {}", data_dir.display());
    Ok(())
}

fn write_tool_discovery_manifest(repo_path: &Path) -> Result<()> {
    let manifest = tool_discovery_manifest(repo_path);
    std::fs::write(repo_path.join(".codelens-mcp.json"), serde_json::to_string_pretty(&manifest)?)?;
    Ok(())
}

fn tool_discovery_manifest(repo_path: &Path) -> serde_json::Value {
    serde_json::json!({
        "command": "codelens",
        "args": ["mcp", "--repo", "."],
        "cwd": repo_path.display().to_string(),
    })
}

fn cmd_watch(path: &str) -> Result<()> {
    let repo_path = resolve_or_exit(path)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let engine = Arc::new(Engine::new(&repo_path)?);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        tracing::info!(repo = %repo_path.display(), "watch started; the HTTP collaborator is out of scope for this engine");

        let run_handle = tokio::spawn(Arc::clone(&engine).run(shutdown_rx));
        tokio::signal::ctrl_c().await?;
        let _ = shutdown_tx.send(true);
        run_handle.await??;
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_mcp(repo: &str) -> Result<()> {
    let repo_path = resolve_or_exit(repo)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(codelens_mcp::serve_stdio(&repo_path))
}

fn cmd_bundle(repo: &str, name: &str) -> Result<()> {
    let repo_path = resolve_or_exit(repo)?;
    let engine = Engine::new(&repo_path)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        if engine.chunk_count()? == 0 {
            engine.initial_scan().await?;
        }
        Ok::<_, anyhow::Error>(())
    })?;
    let artifact = engine.regenerate_bundle(name)?;
    println!("{artifact}");
    Ok(())
}

fn cmd_status(path: &str) -> Result<()> {
    let repo_path = resolve_or_exit(path)?;
    let engine = Engine::new(&repo_path)?;
    let file_count = engine.file_count()?;
    let chunk_count = engine.chunk_count()?;
    let bundles = {
        let all_files = engine.enumerate_files()?;
        let index = engine.index().lock();
        bundle::list_bundles(&index, &all_files)?
    };

    println!("Repository: {}", repo_path.display());
    println!("Files indexed: {file_count}");
    println!("Chunks indexed: {chunk_count}");
    println!("Bundles: {}", bundles.len());
    for b in &bundles {
        println!("  - {} ({} files)", b.name, b.files.len());
    }
    Ok(())
}

fn cmd_setup_mcp(path: &str) -> Result<()> {
    let repo_path = resolve_or_exit(path)?;
    let client_config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("could not determine desktop config directory for this platform"))?
        .join("Claude");
    std::fs::create_dir_all(&client_config_dir)?;

    let client_config_path = client_config_dir.join("claude_desktop_config.json");
    let mut root: serde_json::Value = if client_config_path.exists() {
        serde_json::from_str(&std::fs::read_to_string(&client_config_path)?).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };

    root["mcpServers"]["codelens"] = tool_discovery_manifest(&repo_path);
    std::fs::write(&client_config_path, serde_json::to_string_pretty(&root)?)?;

    println!("Registered codelens tool server at {}", client_config_path.display());
    Ok(())
}

fn resolve_or_exit(path: &str) -> Result<PathBuf> {
    match checked_repo_path(path) {
        Ok(p) => Ok(p),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_UNREADABLE_ROOT);
        }
    }
}
