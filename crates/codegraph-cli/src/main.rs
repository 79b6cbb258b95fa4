//! codegraph - CLI entry point for the code-intelligence service.
//!
//! Wraps the same agent stack the MCP server drives (`codegraph_mcp::CodeGraphServer`)
//! behind a handful of workspace-centric commands: index a workspace, search it,
//! check its status, or serve it to an MCP client over stdio.
//!
//! # Usage
//!
//! ```bash
//! # Index the current directory
//! codegraph index
//!
//! # Search the indexed workspace
//! codegraph search "retry with backoff"
//!
//! # Show graph/store status
//! codegraph status
//!
//! # Serve the MCP tool surface over stdio
//! codegraph serve
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;
mod progress;

/// codegraph - code-intelligence indexing, search, and MCP serving
#[derive(Parser, Debug)]
#[command(name = "codegraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to every command.
#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Workspace root to operate on (default: current directory)
    #[arg(long, short = 'w', global = true, env = "CODEGRAPH_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to a local config file overriding the workspace's own
    #[arg(long, short = 'c', global = true, env = "CODEGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose (debug-level) logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

impl GlobalOptions {
    /// Resolves the workspace root: the `--workspace` flag, or the current directory.
    fn resolve_workspace(&self) -> Result<PathBuf> {
        let root = match &self.workspace {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };
        Ok(root.canonicalize().unwrap_or(root))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index a workspace: parse changed files and upsert the graph + vector stores
    Index(commands::index::IndexArgs),

    /// Hybrid structural + semantic search over an indexed workspace
    Search(commands::search::SearchArgs),

    /// Show graph/vector store status and health for a workspace
    Status(commands::status::StatusArgs),

    /// Serve the MCP tool surface over stdio for an AI assistant client
    Serve(commands::serve::ServeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.global.quiet {
        Level::ERROR
    } else if cli.global.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // `serve` owns its own tracing setup: stdout is the JSON-RPC transport,
    // so diagnostics must go to stderr/file only, never through a subscriber
    // that might write to stdout.
    if !matches!(cli.command, Commands::Serve(_)) {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    match cli.command {
        Commands::Index(args) => commands::index::execute(args, cli.global).await,
        Commands::Search(args) => commands::search::execute(args, cli.global).await,
        Commands::Status(args) => commands::status::execute(args, cli.global).await,
        Commands::Serve(args) => commands::serve::execute(args, cli.global).await,
    }
}
