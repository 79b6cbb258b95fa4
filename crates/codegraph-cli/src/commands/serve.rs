//! Serve command - run the MCP tool surface over stdio for an AI assistant client.
//!
//! Diagnostics go through `tracing` to a file/stderr appender; stdout carries
//! only the framed JSON-RPC protocol the `rmcp` stdio transport owns. Set
//! `STDIO_ALLOW_STDOUT_LOGS=1` to relax that for local debugging outside a
//! real MCP client.

use anyhow::{Context, Result};
use clap::Args;
use codegraph_config::Config;
use codegraph_mcp::{serve_stdio, ServerConfig};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use super::{load_config, resolve_workspace};
use crate::GlobalOptions;

/// Arguments for the `serve` command.
#[derive(Args, Debug)]
pub struct ServeArgs {}

pub async fn execute(_args: ServeArgs, global: GlobalOptions) -> Result<()> {
    let workspace = resolve_workspace(&global)?;
    let config = load_config(&global, &workspace)?;

    init_tracing(&config)?;

    let server_config = ServerConfig::new(workspace.clone())
        .with_database_path(config.database_path(&workspace))
        .with_embedding(config.embedding_config())
        .with_governor_limits(config.governor_limits())
        .with_clone_threshold(config.indexing.clone_detection_threshold);

    serve_stdio(server_config).await.context("MCP stdio server exited with an error")
}

/// Routes diagnostics to a log directory (or stderr) only, never stdout,
/// unless the documented escape hatch is set.
fn init_tracing(config: &Config) -> Result<()> {
    let level = match config.logging.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if let Some(ref dir) = config.logging.dir {
        std::fs::create_dir_all(dir).ok();
        let appender = tracing_appender::rolling::daily(dir, "codegraph.log");
        let subscriber = FmtSubscriber::builder().with_max_level(level).with_ansi(false).with_writer(appender).finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else if config.logging.stdout_allow_logs {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = FmtSubscriber::builder().with_max_level(level).with_writer(std::io::stderr).with_ansi(false).finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    Ok(())
}
