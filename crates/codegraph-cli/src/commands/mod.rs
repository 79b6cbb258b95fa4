//! CLI command implementations.
//!
//! Every command resolves a workspace, loads configuration, builds a
//! `codegraph_mcp::CodeGraphServer` (the same agent stack a stdio MCP
//! session drives), and calls one or more tools on it directly via
//! `CodeGraphServer::call` — bypassing JSON-RPC framing entirely.

pub mod index;
pub mod search;
pub mod serve;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use codegraph_config::{Config, ConfigLoader};
use codegraph_mcp::{CodeGraphServer, ServerConfig};

use crate::GlobalOptions;

/// Resolves the workspace root from `--workspace` or the current directory.
pub fn resolve_workspace(global: &GlobalOptions) -> Result<PathBuf> {
    global.resolve_workspace()
}

/// Loads merged configuration (global -> local -> env) for a workspace,
/// honoring an explicit `--config` file override.
pub fn load_config(global: &GlobalOptions, workspace: &Path) -> Result<Config> {
    let mut loader = ConfigLoader::new();

    let mut config = if let Some(ref config_path) = global.config {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {}", config_path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse config file: {}", config_path.display()))?
    } else {
        loader.load(workspace, None).context("failed to load configuration")?
    };

    let env_overrides = Config::overrides_from_env();
    config.apply_overrides(&env_overrides);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Builds the `CodeGraphServer` (the full agent/store stack) for one
/// workspace, ready for direct in-process tool calls.
pub async fn build_server(global: &GlobalOptions) -> Result<CodeGraphServer> {
    let workspace = resolve_workspace(global)?;
    let config = load_config(global, &workspace)?;

    let server_config = ServerConfig::new(workspace.clone())
        .with_database_path(config.database_path(&workspace))
        .with_embedding(config.embedding_config())
        .with_governor_limits(config.governor_limits())
        .with_clone_threshold(config.indexing.clone_detection_threshold);

    CodeGraphServer::new(server_config).await.context("failed to initialize the code graph server")
}

/// Prints an informational message to stderr, respecting `--quiet`.
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{message}");
    }
}
