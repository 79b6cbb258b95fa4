//! Configuration loading for the code-intelligence service.
//!
//! Merges three layers: global (`~/.codegraph/config.toml`) → local
//! (`.code-graph-rag/config.toml`, inside the workspace's own store
//! directory) → CLI overrides. Later layers win field-by-field; a field
//! left at its zero/default value in an overlay does not clobber a value
//! set by an earlier layer.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use std::path::{Path, PathBuf};

use codegraph_agents::GovernorLimits;
use codegraph_vector::{EmbeddingConfig, EmbeddingProviderType};
use serde::{Deserialize, Serialize};

/// Directory name for the per-workspace store, relative to the workspace
/// root. Holds `vectors.db` (graph + vector tables) and the local config
/// override file.
pub const STORE_DIR_NAME: &str = ".code-graph-rag";

/// Directory name for the user-level config, relative to the home
/// directory.
pub const GLOBAL_CONFIG_DIR_NAME: &str = ".codegraph";

fn default_true() -> bool {
    true
}

/// Fully merged configuration for one workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub embedding: EmbeddingSettings,
    pub governor: GovernorSettings,
    pub indexing: IndexingConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            embedding: EmbeddingSettings::default(),
            governor: GovernorSettings::default(),
            indexing: IndexingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Absolute path to the persisted store file for `workspace_root`,
    /// honoring an explicit override (`DATABASE_PATH`/`storage.database_path`)
    /// when set.
    pub fn database_path(&self, workspace_root: &Path) -> PathBuf {
        match &self.storage.database_path {
            Some(path) => path.clone(),
            None => workspace_root.join(STORE_DIR_NAME).join("vectors.db"),
        }
    }

    /// The store directory itself; always excluded from indexing
    /// regardless of `indexing.exclude_patterns`.
    pub fn store_dir(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(STORE_DIR_NAME)
    }

    /// Builds the `codegraph_vector::EmbeddingConfig` this workspace's
    /// Semantic Agent should be constructed with.
    pub fn embedding_config(&self) -> EmbeddingConfig {
        self.embedding.clone().into_embedding_config()
    }

    /// Builds the `codegraph_agents::GovernorLimits` the Resource
    /// Governor should be constructed with.
    pub fn governor_limits(&self) -> GovernorLimits {
        GovernorLimits {
            max_memory_mb: self.governor.max_memory_mb,
            max_cpu_percent: self.governor.max_cpu_percent,
            max_concurrent_agents: self.governor.max_concurrent_agents,
            max_task_queue_size: self.governor.max_task_queue_size,
        }
    }

    /// Every pattern indexing should skip: built-in defaults plus any
    /// user-supplied additions, plus the store directory itself.
    pub fn effective_exclude_patterns(&self) -> Vec<String> {
        let mut patterns = default_exclude_patterns();
        for pattern in &self.indexing.exclude_patterns {
            if !patterns.contains(pattern) {
                patterns.push(pattern.clone());
            }
        }
        patterns.push(STORE_DIR_NAME.to_string());
        patterns
    }

    /// Applies CLI-level overrides on top of the global/local merge.
    /// Every field is optional; unset fields leave the merged value as-is.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(path) = &overrides.database_path {
            self.storage.database_path = Some(path.clone());
        }
        if let Some(key) = &overrides.embedding_api_key {
            self.embedding.api_key = Some(key.clone());
        }
        if let Some(dir) = &overrides.log_dir {
            self.logging.dir = Some(dir.clone());
        }
        if let Some(allow) = overrides.stdout_allow_logs {
            self.logging.stdout_allow_logs = allow;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Reads the environment variables documented for the service
    /// (`DATABASE_PATH`, `EMBEDDING_API_KEY`, `LOG_DIR`,
    /// `STDIO_ALLOW_STDOUT_LOGS`) into a [`ConfigOverrides`].
    pub fn overrides_from_env() -> ConfigOverrides {
        ConfigOverrides {
            database_path: std::env::var("DATABASE_PATH").ok().map(PathBuf::from),
            embedding_api_key: std::env::var("EMBEDDING_API_KEY").ok(),
            log_dir: std::env::var("LOG_DIR").ok().map(PathBuf::from),
            stdout_allow_logs: std::env::var("STDIO_ALLOW_STDOUT_LOGS").ok().map(|v| v == "1"),
            log_level: None,
        }
    }

    /// Rejects configurations that would fail at startup rather than
    /// inside a tool call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.governor.max_concurrent_agents == 0 {
            return Err(ConfigError::invalid_value("governor.max_concurrent_agents", "must be at least 1"));
        }
        if self.governor.max_memory_mb == 0 {
            return Err(ConfigError::invalid_value("governor.max_memory_mb", "must be greater than 0"));
        }
        if let Some(threshold) = self.indexing.clone_detection_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::invalid_value(
                    "indexing.clone_detection_threshold",
                    "must be between 0.0 and 1.0",
                ));
            }
        }
        Ok(())
    }
}

/// Where the persisted store lives.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Overrides the default `<workspace>/.code-graph-rag/vectors.db`
    /// location. Mirrors `DATABASE_PATH`.
    pub database_path: Option<PathBuf>,
}

/// Mirrors `codegraph_vector::EmbeddingConfig` in a TOML-friendly shape;
/// converted via [`EmbeddingSettings::into_embedding_config`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderType,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub max_batch_size: Option<usize>,
    pub auto_pull: Option<bool>,
    pub check_server: Option<bool>,
    pub quantized: Option<bool>,
    pub local_path: Option<String>,
    pub dimension: Option<usize>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        let defaults = EmbeddingConfig::local_runtime();
        Self {
            provider: defaults.provider,
            base_url: defaults.base_url,
            api_key: defaults.api_key,
            timeout_ms: defaults.timeout_ms,
            concurrency: defaults.concurrency,
            max_batch_size: defaults.max_batch_size,
            auto_pull: defaults.auto_pull,
            check_server: defaults.check_server,
            quantized: defaults.quantized,
            local_path: defaults.local_path,
            dimension: defaults.dimension,
        }
    }
}

impl EmbeddingSettings {
    pub fn into_embedding_config(self) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: self.provider,
            base_url: self.base_url,
            api_key: self.api_key,
            timeout_ms: self.timeout_ms,
            concurrency: self.concurrency,
            max_batch_size: self.max_batch_size,
            headers: Default::default(),
            auto_pull: self.auto_pull,
            warmup_text: None,
            check_server: self.check_server,
            pull_timeout_ms: None,
            quantized: self.quantized,
            local_path: self.local_path,
            dimension: self.dimension,
        }
    }
}

/// Mirrors `codegraph_agents::GovernorLimits` in a TOML-friendly shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GovernorSettings {
    pub max_memory_mb: u64,
    pub max_cpu_percent: f32,
    pub max_concurrent_agents: usize,
    pub max_task_queue_size: usize,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        let defaults = GovernorLimits::default();
        Self {
            max_memory_mb: defaults.max_memory_mb,
            max_cpu_percent: defaults.max_cpu_percent,
            max_concurrent_agents: defaults.max_concurrent_agents,
            max_task_queue_size: defaults.max_task_queue_size,
        }
    }
}

/// Controls what the Indexer/Dev Agent walks past and the default clone
/// detection threshold new workspaces start with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexingConfig {
    /// User-supplied additions to the built-in exclusion list.
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub exclude_hidden: bool,
    pub clone_detection_threshold: Option<f32>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self { exclude_patterns: Vec::new(), exclude_hidden: true, clone_detection_threshold: None }
    }
}

/// Diagnostic logging. The server must never write to stdout (the JSON-RPC
/// transport owns it); `stdout_allow_logs` is the documented escape hatch
/// for local debugging outside a real MCP client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: Option<PathBuf>,
    pub stdout_allow_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), dir: None, stdout_allow_logs: false }
    }
}

/// CLI-supplied overrides, applied last. Every field is optional; `None`
/// leaves the merged global/local value untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_path: Option<PathBuf>,
    pub embedding_api_key: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub stdout_allow_logs: Option<bool>,
    pub log_level: Option<String>,
}

/// Exclusion defaults for indexing: dependency directories, VCS
/// metadata, build outputs, language caches, virtualenvs, editor
/// metadata, and temp/log/archive patterns.
pub fn default_exclude_patterns() -> Vec<String> {
    vec![
        "node_modules".to_string(),
        ".git".to_string(),
        ".hg".to_string(),
        ".svn".to_string(),
        "dist".to_string(),
        "build".to_string(),
        "out".to_string(),
        "target".to_string(),
        "__pycache__".to_string(),
        ".pytest_cache".to_string(),
        ".venv".to_string(),
        "venv".to_string(),
        ".idea".to_string(),
        ".vscode".to_string(),
        "*.tmp".to_string(),
        "*.log".to_string(),
        "*.zip".to_string(),
        "*.tar.gz".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_database_path_lives_under_store_dir() {
        let config = Config::default();
        let path = config.database_path(Path::new("/repo"));
        assert_eq!(path, PathBuf::from("/repo/.code-graph-rag/vectors.db"));
    }

    #[test]
    fn database_path_override_wins() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/db.sqlite"));
        assert_eq!(config.database_path(Path::new("/repo")), PathBuf::from("/custom/db.sqlite"));
    }

    #[test]
    fn store_dir_always_excluded() {
        let config = Config::default();
        assert!(config.effective_exclude_patterns().contains(&STORE_DIR_NAME.to_string()));
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let mut config = Config::default();
        let overrides = ConfigOverrides {
            embedding_api_key: Some("secret".to_string()),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        config.apply_overrides(&overrides);
        assert_eq!(config.embedding.api_key.as_deref(), Some("secret"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.governor.max_concurrent_agents = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn embedding_config_round_trips_through_settings() {
        let config = Config::default();
        let embedding = config.embedding_config();
        assert_eq!(embedding.provider, EmbeddingProviderType::LocalRuntime);
    }
}
