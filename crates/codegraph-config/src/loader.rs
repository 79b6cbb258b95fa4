//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.codegraph/config.toml`
//! 2. Local config: `.code-graph-rag/config.toml` (in the workspace)
//! 3. CLI overrides
//!
//! Later sources override earlier ones.

use crate::error::ConfigError;
use crate::{Config, ConfigOverrides, GLOBAL_CONFIG_DIR_NAME, STORE_DIR_NAME};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration loader with caching and inheritance support.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.codegraph`).
    global_config_dir: Option<PathBuf>,

    /// Cached global config.
    global_config: Option<Config>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader, detecting the global config
    /// directory (`~/.codegraph`) from the environment.
    pub fn new() -> Self {
        let global_config_dir = dirs::home_dir().map(|h| h.join(GLOBAL_CONFIG_DIR_NAME));

        Self { global_config_dir, global_config: None }
    }

    /// Creates a loader with a custom global config directory. Useful for
    /// testing.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self { global_config_dir: Some(global_dir.into()), global_config: None }
    }

    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir.as_ref().map(|d| d.join(CONFIG_FILE_NAME))
    }

    pub fn local_config_path(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(STORE_DIR_NAME).join(CONFIG_FILE_NAME)
    }

    /// Loads configuration for a workspace with optional CLI overrides.
    /// Merges config in order: global → local → overrides.
    pub fn load(
        &mut self,
        workspace_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(global_config) = self.load_global()? {
            config = merge_configs(config, global_config);
        }

        if let Some(local_config) = self.load_local(workspace_root)? {
            config = merge_configs(config, local_config);
        }

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads only the global configuration.
    pub fn load_global(&mut self) -> Result<Option<Config>, ConfigError> {
        if let Some(ref config) = self.global_config {
            return Ok(Some(config.clone()));
        }

        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory found, skipping global config");
            return Ok(None);
        };

        if !global_path.exists() {
            trace!("Global config not found at {:?}", global_path);
            return Ok(None);
        }

        debug!("Loading global config from {:?}", global_path);
        let config = load_config_file(&global_path)?;
        self.global_config = Some(config.clone());

        Ok(Some(config))
    }

    /// Loads only the local configuration for a workspace.
    pub fn load_local(&self, workspace_root: &Path) -> Result<Option<Config>, ConfigError> {
        let local_path = self.local_config_path(workspace_root);

        if !local_path.exists() {
            trace!("Local config not found at {:?}", local_path);
            return Ok(None);
        }

        debug!("Loading local config from {:?}", local_path);
        load_config_file(&local_path).map(Some)
    }

    pub fn save_global(&self, config: &Config) -> Result<(), ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };

        save_config_file(&global_dir.join(CONFIG_FILE_NAME), config)
    }

    pub fn save_local(&self, workspace_root: &Path, config: &Config) -> Result<(), ConfigError> {
        save_config_file(&self.local_config_path(workspace_root), config)
    }

    /// Initializes `~/.codegraph/config.toml` with default configuration if
    /// it does not already exist.
    pub fn init_global(&self) -> Result<PathBuf, ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };

        if !global_dir.exists() {
            std::fs::create_dir_all(global_dir).map_err(|e| ConfigError::create_dir(global_dir, e))?;
        }

        let config_path = global_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            save_config_file(&config_path, &Config::default())?;
        }

        Ok(config_path)
    }

    /// Initializes `<workspace>/.code-graph-rag/config.toml` with default
    /// configuration if it does not already exist.
    pub fn init_local(&self, workspace_root: &Path) -> Result<PathBuf, ConfigError> {
        let local_dir = workspace_root.join(STORE_DIR_NAME);

        if !local_dir.exists() {
            std::fs::create_dir_all(&local_dir).map_err(|e| ConfigError::create_dir(&local_dir, e))?;
        }

        let config_path = local_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            save_config_file(&config_path, &Config::default())?;
        }

        Ok(config_path)
    }

    /// Clears the cached global configuration, forcing a reload on the next
    /// `load_global()` call.
    pub fn clear_cache(&mut self) {
        self.global_config = None;
    }
}

fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    toml::from_str(&content).map_err(|e| ConfigError::parse_toml(path, e))
}

fn save_config_file(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
}

/// Merges two configurations field-by-field, with `overlay` taking
/// precedence whenever it differs from the built-in default.
fn merge_configs(base: Config, overlay: Config) -> Config {
    Config {
        storage: crate::StorageConfig { database_path: overlay.storage.database_path.or(base.storage.database_path) },
        embedding: merge_embedding(base.embedding, overlay.embedding),
        governor: merge_governor(base.governor, overlay.governor),
        indexing: merge_indexing(base.indexing, overlay.indexing),
        logging: merge_logging(base.logging, overlay.logging),
    }
}

fn merge_embedding(base: crate::EmbeddingSettings, overlay: crate::EmbeddingSettings) -> crate::EmbeddingSettings {
    let default_provider = crate::EmbeddingSettings::default().provider;
    crate::EmbeddingSettings {
        provider: if overlay.provider != default_provider { overlay.provider } else { base.provider },
        base_url: overlay.base_url.or(base.base_url),
        api_key: overlay.api_key.or(base.api_key),
        timeout_ms: overlay.timeout_ms.or(base.timeout_ms),
        concurrency: overlay.concurrency.or(base.concurrency),
        max_batch_size: overlay.max_batch_size.or(base.max_batch_size),
        auto_pull: overlay.auto_pull.or(base.auto_pull),
        check_server: overlay.check_server.or(base.check_server),
        quantized: overlay.quantized.or(base.quantized),
        local_path: overlay.local_path.or(base.local_path),
        dimension: overlay.dimension.or(base.dimension),
    }
}

fn merge_governor(base: crate::GovernorSettings, overlay: crate::GovernorSettings) -> crate::GovernorSettings {
    let default = crate::GovernorSettings::default();
    crate::GovernorSettings {
        max_memory_mb: if overlay.max_memory_mb != default.max_memory_mb { overlay.max_memory_mb } else { base.max_memory_mb },
        max_cpu_percent: if overlay.max_cpu_percent != default.max_cpu_percent {
            overlay.max_cpu_percent
        } else {
            base.max_cpu_percent
        },
        max_concurrent_agents: if overlay.max_concurrent_agents != default.max_concurrent_agents {
            overlay.max_concurrent_agents
        } else {
            base.max_concurrent_agents
        },
        max_task_queue_size: if overlay.max_task_queue_size != default.max_task_queue_size {
            overlay.max_task_queue_size
        } else {
            base.max_task_queue_size
        },
    }
}

fn merge_indexing(base: crate::IndexingConfig, overlay: crate::IndexingConfig) -> crate::IndexingConfig {
    crate::IndexingConfig {
        exclude_patterns: {
            let mut patterns = base.exclude_patterns;
            for pattern in overlay.exclude_patterns {
                if !patterns.contains(&pattern) {
                    patterns.push(pattern);
                }
            }
            patterns
        },
        exclude_hidden: overlay.exclude_hidden,
        clone_detection_threshold: overlay.clone_detection_threshold.or(base.clone_detection_threshold),
    }
}

fn merge_logging(base: crate::LoggingConfig, overlay: crate::LoggingConfig) -> crate::LoggingConfig {
    crate::LoggingConfig {
        level: if overlay.level != "info" { overlay.level } else { base.level },
        dir: overlay.dir.or(base.dir),
        stdout_allow_logs: overlay.stdout_allow_logs || base.stdout_allow_logs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config(content: &str, dir: &Path) -> PathBuf {
        let config_dir = dir.join(STORE_DIR_NAME);
        std::fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_default_config() {
        let temp = TempDir::new().unwrap();
        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.logging.level, "info");
        assert!(config.storage.database_path.is_none());
    }

    #[test]
    fn load_local_config_overrides_default() {
        let temp = TempDir::new().unwrap();
        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        create_test_config(
            r#"
            [storage]
            database_path = "/custom/db.sqlite"
            "#,
            temp.path(),
        );

        let config = loader.load(temp.path(), None).unwrap();
        assert_eq!(config.storage.database_path, Some(PathBuf::from("/custom/db.sqlite")));
    }

    #[test]
    fn global_overrides_default() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");

        std::fs::create_dir_all(&global_dir).unwrap();
        std::fs::write(global_dir.join(CONFIG_FILE_NAME), "[logging]\nlevel = \"debug\"\n").unwrap();

        let mut loader = ConfigLoader::with_global_dir(&global_dir);
        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn local_overrides_global() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");

        std::fs::create_dir_all(&global_dir).unwrap();
        std::fs::write(
            global_dir.join(CONFIG_FILE_NAME),
            "[logging]\nlevel = \"debug\"\n\n[storage]\ndatabase_path = \"/global/db.sqlite\"\n",
        )
        .unwrap();

        create_test_config(
            r#"
            [storage]
            database_path = "/local/db.sqlite"
            "#,
            temp.path(),
        );

        let mut loader = ConfigLoader::with_global_dir(&global_dir);
        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.storage.database_path, Some(PathBuf::from("/local/db.sqlite")));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn cli_overrides_all() {
        let temp = TempDir::new().unwrap();

        create_test_config(
            r#"
            [logging]
            level = "warn"
            "#,
            temp.path(),
        );

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let overrides = ConfigOverrides { log_level: Some("trace".to_string()), ..Default::default() };
        let config = loader.load(temp.path(), Some(&overrides)).unwrap();

        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn save_and_load_config() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let mut config = Config::default();
        config.logging.level = "warn".to_string();
        config.storage.database_path = Some(PathBuf::from("/saved/db.sqlite"));

        loader.save_local(temp.path(), &config).unwrap();

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        let loaded = loader.load(temp.path(), None).unwrap();

        assert_eq!(loaded.logging.level, "warn");
        assert_eq!(loaded.storage.database_path, Some(PathBuf::from("/saved/db.sqlite")));
    }

    #[test]
    fn init_local_creates_config() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let config_path = loader.init_local(temp.path()).unwrap();

        assert!(config_path.exists());
        assert!(config_path.ends_with(".code-graph-rag/config.toml"));

        let content = std::fs::read_to_string(&config_path).unwrap();
        let _: Config = toml::from_str(&content).unwrap();
    }

    #[test]
    fn exclude_patterns_merge_without_duplicates() {
        let base = crate::IndexingConfig { exclude_patterns: vec!["node_modules".to_string()], ..Default::default() };
        let overlay =
            crate::IndexingConfig { exclude_patterns: vec!["node_modules".to_string(), "vendor".to_string()], ..Default::default() };

        let merged = merge_indexing(base, overlay);

        assert!(merged.exclude_patterns.contains(&"node_modules".to_string()));
        assert!(merged.exclude_patterns.contains(&"vendor".to_string()));
        assert_eq!(merged.exclude_patterns.iter().filter(|p| *p == "node_modules").count(), 1);
    }

    #[test]
    fn governor_merge_prefers_overlay_non_default() {
        let base = crate::GovernorSettings::default();
        let overlay = crate::GovernorSettings { max_concurrent_agents: 16, ..crate::GovernorSettings::default() };

        let merged = merge_governor(base, overlay);
        assert_eq!(merged.max_concurrent_agents, 16);
    }

    #[test]
    fn cache_clearing() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");

        std::fs::create_dir_all(&global_dir).unwrap();
        std::fs::write(global_dir.join(CONFIG_FILE_NAME), "[logging]\nlevel = \"debug\"\n").unwrap();

        let mut loader = ConfigLoader::with_global_dir(&global_dir);

        let _ = loader.load_global().unwrap();
        assert!(loader.global_config.is_some());

        loader.clear_cache();
        assert!(loader.global_config.is_none());
    }
}
