//! Configuration management for Kiln

pub mod schema;

pub use schema::Config;

use crate::error::{KilnError, KilnResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Largest accepted `limits.max_timeout_secs`: one day
pub const MAX_TIMEOUT_CEILING_SECS: f64 = 86_400.0;

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kiln")
            .join("config.toml")
    }

    /// Get the cache root (outputs and template live below it)
    pub fn cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("kiln")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kiln")
    }

    /// Get the audit log path
    pub fn audit_log_path() -> PathBuf {
        Self::state_dir().join("audit.log")
    }

    /// Output cache directory for a config
    pub fn output_cache_dir(config: &Config) -> PathBuf {
        config
            .cache
            .dir
            .clone()
            .unwrap_or_else(|| Self::cache_dir().join("outputs"))
    }

    /// Template directory for a config
    pub fn template_dir(config: &Config) -> PathBuf {
        config
            .template
            .dir
            .clone()
            .unwrap_or_else(|| Self::cache_dir().join("template"))
    }

    /// Workspace root for a config
    pub fn workspace_root(config: &Config) -> PathBuf {
        config
            .workspace
            .root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("kiln-workspaces"))
    }

    /// Load configuration, creating default if not exists
    pub async fn load(&self) -> KilnResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> KilnResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| KilnError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| KilnError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::check(&config).map_err(|reason| KilnError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        })?;

        Ok(config)
    }

    /// Reject values the service cannot work with
    fn check(config: &Config) -> Result<(), String> {
        let limits = &config.limits;
        let max = limits.max_timeout_secs;
        if !(max > 0.0 && max <= MAX_TIMEOUT_CEILING_SECS) {
            return Err(format!(
                "limits.max_timeout_secs must be in (0, {}]",
                MAX_TIMEOUT_CEILING_SECS
            ));
        }
        if !(limits.default_timeout_secs > 0.0)
            || limits.default_timeout_secs > limits.max_timeout_secs
        {
            return Err(
                "limits.default_timeout_secs must be in (0, limits.max_timeout_secs]".to_string(),
            );
        }
        if config.toolchain.build_command.trim().is_empty()
            || config.toolchain.run_command.trim().is_empty()
        {
            return Err("toolchain.build_command and toolchain.run_command are required".to_string());
        }
        if config.toolchain.sentinel.trim().is_empty() {
            return Err("toolchain.sentinel must not be empty".to_string());
        }
        Ok(())
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> KilnResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            KilnError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> KilnResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
