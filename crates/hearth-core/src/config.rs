//! Plugin manager configuration.
//!
//! Sources, in priority order:
//! 1. Environment variables (override individual fields)
//! 2. An explicit TOML file (`--config` or `HEARTH_CONFIG`)
//! 3. `hearth.toml` in the working directory
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Default endpoint constants.
pub mod endpoints {
    pub const NPM_REGISTRY: &str = "https://registry.npmjs.org";
    pub const NPM_PACKAGE_PAGE: &str = "https://www.npmjs.com/package";
}

/// Default values for configuration fields.
pub mod defaults {
    pub const CONFIG_FILE: &str = "hearth.toml";
    pub const HOST_PACKAGE: &str = "homebridge-config-ui-x";
    pub const RUNTIME_PACKAGE: &str = "homebridge";
    pub const PLUGIN_PREFIX: &str = "homebridge-";
    pub const PLUGIN_KEYWORD: &str = "homebridge-plugin";
    pub const REGISTRY_TIMEOUT_SECS: u64 = 10;
    pub const SEARCH_LIMIT: usize = 30;
    /// Package manager jobs are killed after five minutes.
    pub const COMMAND_TIMEOUT_SECS: u64 = 300;
    pub const CHANNEL_CAPACITY: usize = 1024;
    pub const LOOKUP_CONCURRENCY: usize = 8;
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG: &str = "HEARTH_CONFIG";
    pub const CUSTOM_PLUGIN_PATH: &str = "HEARTH_CUSTOM_PLUGIN_PATH";
    pub const INSTALL_DIR: &str = "HEARTH_INSTALL_DIR";
    pub const HOST_DIR: &str = "HEARTH_HOST_DIR";
    pub const REGISTRY_URL: &str = "HEARTH_REGISTRY_URL";
    pub const PACKAGE_MANAGER: &str = "HEARTH_PACKAGE_MANAGER";
    pub const COMMAND_TIMEOUT_SECS: &str = "HEARTH_COMMAND_TIMEOUT_SECS";
    pub const LOG_JSON: &str = "HEARTH_LOG_JSON";
    /// Path-list override for the module search paths.
    pub const NODE_PATH: &str = "NODE_PATH";
}

/// Configuration for plugin discovery, the registry client and the
/// package manager runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginManagerConfig {
    /// User-configured directory that takes priority over global locations.
    pub custom_plugin_path: Option<PathBuf>,
    /// Preferred directory for new plugins when no custom path is set.
    pub install_dir: Option<PathBuf>,
    /// Directory of the administrative package itself.
    pub host_dir: Option<PathBuf>,
    /// Package name of the administrative package.
    pub host_package: String,
    /// Package name of the hosting runtime.
    pub runtime_package: String,
    /// Naming prefix every plugin must carry.
    pub plugin_prefix: String,
    /// Keyword every plugin manifest must declare.
    pub plugin_keyword: String,
    pub registry_url: String,
    pub registry_timeout_secs: u64,
    pub search_limit: usize,
    /// Explicit package manager executable.
    pub package_manager: Option<PathBuf>,
    pub command_timeout_secs: u64,
    pub channel_capacity: usize,
    pub lookup_concurrency: usize,
}

impl Default for PluginManagerConfig {
    fn default() -> Self {
        Self {
            custom_plugin_path: None,
            install_dir: None,
            host_dir: None,
            host_package: defaults::HOST_PACKAGE.to_string(),
            runtime_package: defaults::RUNTIME_PACKAGE.to_string(),
            plugin_prefix: defaults::PLUGIN_PREFIX.to_string(),
            plugin_keyword: defaults::PLUGIN_KEYWORD.to_string(),
            registry_url: endpoints::NPM_REGISTRY.to_string(),
            registry_timeout_secs: defaults::REGISTRY_TIMEOUT_SECS,
            search_limit: defaults::SEARCH_LIMIT,
            package_manager: None,
            command_timeout_secs: defaults::COMMAND_TIMEOUT_SECS,
            channel_capacity: defaults::CHANNEL_CAPACITY,
            lookup_concurrency: defaults::LOOKUP_CONCURRENCY,
        }
    }
}

impl PluginManagerConfig {
    /// Load configuration from the best available source and apply
    /// environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(env_vars::CONFIG).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                info!(category = "config", path = %path.display(), "Loading config file");
                Self::from_file(&path)?
            }
            None => {
                let local = Path::new(defaults::CONFIG_FILE);
                if local.is_file() {
                    info!(category = "config", path = %local.display(), "Loading config file");
                    Self::from_file(local)?
                } else {
                    info!(category = "config", "No config file found, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse TOML content.
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment overrides using the given lookup function.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = non_empty(env_vars::CUSTOM_PLUGIN_PATH) {
            self.custom_plugin_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty(env_vars::INSTALL_DIR) {
            self.install_dir = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty(env_vars::HOST_DIR) {
            self.host_dir = Some(PathBuf::from(path));
        }
        if let Some(url) = non_empty(env_vars::REGISTRY_URL) {
            self.registry_url = url;
        }
        if let Some(pm) = non_empty(env_vars::PACKAGE_MANAGER) {
            self.package_manager = Some(PathBuf::from(pm));
        }
        if let Some(secs) = non_empty(env_vars::COMMAND_TIMEOUT_SECS).and_then(|s| s.parse().ok()) {
            self.command_timeout_secs = secs;
        }
    }

    /// Registry base URL without a trailing slash.
    pub fn registry_base(&self) -> &str {
        self.registry_url.trim_end_matches('/')
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Directory the module resolution paths start from.
    pub fn host_dir_or_cwd(&self) -> PathBuf {
        self.host_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Entries of a `NODE_PATH`-style path list, empty entries removed.
pub fn split_path_list(value: &str) -> Vec<PathBuf> {
    std::env::split_paths(value)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}
