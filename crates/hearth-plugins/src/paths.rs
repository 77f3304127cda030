//! Search path resolution.
//!
//! The resolved list is, in order:
//! 1. The custom plugin path, if configured (the preferred path)
//! 2. `NODE_PATH` entries, if set
//! 3. `node_modules` of the host directory and each of its ancestors
//! 4. Without `NODE_PATH`: platform global directories and the package
//!    manager's global prefix
//!
//! Duplicates are dropped keeping the first occurrence, then directories
//! that do not exist are filtered out.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hearth_core::PluginManagerConfig;
use hearth_core::config::{env_vars, split_path_list};
use serde::Serialize;
use tracing::{debug, warn};

use crate::package_manager::{PackageManager, global_modules_dir};

const NODE_MODULES: &str = "node_modules";

/// Ordered, de-duplicated, existing directories that may hold plugins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchPaths {
    paths: Vec<PathBuf>,
    preferred: Option<PathBuf>,
}

impl SearchPaths {
    /// Build from already-resolved directories. The preferred path, if any,
    /// is moved to the front.
    pub fn new(paths: Vec<PathBuf>, preferred: Option<PathBuf>) -> Self {
        let mut ordered = Vec::with_capacity(paths.len() + 1);
        ordered.extend(preferred.clone());
        ordered.extend(paths);
        Self {
            paths: dedupe(ordered),
            preferred,
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn preferred(&self) -> Option<&Path> {
        self.preferred.as_deref()
    }

    /// Installs outside the preferred path count as global.
    pub fn is_global(&self, path: &Path) -> bool {
        self.preferred.as_deref() != Some(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Computes the search paths.
#[derive(Debug, Clone)]
pub struct PathResolver {
    custom: Option<PathBuf>,
    host_dir: PathBuf,
    node_path: Option<String>,
    package_manager: PackageManager,
    prefix_timeout: Duration,
}

impl PathResolver {
    pub fn new(custom: Option<PathBuf>, host_dir: impl Into<PathBuf>, package_manager: PackageManager) -> Self {
        Self {
            custom,
            host_dir: host_dir.into(),
            node_path: None,
            package_manager,
            prefix_timeout: Duration::from_secs(10),
        }
    }

    /// Resolver for a config, reading `NODE_PATH` from the environment.
    pub fn from_config(config: &PluginManagerConfig, package_manager: PackageManager) -> Self {
        Self::new(
            config.custom_plugin_path.clone(),
            config.host_dir_or_cwd(),
            package_manager,
        )
        .with_node_path(std::env::var(env_vars::NODE_PATH).ok())
    }

    pub fn with_node_path(mut self, node_path: Option<String>) -> Self {
        self.node_path = node_path.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_prefix_timeout(mut self, timeout: Duration) -> Self {
        self.prefix_timeout = timeout;
        self
    }

    pub fn custom(&self) -> Option<&Path> {
        self.custom.as_deref()
    }

    /// Resolve the search paths. Never fails; a failed prefix query only
    /// loses that one directory.
    pub async fn resolve(&self) -> SearchPaths {
        let mut candidates = Vec::new();
        candidates.extend(self.custom.clone());

        match &self.node_path {
            Some(node_path) => {
                candidates.extend(split_path_list(node_path));
                candidates.extend(module_paths(&self.host_dir));
            }
            None => {
                candidates.extend(module_paths(&self.host_dir));
                candidates.extend(platform_global_dirs());
                match self.package_manager.global_prefix(self.prefix_timeout).await {
                    Ok(prefix) => candidates.push(global_modules_dir(&prefix)),
                    Err(e) => warn!(
                        category = "plugins",
                        executable = %self.package_manager.executable().display(),
                        error = %e,
                        "Could not query global install prefix, using default paths"
                    ),
                }
            }
        }

        let mut existing = Vec::new();
        for path in dedupe(candidates) {
            if tokio::fs::metadata(&path)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false)
            {
                existing.push(path);
            }
        }
        debug!(category = "plugins", paths = ?existing, "Resolved search paths");

        SearchPaths {
            paths: existing,
            preferred: self.custom.clone(),
        }
    }
}

/// `node_modules` directories for `start` and each ancestor, nearest first.
pub fn module_paths(start: &Path) -> Vec<PathBuf> {
    start
        .ancestors()
        .filter(|dir| dir.file_name().map(|name| name != NODE_MODULES).unwrap_or(true))
        .map(|dir| dir.join(NODE_MODULES))
        .collect()
}

/// Well-known global module directories for this platform.
pub fn platform_global_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if cfg!(windows) {
        if let Some(app_data) = std::env::var_os("APPDATA") {
            dirs.push(PathBuf::from(app_data).join("npm").join(NODE_MODULES));
        }
    } else {
        dirs.push(PathBuf::from("/usr/local/lib/node_modules"));
        dirs.push(PathBuf::from("/usr/lib/node_modules"));
        if cfg!(target_os = "macos") {
            dirs.push(PathBuf::from("/opt/homebrew/lib/node_modules"));
        }
    }

    dirs
}

fn dedupe(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| seen.insert(path.clone()))
        .collect()
}
