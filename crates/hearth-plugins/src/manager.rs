//! Plugin manager facade.
//!
//! Composes path resolution, scanning, the registry and the execution
//! engine into the operations callers use. Every mutation:
//! 1. Validates the package name and locates its target directory, failing
//!    before anything is spawned
//! 2. Runs the package manager, streaming output to the caller's channel
//! 3. Invalidates the catalog, whatever the outcome
//! 4. On success, rebuilds the catalog and returns the fresh record

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hearth_commands::{CommandRunner, EngineConfig, ExecutionEngine, OutputChannel};
use hearth_core::PluginManagerConfig;
use hearth_core::names::{is_plugin_name, validate_package_name};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::PluginCatalog;
use crate::error::{PluginError, Result};
use crate::package_manager::{PackageManager, is_tracked_project};
use crate::paths::{PathResolver, SearchPaths};
use crate::record::PluginRecord;
use crate::registry::{PackageRegistry, RegistryClient};
use crate::scanner::{PackageScanner, SETTINGS_SCHEMA};

/// Version used when an install does not name one.
pub const LATEST: &str = "latest";

/// Published versions of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginVersions {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    /// Oldest first
    pub versions: Vec<String>,
}

/// Public plugin operations.
pub struct PluginManager {
    config: PluginManagerConfig,
    catalog: Arc<PluginCatalog>,
    runner: Arc<dyn CommandRunner>,
    package_manager: PackageManager,
}

impl PluginManager {
    /// Build a manager with the real registry client and execution engine.
    pub fn from_config(config: PluginManagerConfig) -> Result<Self> {
        let package_manager = PackageManager::from_config(&config);
        let resolver = PathResolver::from_config(&config, package_manager.clone());
        let registry: Arc<dyn PackageRegistry> = Arc::new(RegistryClient::from_config(&config)?);
        let engine = ExecutionEngine::new(
            EngineConfig::default().with_timeout(config.command_timeout()),
        );

        Ok(Self::new(config, resolver, registry, Arc::new(engine)))
    }

    pub fn new(
        config: PluginManagerConfig,
        resolver: PathResolver,
        registry: Arc<dyn PackageRegistry>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let catalog = PluginCatalog::new(resolver, PackageScanner::from_config(&config), registry)
            .with_lookup_concurrency(config.lookup_concurrency);
        Self {
            package_manager: PackageManager::from_config(&config),
            config,
            catalog: Arc::new(catalog),
            runner,
        }
    }

    pub fn config(&self) -> &PluginManagerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<PluginCatalog> {
        &self.catalog
    }

    pub fn package_manager(&self) -> &PackageManager {
        &self.package_manager
    }

    /// Output channel sized from the configuration.
    pub fn channel(&self) -> (OutputChannel, hearth_commands::OutputReceiver) {
        OutputChannel::bounded(self.config.channel_capacity)
    }

    // ========== Queries ==========

    /// Installed plugins.
    pub async fn list(&self, force: bool) -> Vec<PluginRecord> {
        self.catalog.get_catalog(force).await
    }

    /// Installed plugins with a newer published version.
    pub async fn outdated(&self) -> Vec<PluginRecord> {
        self.list(false)
            .await
            .into_iter()
            .filter(|record| record.update_available)
            .collect()
    }

    /// Resolved search paths.
    pub async fn search_paths(&self) -> SearchPaths {
        self.catalog.resolver().resolve().await
    }

    /// Registry search merged with the installed catalog; installed
    /// records win.
    pub async fn search(&self, query: &str) -> Result<Vec<PluginRecord>> {
        let results = self.catalog.registry().search(query).await?;
        let snapshot = self.catalog.snapshot(false).await;

        Ok(results
            .iter()
            .map(|meta| match snapshot.get(&meta.name) {
                Some(installed) => installed.clone(),
                None => PluginRecord::from_registry(meta),
            })
            .collect())
    }

    /// Registry record for one plugin, merged with its installed state.
    pub async fn lookup_plugin(&self, name: &str) -> Result<PluginRecord> {
        self.validate_plugin_name(name)?;

        let meta = self
            .catalog
            .registry()
            .lookup(name)
            .await?
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        Ok(match self.catalog.find(name).await {
            Some(mut installed) => {
                installed.apply_registry(&meta);
                installed
            }
            None => PluginRecord::from_registry(&meta),
        })
    }

    /// Published versions and dist-tags of a package.
    pub async fn plugin_versions(&self, name: &str) -> Result<PluginVersions> {
        validate_package_name(name)?;

        let meta = self
            .catalog
            .registry()
            .lookup(name)
            .await?
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        Ok(PluginVersions {
            name: meta.name,
            tags: meta.dist_tags,
            versions: meta.versions,
        })
    }

    /// Parsed settings schema of an installed plugin.
    pub async fn config_schema(&self, name: &str) -> Result<Value> {
        let record = self.installed(name).await?;
        let path = record
            .package_dir()
            .map(|dir| dir.join(SETTINGS_SCHEMA))
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PluginError::NotFound(format!("{} settings schema", name)));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|e| PluginError::Schema {
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Record for the hosting runtime, with registry metadata when
    /// available.
    pub async fn runtime_package(&self) -> Result<PluginRecord> {
        let name = self.config.runtime_package.as_str();
        let paths = self.catalog.resolver().resolve().await;
        let record = self
            .catalog
            .scanner()
            .find_package(&paths, name)
            .await
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        Ok(self.catalog.enrich(record).await)
    }

    // ========== Mutations ==========

    /// Install a plugin next to the plugin manager (or into the custom
    /// plugin path).
    pub async fn install(
        &self,
        name: &str,
        version: Option<&str>,
        channel: OutputChannel,
    ) -> Result<Option<PluginRecord>> {
        validate_package_name(name)?;
        let version = version.unwrap_or(LATEST);
        let install_dir = self.install_dir().await?;
        let cwd = project_dir(&install_dir);
        let save = is_tracked_project(&cwd).await;

        let argv = self.package_manager.install_command(name, version, save);
        info!(category = "plugins", package = name, version, cwd = %cwd.display(), "Installing plugin");
        self.run(argv, cwd, channel).await?;

        let record = self.refreshed(name).await;
        if record.is_none() {
            // the install itself succeeded
            warn!(category = "plugins", package = name, "Installed package missing from refreshed catalog");
        }
        Ok(record)
    }

    /// Remove an installed plugin.
    pub async fn uninstall(&self, name: &str, channel: OutputChannel) -> Result<()> {
        validate_package_name(name)?;
        let install_path = self.install_path_of(name).await?;
        let cwd = project_dir(&install_path);
        let save = is_tracked_project(&cwd).await;

        let argv = self.package_manager.uninstall_command(name, save);
        info!(category = "plugins", package = name, cwd = %cwd.display(), "Uninstalling plugin");
        self.run(argv, cwd, channel).await?;

        self.refreshed(name).await;
        Ok(())
    }

    /// Move an installed plugin to another version.
    pub async fn update(
        &self,
        name: &str,
        version: Option<&str>,
        channel: OutputChannel,
    ) -> Result<Option<PluginRecord>> {
        validate_package_name(name)?;
        let version = version.unwrap_or(LATEST);
        let install_path = self.install_path_of(name).await?;
        let cwd = project_dir(&install_path);
        let save = is_tracked_project(&cwd).await;

        let argv = self.package_manager.install_command(name, version, save);
        info!(category = "plugins", package = name, version, cwd = %cwd.display(), "Updating plugin");
        self.run(argv, cwd, channel).await?;

        Ok(self.refreshed(name).await)
    }

    /// Update the hosting runtime package where it is installed.
    pub async fn update_runtime(
        &self,
        version: Option<&str>,
        channel: OutputChannel,
    ) -> Result<PluginRecord> {
        let name = self.config.runtime_package.clone();
        validate_package_name(&name)?;
        let version = version.unwrap_or(LATEST);

        let paths = self.catalog.resolver().resolve().await;
        let install_path = self
            .catalog
            .scanner()
            .find_package(&paths, &name)
            .await
            .and_then(|record| record.install_path)
            .ok_or_else(|| PluginError::NotFound(name.clone()))?;
        let cwd = project_dir(&install_path);
        let save = is_tracked_project(&cwd).await;

        let argv = self.package_manager.install_command(&name, version, save);
        info!(category = "plugins", package = %name, version, cwd = %cwd.display(), "Updating runtime");
        self.run(argv, cwd, channel).await?;

        self.refreshed(&name).await;
        let paths = self.catalog.resolver().resolve().await;
        match self.catalog.scanner().find_package(&paths, &name).await {
            Some(record) => Ok(self.catalog.enrich(record).await),
            None => {
                warn!(category = "plugins", package = %name, "Runtime not found after update");
                Err(PluginError::NotFound(name))
            }
        }
    }

    // ========== Internals ==========

    /// Directory new plugins are installed into.
    async fn install_dir(&self) -> Result<PathBuf> {
        if let Some(custom) = &self.config.custom_plugin_path {
            return Ok(custom.clone());
        }
        if let Some(dir) = &self.config.install_dir {
            return Ok(dir.clone());
        }

        // install beside the plugin manager's own package
        let host = self.config.host_package.as_str();
        self.catalog
            .find(host)
            .await
            .and_then(|record| record.install_path)
            .ok_or_else(|| {
                warn!(
                    category = "plugins",
                    host_package = host,
                    "No install directory configured and host package not found"
                );
                PluginError::NotFound(host.to_string())
            })
    }

    async fn installed(&self, name: &str) -> Result<PluginRecord> {
        validate_package_name(name)?;
        self.catalog
            .find(name)
            .await
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    async fn install_path_of(&self, name: &str) -> Result<PathBuf> {
        self.installed(name)
            .await?
            .install_path
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    fn validate_plugin_name(&self, name: &str) -> Result<()> {
        validate_package_name(name)?;
        if !is_plugin_name(name, &self.config.plugin_prefix) {
            return Err(PluginError::InvalidName(format!(
                "{} does not start with {}",
                name, self.config.plugin_prefix
            )));
        }
        Ok(())
    }

    async fn run(&self, argv: Vec<String>, cwd: PathBuf, channel: OutputChannel) -> Result<()> {
        let outcome = self.runner.execute(argv, cwd, channel).await;
        self.catalog.invalidate();

        match outcome.error() {
            None => Ok(()),
            Some(message) => Err(PluginError::ExecutionFailed(message.to_string())),
        }
    }

    /// Rebuild after a successful mutation and pick out `name`.
    async fn refreshed(&self, name: &str) -> Option<PluginRecord> {
        let snapshot = self.catalog.snapshot(true).await;
        snapshot.get(name).cloned()
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("catalog", &self.catalog)
            .field("package_manager", &self.package_manager)
            .finish()
    }
}

/// The project directory owning a `node_modules` directory.
fn project_dir(install_path: &Path) -> PathBuf {
    install_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| install_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_dir() {
        assert_eq!(
            project_dir(Path::new("/srv/hb/node_modules")),
            PathBuf::from("/srv/hb")
        );
        assert_eq!(project_dir(Path::new("/")), PathBuf::from("/"));
    }
}
