//! Installed package discovery.
//!
//! Each search path is listed one level deep (two for `@scope`
//! directories). A directory is a plugin when its `package.json` name
//! carries the plugin prefix and its keywords include the plugin keyword.
//! Entries without a readable manifest are skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use hearth_core::PluginManagerConfig;
use hearth_core::names::is_plugin_name;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::paths::SearchPaths;
use crate::record::PluginRecord;
use crate::registry::sanitize_description;

/// Manifest file name.
pub const MANIFEST: &str = "package.json";

/// Settings schema shipped alongside a plugin.
pub const SETTINGS_SCHEMA: &str = "config.schema.json";

/// The fields of `package.json` discovery cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Usually a list of strings; anything else is treated as empty
    #[serde(default)]
    pub keywords: Value,
}

impl Manifest {
    pub fn has_keyword(&self, keyword: &str) -> bool {
        match &self.keywords {
            Value::Array(items) => items.iter().any(|item| item.as_str() == Some(keyword)),
            _ => false,
        }
    }
}

/// Read and parse `<dir>/package.json`.
pub async fn read_manifest(dir: &Path) -> Option<Manifest> {
    let path = dir.join(MANIFEST);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => {
            debug!(category = "plugins", path = %path.display(), error = %e, "No readable manifest");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            debug!(category = "plugins", path = %path.display(), error = %e, "Skipping unparseable manifest");
            None
        }
    }
}

/// Scans search paths for installed plugins.
#[derive(Debug, Clone)]
pub struct PackageScanner {
    prefix: String,
    keyword: String,
}

impl PackageScanner {
    pub fn new(prefix: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            keyword: keyword.into(),
        }
    }

    pub fn from_config(config: &PluginManagerConfig) -> Self {
        Self::new(config.plugin_prefix.clone(), config.plugin_keyword.clone())
    }

    /// Discover installed plugins, de-duplicated and sorted by name.
    pub async fn scan(&self, paths: &SearchPaths) -> Vec<PluginRecord> {
        let per_path = join_all(paths.iter().map(|path| self.scan_path(path, paths))).await;

        let records = merge_in_order(per_path);
        info!(
            category = "plugins",
            search_paths = paths.len(),
            plugins = records.len(),
            "Scanned installed plugins"
        );
        records
    }

    /// Find a package by exact name, ignoring plugin filters.
    pub async fn find_package(&self, paths: &SearchPaths, name: &str) -> Option<PluginRecord> {
        for path in paths.iter() {
            let dir = path.join(name);
            let Some(manifest) = read_manifest(&dir).await else {
                continue;
            };
            if manifest.name.as_deref().is_some_and(|n| n != name) {
                continue;
            }
            return Some(build_record(name.to_string(), manifest, path, &dir, paths).await);
        }
        None
    }

    async fn scan_path(&self, path: &Path, paths: &SearchPaths) -> Vec<PluginRecord> {
        let candidates = list_package_dirs(path).await;
        let records = join_all(
            candidates
                .into_iter()
                .map(|(folder_name, dir)| self.inspect(folder_name, dir, path, paths)),
        )
        .await;
        records.into_iter().flatten().collect()
    }

    async fn inspect(
        &self,
        folder_name: String,
        dir: PathBuf,
        path: &Path,
        paths: &SearchPaths,
    ) -> Option<PluginRecord> {
        let manifest = read_manifest(&dir).await?;
        let name = manifest.name.clone().unwrap_or(folder_name);

        if !is_plugin_name(&name, &self.prefix) || !manifest.has_keyword(&self.keyword) {
            return None;
        }
        Some(build_record(name, manifest, path, &dir, paths).await)
    }
}

async fn build_record(
    name: String,
    manifest: Manifest,
    path: &Path,
    dir: &Path,
    paths: &SearchPaths,
) -> PluginRecord {
    let mut record = PluginRecord::installed(name, manifest.version, path, paths.is_global(path));
    record.description = manifest
        .description
        .as_deref()
        .map(sanitize_description)
        .unwrap_or_default();
    record.has_settings_schema = tokio::fs::try_exists(dir.join(SETTINGS_SCHEMA))
        .await
        .unwrap_or(false);
    record.package_dir = Some(dir.to_path_buf());
    record
}

/// Package directories directly under `path`, including those one level
/// inside `@scope` directories. Returns `(package name, directory)`.
async fn list_package_dirs(path: &Path) -> Vec<(String, PathBuf)> {
    let mut found = Vec::new();
    for (name, dir) in list_dirs(path).await {
        if name.starts_with('.') {
            continue;
        }
        if name.starts_with('@') {
            for (inner, inner_dir) in list_dirs(&dir).await {
                if !inner.starts_with('.') {
                    found.push((format!("{}/{}", name, inner), inner_dir));
                }
            }
        } else {
            found.push((name, dir));
        }
    }
    found
}

async fn list_dirs(path: &Path) -> Vec<(String, PathBuf)> {
    let mut dirs = Vec::new();
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(category = "plugins", path = %path.display(), error = %e, "Cannot list directory");
            return dirs;
        }
    };

    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                let entry_path = entry.path();
                // follows symlinks, so linked packages count
                let is_dir = tokio::fs::metadata(&entry_path)
                    .await
                    .map(|meta| meta.is_dir())
                    .unwrap_or(false);
                if is_dir {
                    dirs.push((name, entry_path));
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(category = "plugins", path = %path.display(), error = %e, "Directory listing interrupted");
                break;
            }
        }
    }
    dirs
}

/// Merge per-path results in resolution order.
///
/// A repeated name keeps the earlier record, unless the earlier one is a
/// global install and the later one is not.
pub fn merge_in_order(per_path: Vec<Vec<PluginRecord>>) -> Vec<PluginRecord> {
    let mut merged: BTreeMap<String, PluginRecord> = BTreeMap::new();
    for record in per_path.into_iter().flatten() {
        match merged.get(&record.name) {
            Some(kept) if !(kept.is_global_install && !record.is_global_install) => {}
            _ => {
                merged.insert(record.name.clone(), record);
            }
        }
    }
    merged.into_values().collect()
}
