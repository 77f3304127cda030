//! Plugin records and registry metadata.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// External links for a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginLinks {
    pub npm: Option<String>,
    pub homepage: Option<String>,
    pub bugs: Option<String>,
}

/// Package metadata as reported by the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub name: String,
    /// Sanitized description
    pub description: String,
    /// `dist-tags.latest`
    pub latest_version: Option<String>,
    /// Published versions, oldest first
    pub versions: Vec<String>,
    pub dist_tags: BTreeMap<String, String>,
    pub keywords: Vec<String>,
    pub author: Option<String>,
    pub links: PluginLinks,
    pub last_updated: Option<String>,
}

/// One discovered or catalog-known plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRecord {
    pub name: String,
    pub description: String,
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
    pub update_available: bool,
    pub is_public_package: bool,
    /// Search path the package was found in
    pub install_path: Option<PathBuf>,
    /// Folder the manifest was read from, which may differ from the name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_dir: Option<PathBuf>,
    pub is_global_install: bool,
    pub has_settings_schema: bool,
    pub author: Option<String>,
    pub links: PluginLinks,
    pub last_updated: Option<String>,
}

impl PluginRecord {
    /// Record for a package found on disk, before registry enrichment.
    pub fn installed(
        name: impl Into<String>,
        version: Option<String>,
        install_path: impl Into<PathBuf>,
        is_global_install: bool,
    ) -> Self {
        Self {
            name: name.into(),
            installed_version: version,
            install_path: Some(install_path.into()),
            is_global_install,
            ..Default::default()
        }
    }

    /// Not-installed record synthesized from registry metadata.
    pub fn from_registry(meta: &PackageMetadata) -> Self {
        let mut record = Self {
            name: meta.name.clone(),
            description: meta.description.clone(),
            ..Default::default()
        };
        record.apply_registry(meta);
        record
    }

    pub fn is_installed(&self) -> bool {
        self.install_path.is_some()
    }

    /// Directory of the package itself.
    pub fn package_dir(&self) -> Option<PathBuf> {
        self.package_dir.clone().or_else(|| {
            self.install_path.as_ref().map(|path| path.join(&self.name))
        })
    }

    /// Fill version and link metadata from the registry.
    pub fn apply_registry(&mut self, meta: &PackageMetadata) {
        self.is_public_package = true;
        self.latest_version = meta.latest_version.clone();
        self.author = meta.author.clone();
        self.links = meta.links.clone();
        self.last_updated = meta.last_updated.clone();
        if self.description.is_empty() {
            self.description = meta.description.clone();
        }
        self.update_available = match (&self.installed_version, &self.latest_version) {
            (Some(installed), Some(latest)) => is_newer(installed, latest),
            _ => false,
        };
    }

    /// Mark the package as unknown to the registry.
    pub fn mark_private(&mut self) {
        self.is_public_package = false;
        self.latest_version = None;
        self.update_available = false;
    }
}

/// Whether `latest` is a strictly newer semantic version than `installed`.
///
/// Unparseable versions never report an update.
pub fn is_newer(installed: &str, latest: &str) -> bool {
    match (parse_version(installed), parse_version(latest)) {
        (Some(installed), Some(latest)) => installed < latest,
        _ => false,
    }
}

fn parse_version(version: &str) -> Option<semver::Version> {
    let version = version.trim();
    semver::Version::parse(version.strip_prefix('v').unwrap_or(version)).ok()
}

/// Order version strings by semantic version, unparseable ones first.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}
