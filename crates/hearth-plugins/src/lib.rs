//! Plugin discovery and package management.
//!
//! This crate provides:
//! - Search path resolution (custom path, `NODE_PATH`, global locations)
//! - Scanning installed packages for plugins
//! - An npm registry client
//! - A copy-on-write plugin catalog
//! - The `PluginManager` facade for install, uninstall and update

pub mod catalog;
pub mod error;
pub mod manager;
pub mod package_manager;
pub mod paths;
pub mod record;
pub mod registry;
pub mod scanner;

pub use catalog::{CatalogSnapshot, PluginCatalog};
pub use error::{PluginError, RegistryError, Result};
pub use manager::{PluginManager, PluginVersions};
pub use package_manager::PackageManager;
pub use paths::{PathResolver, SearchPaths};
pub use record::{PackageMetadata, PluginLinks, PluginRecord};
pub use registry::{PackageRegistry, RegistryClient};
pub use scanner::PackageScanner;
