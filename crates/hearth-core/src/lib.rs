//! Core types shared by the Hearth plugin manager crates.
//!
//! This crate holds the pieces every other crate needs:
//! - Plugin manager configuration and its loading rules
//! - Environment variable names and default endpoints
//! - Package name validation
//! - The core error type

pub mod config;
pub mod error;
pub mod names;

pub use config::PluginManagerConfig;
pub use error::{Error, Result};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{PluginManagerConfig, defaults, endpoints, env_vars};
    pub use crate::error::{Error, Result};
    pub use crate::names::{is_plugin_name, package_spec, validate_package_name};
}
