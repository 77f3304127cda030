//! Core error type.

use std::path::PathBuf;

/// Errors raised while loading configuration or validating input.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid package name '{name}': {reason}")]
    InvalidPackageName { name: String, reason: &'static str },
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
