//! Plugin manager errors.

use thiserror::Error;

/// Registry request failures.
///
/// An unpublished package is not an error; lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(String),

    #[error("registry returned HTTP {0}")]
    Status(u16),

    #[error("invalid registry response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RegistryError::Parse(e.to_string())
        } else {
            RegistryError::Http(e.to_string())
        }
    }
}

/// Errors returned by plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("package not found: {0}")]
    NotFound(String),

    #[error("invalid package name: {0}")]
    InvalidName(String),

    #[error("package manager command failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings schema for {name}: {message}")]
    Schema { name: String, message: String },
}

impl From<hearth_core::Error> for PluginError {
    fn from(e: hearth_core::Error) -> Self {
        PluginError::InvalidName(e.to_string())
    }
}

/// Result type for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;
