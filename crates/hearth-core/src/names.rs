//! Package name rules.
//!
//! Plugin names carry the naming prefix either directly (`homebridge-foo`)
//! or right after an npm scope (`@scope/homebridge-foo`).

use crate::error::{Error, Result};

/// Check that a name is a plausible npm package name.
///
/// Names reach the package manager's argument vector, so anything that
/// could be parsed as a flag or a path is rejected.
pub fn validate_package_name(name: &str) -> Result<()> {
    let invalid = |reason| {
        Err(Error::InvalidPackageName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.len() > 214 {
        return invalid("name is longer than 214 characters");
    }
    if name.starts_with('-') || name.starts_with('.') {
        return invalid("name cannot start with '-' or '.'");
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return invalid("name cannot contain whitespace");
    }
    if name.contains('\\') || name.split('/').any(|part| part == ".." || part == ".") {
        return invalid("name cannot contain path segments");
    }

    match name.strip_prefix('@') {
        Some(scoped) => {
            let mut parts = scoped.split('/');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(scope), Some(pkg), None) if !scope.is_empty() && !pkg.is_empty() => Ok(()),
                _ => invalid("scoped names must look like @scope/name"),
            }
        }
        None if name.contains('/') => invalid("only scoped names may contain '/'"),
        None => Ok(()),
    }
}

/// Whether `name` carries the plugin naming prefix, scoped or not.
pub fn is_plugin_name(name: &str, prefix: &str) -> bool {
    if name.starts_with(prefix) {
        return true;
    }
    match name.strip_prefix('@').and_then(|s| s.split_once('/')) {
        Some((scope, pkg)) => !scope.is_empty() && pkg.starts_with(prefix),
        None => false,
    }
}

/// `<name>@<version>` install spec.
pub fn package_spec(name: &str, version: &str) -> String {
    format!("{}@{}", name, version)
}
