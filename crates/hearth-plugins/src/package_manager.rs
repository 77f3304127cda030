//! Package manager executable and argument vectors.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use hearth_core::PluginManagerConfig;
use hearth_core::names::package_spec;

/// Flag that keeps the package manager from prompting about its own updates.
pub const NO_UPDATE_NOTIFIER: &str = "--no-update-notifier";

/// The external package manager, invoked as a subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManager {
    executable: PathBuf,
}

impl PackageManager {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Configured executable, else the platform default.
    pub fn from_config(config: &PluginManagerConfig) -> Self {
        match &config.package_manager {
            Some(path) => Self::new(path),
            None => Self::detect(),
        }
    }

    /// Platform default: the bundled `npm.cmd` on Windows, `npm` from
    /// `PATH` elsewhere.
    pub fn detect() -> Self {
        #[cfg(windows)]
        {
            let program_files = std::env::var_os("ProgramFiles")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(r"C:\Program Files"));
            Self::new(program_files.join("nodejs").join("npm.cmd"))
        }

        #[cfg(not(windows))]
        {
            Self::new("npm")
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Full argument vector: executable, notifier flag, then `args`.
    pub fn command<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![
            self.executable.to_string_lossy().into_owned(),
            NO_UPDATE_NOTIFIER.to_string(),
        ];
        argv.extend(args.into_iter().map(Into::into));
        argv
    }

    /// `<pm> install --unsafe-perm [--save] <name>@<version>`
    pub fn install_command(&self, name: &str, version: &str, save: bool) -> Vec<String> {
        let mut args = vec!["install".to_string(), "--unsafe-perm".to_string()];
        if save {
            args.push("--save".to_string());
        }
        args.push(package_spec(name, version));
        self.command(args)
    }

    /// `<pm> uninstall [--save] <name>`
    pub fn uninstall_command(&self, name: &str, save: bool) -> Vec<String> {
        let mut args = vec!["uninstall".to_string()];
        if save {
            args.push("--save".to_string());
        }
        args.push(name.to_string());
        self.command(args)
    }

    /// Ask the package manager for its global install prefix.
    pub async fn global_prefix(&self, timeout: Duration) -> io::Result<PathBuf> {
        let mut cmd = tokio::process::Command::new(&self.executable);
        cmd.args(["-g", "prefix"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "prefix query timed out"))??;

        if !output.status.success() {
            return Err(io::Error::other(format!(
                "prefix query exited with {}",
                output.status
            )));
        }

        let prefix = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if prefix.is_empty() {
            return Err(io::Error::other("prefix query printed nothing"));
        }
        Ok(PathBuf::from(prefix))
    }
}

impl Default for PackageManager {
    fn default() -> Self {
        Self::detect()
    }
}

/// Where globally installed modules live under a prefix.
pub fn global_modules_dir(prefix: &Path) -> PathBuf {
    if cfg!(windows) {
        prefix.join("node_modules")
    } else {
        prefix.join("lib").join("node_modules")
    }
}

/// Whether `dir` belongs to a manifest-tracked project, so installs there
/// should be recorded with `--save`.
pub async fn is_tracked_project(dir: &Path) -> bool {
    tokio::fs::try_exists(dir.join("package.json"))
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_command() {
        let pm = PackageManager::new("/usr/bin/npm");
        assert_eq!(
            pm.install_command("homebridge-hue", "0.13.1", true),
            vec![
                "/usr/bin/npm",
                "--no-update-notifier",
                "install",
                "--unsafe-perm",
                "--save",
                "homebridge-hue@0.13.1",
            ]
        );
        assert!(!pm
            .install_command("homebridge-hue", "latest", false)
            .contains(&"--save".to_string()));
    }

    #[test]
    fn test_uninstall_command() {
        let pm = PackageManager::new("npm");
        assert_eq!(
            pm.uninstall_command("@acme/homebridge-lock", false),
            vec!["npm", "--no-update-notifier", "uninstall", "@acme/homebridge-lock"]
        );
    }

    #[test]
    fn test_from_config_prefers_explicit() {
        let config = PluginManagerConfig {
            package_manager: Some(PathBuf::from("/opt/node/bin/npm")),
            ..Default::default()
        };
        assert_eq!(
            PackageManager::from_config(&config).executable(),
            Path::new("/opt/node/bin/npm")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_global_modules_dir() {
        assert_eq!(
            global_modules_dir(Path::new("/usr/local")),
            PathBuf::from("/usr/local/lib/node_modules")
        );
    }

    #[tokio::test]
    async fn test_prefix_query_failure_is_an_error() {
        let pm = PackageManager::new("/no/such/npm");
        assert!(pm.global_prefix(Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_is_tracked_project() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_tracked_project(dir.path()).await);
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert!(is_tracked_project(dir.path()).await);
    }
}
