//! Shared fixtures: fake search-path trees, registries and runners.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hearth_commands::{CommandRunner, ExecutionOutcome, OutputChannel};
use hearth_core::PluginManagerConfig;
use hearth_plugins::{
    PackageManager, PackageMetadata, PackageRegistry, PathResolver, PluginManager, RegistryError,
};
use parking_lot::Mutex;

pub const KEYWORD: &str = "homebridge-plugin";

/// Write `<root>/<name>/package.json`.
pub fn write_package(root: &Path, name: &str, version: &str, keywords: &[&str]) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    let manifest = serde_json::json!({
        "name": name,
        "version": version,
        "description": format!("{} for tests https://example.com/{}", name, name),
        "keywords": keywords,
    });
    std::fs::write(dir.join("package.json"), manifest.to_string()).unwrap();
    dir
}

/// Write a plugin manifest named `name` into `<root>/<folder>`.
pub fn write_aliased_plugin(root: &Path, folder: &str, name: &str, version: &str) -> PathBuf {
    let dir = root.join(folder);
    std::fs::create_dir_all(&dir).unwrap();
    let manifest = serde_json::json!({
        "name": name,
        "version": version,
        "keywords": [KEYWORD],
    });
    std::fs::write(dir.join("package.json"), manifest.to_string()).unwrap();
    dir
}

/// A package that passes the plugin filters.
pub fn write_plugin(root: &Path, name: &str, version: &str) -> PathBuf {
    write_package(root, name, version, &[KEYWORD])
}

pub fn metadata(name: &str, latest: &str) -> PackageMetadata {
    PackageMetadata {
        name: name.to_string(),
        description: format!("{} from the registry", name),
        latest_version: Some(latest.to_string()),
        versions: vec![latest.to_string()],
        dist_tags: [("latest".to_string(), latest.to_string())].into_iter().collect(),
        author: Some("maintainer".to_string()),
        ..Default::default()
    }
}

/// How the fake registry answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    Answer,
    Unavailable,
}

/// In-memory registry that counts lookups.
pub struct StaticRegistry {
    packages: Mutex<HashMap<String, PackageMetadata>>,
    mode: RegistryMode,
    delay: Duration,
    lookups: AtomicUsize,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self {
            packages: Mutex::new(HashMap::new()),
            mode: RegistryMode::Answer,
            delay: Duration::ZERO,
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            mode: RegistryMode::Unavailable,
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn publish(&self, meta: PackageMetadata) {
        self.packages.lock().insert(meta.name.clone(), meta);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageRegistry for StaticRegistry {
    async fn lookup(&self, name: &str) -> Result<Option<PackageMetadata>, RegistryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.mode {
            RegistryMode::Unavailable => Err(RegistryError::Status(503)),
            RegistryMode::Answer => Ok(self.packages.lock().get(name).cloned()),
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<PackageMetadata>, RegistryError> {
        match self.mode {
            RegistryMode::Unavailable => Err(RegistryError::Http("connection refused".into())),
            RegistryMode::Answer => {
                let mut found: Vec<_> = self
                    .packages
                    .lock()
                    .values()
                    .filter(|meta| meta.name.contains(query))
                    .cloned()
                    .collect();
                found.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(found)
            }
        }
    }
}

type Action = Box<dyn Fn(&[String], &Path) -> ExecutionOutcome + Send + Sync>;

/// Runner that records invocations and simulates the package manager.
pub struct FakeRunner {
    calls: Mutex<Vec<(Vec<String>, PathBuf)>>,
    action: Action,
}

impl FakeRunner {
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(&[String], &Path) -> ExecutionOutcome + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            action: Box::new(action),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(|_, _| ExecutionOutcome::Succeeded)
    }

    pub fn calls(&self) -> Vec<(Vec<String>, PathBuf)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn execute(
        &self,
        argv: Vec<String>,
        cwd: PathBuf,
        channel: OutputChannel,
    ) -> ExecutionOutcome {
        self.calls.lock().push((argv.clone(), cwd.clone()));
        channel.data(format!("CMD: {}\r\n", argv.join(" "))).await;
        let outcome = (self.action)(&argv, &cwd);
        channel.finish(outcome.clone()).await;
        outcome
    }
}

/// Manager over a custom plugin directory and one "global" directory,
/// isolated from the machine's real search paths.
pub fn manager(
    config: PluginManagerConfig,
    global: &Path,
    registry: Arc<StaticRegistry>,
    runner: Arc<FakeRunner>,
) -> PluginManager {
    let host_dir = config
        .host_dir
        .clone()
        .unwrap_or_else(|| global.to_path_buf());
    let resolver = PathResolver::new(
        config.custom_plugin_path.clone(),
        host_dir,
        PackageManager::new("/no/such/npm"),
    )
    .with_node_path(Some(global.display().to_string()));

    PluginManager::new(config, resolver, registry, runner)
}

/// Config with a fixed package manager name.
pub fn config(custom: Option<&Path>) -> PluginManagerConfig {
    PluginManagerConfig {
        custom_plugin_path: custom.map(Path::to_path_buf),
        package_manager: Some(PathBuf::from("npm")),
        ..Default::default()
    }
}
