//! Plugin catalog cache.
//!
//! The catalog is an immutable snapshot behind an `Arc`. A rebuild scans
//! the search paths, enriches every installed record from the registry,
//! and then swaps in a new snapshot; readers holding the old `Arc` keep a
//! consistent view. At most one rebuild runs at a time, and callers that
//! arrive while one is in flight share its result.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::paths::{PathResolver, SearchPaths};
use crate::record::PluginRecord;
use crate::registry::PackageRegistry;
use crate::scanner::PackageScanner;

/// One published state of the catalog.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    /// Installed plugins by name
    pub records: BTreeMap<String, PluginRecord>,
    pub search_paths: SearchPaths,
    /// Number of rebuilds that produced this snapshot; zero before the first
    pub generation: u64,
    pub built_at: Option<DateTime<Utc>>,
}

impl CatalogSnapshot {
    fn empty() -> Self {
        Self {
            records: BTreeMap::new(),
            search_paths: SearchPaths::default(),
            generation: 0,
            built_at: None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&PluginRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Records sorted by name.
    pub fn records(&self) -> Vec<PluginRecord> {
        self.records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// In-memory catalog of installed plugins.
pub struct PluginCatalog {
    resolver: PathResolver,
    scanner: PackageScanner,
    registry: Arc<dyn PackageRegistry>,
    lookup_concurrency: usize,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    /// Bumped by `invalidate`
    invalidations: AtomicU64,
    /// Invalidation count the published snapshot was built after
    built_from: AtomicU64,
    generation: AtomicU64,
    rebuild: Mutex<()>,
}

impl PluginCatalog {
    pub fn new(
        resolver: PathResolver,
        scanner: PackageScanner,
        registry: Arc<dyn PackageRegistry>,
    ) -> Self {
        Self {
            resolver,
            scanner,
            registry,
            lookup_concurrency: hearth_core::config::defaults::LOOKUP_CONCURRENCY,
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::empty())),
            invalidations: AtomicU64::new(1),
            built_from: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            rebuild: Mutex::new(()),
        }
    }

    pub fn with_lookup_concurrency(mut self, concurrency: usize) -> Self {
        self.lookup_concurrency = concurrency.max(1);
        self
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn scanner(&self) -> &PackageScanner {
        &self.scanner
    }

    pub fn registry(&self) -> &Arc<dyn PackageRegistry> {
        &self.registry
    }

    /// Latest published snapshot, without rebuilding.
    pub fn current(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().clone()
    }

    /// Whether the next read will rebuild.
    pub fn is_stale(&self) -> bool {
        self.built_from.load(Ordering::Acquire) < self.invalidations.load(Ordering::Acquire)
    }

    /// Mark the catalog stale so the next read rebuilds it.
    pub fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::AcqRel);
        debug!(category = "plugins", "Catalog invalidated");
    }

    /// Current snapshot, rebuilding it first when stale or forced.
    pub async fn snapshot(&self, force: bool) -> Arc<CatalogSnapshot> {
        if !force && !self.is_stale() {
            return self.current();
        }

        let observed = self.generation.load(Ordering::Acquire);
        let _guard = self.rebuild.lock().await;

        // someone else rebuilt while we waited
        if self.generation.load(Ordering::Acquire) != observed && !self.is_stale() {
            return self.current();
        }

        self.rebuild_locked().await
    }

    /// Installed plugins, sorted by name.
    pub async fn get_catalog(&self, force: bool) -> Vec<PluginRecord> {
        self.snapshot(force).await.records()
    }

    /// Installed record for `name`.
    pub async fn find(&self, name: &str) -> Option<PluginRecord> {
        self.snapshot(false).await.get(name).cloned()
    }

    async fn rebuild_locked(&self) -> Arc<CatalogSnapshot> {
        // invalidations from here on trigger another rebuild
        let seen = self.invalidations.load(Ordering::Acquire);

        let search_paths = self.resolver.resolve().await;
        let installed = self.scanner.scan(&search_paths).await;

        let enriched: Vec<PluginRecord> = stream::iter(installed)
            .map(|record| self.enrich(record))
            .buffer_unordered(self.lookup_concurrency)
            .collect()
            .await;

        let records: BTreeMap<String, PluginRecord> = enriched
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();

        let generation = self.generation.load(Ordering::Acquire) + 1;
        let snapshot = Arc::new(CatalogSnapshot {
            records,
            search_paths,
            generation,
            built_at: Some(Utc::now()),
        });

        *self.snapshot.write() = snapshot.clone();
        self.generation.store(generation, Ordering::Release);
        self.built_from.store(seen, Ordering::Release);

        info!(
            category = "plugins",
            generation,
            plugins = snapshot.len(),
            "Catalog rebuilt"
        );
        snapshot
    }

    /// Fill registry metadata, failing open.
    pub async fn enrich(&self, mut record: PluginRecord) -> PluginRecord {
        match self.registry.lookup(&record.name).await {
            Ok(Some(meta)) => record.apply_registry(&meta),
            Ok(None) => record.mark_private(),
            Err(e) => {
                warn!(
                    category = "registry",
                    package = %record.name,
                    error = %e,
                    "Registry lookup failed, version metadata unavailable"
                );
                record.mark_private();
            }
        }
        record
    }
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("stale", &self.is_stale())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}
