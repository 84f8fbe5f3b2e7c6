use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use keystone_cache::{CacheCoordinator, FileCacheBackend};
use keystone_core::{CacheMode, Domain};
use keystone_gather::{ApplicationManifest, Gatherer, Loaders};
use keystone_sync::{ConfigReload, FsBackend, SyncEngine, SyncError, SyncReport};

use crate::config::RuntimeConfig;
use crate::error::{io_err, RuntimeError};
use crate::paths::{cache_dir, config_path, keystone_root, remote_dir};
use crate::telemetry;

/// Counts from one sync job, for logs and callers that do not need the
/// full [`SyncReport`].
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub domain: Domain,
    pub synced: usize,
    pub conflicts: usize,
    pub backed_up: usize,
    pub invalidated: usize,
    pub errors: usize,
    pub config_reloaded: bool,
    pub duration_ms: u128,
}

impl From<&SyncReport> for SyncSummary {
    fn from(report: &SyncReport) -> Self {
        Self {
            domain: report.domain,
            synced: report.synced_items.len(),
            conflicts: report.conflicts.len(),
            backed_up: report.backed_up.len(),
            invalidated: report.cache_invalidated.len(),
            errors: report.errors.len(),
            config_reloaded: report.config_reloaded,
            duration_ms: report.elapsed.as_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub discovered: usize,
    pub discovery_errors: bool,
    pub jobs: Vec<SyncSummary>,
}

/// Re-reads the runtime config file after settings were synced.
///
/// Only the strategy, discovery sources and sync jobs are swapped; the
/// cache and storage backend keep the values they were built with.
struct ConfigFileReload {
    path: PathBuf,
    base: PathBuf,
    config: Arc<RwLock<RuntimeConfig>>,
}

#[async_trait]
impl ConfigReload for ConfigFileReload {
    async fn reload(&self) -> Result<(), SyncError> {
        let mut fresh = RuntimeConfig::load_or_default_at(&self.path)
            .map_err(|e| SyncError::Reload(e.to_string()))?;
        fresh.resolve_paths(&self.base);
        *self.config.write().await = fresh;
        tracing::info!(path = %self.path.display(), "runtime config reloaded");
        Ok(())
    }
}

/// Everything wired together for one keystone root.
#[derive(Debug)]
pub struct Runtime {
    home: PathBuf,
    config: Arc<RwLock<RuntimeConfig>>,
    cache: Arc<CacheCoordinator>,
    gatherer: Gatherer,
    engine: SyncEngine,
}

/// Load `<home>/.keystone/config.yaml` (defaults if absent) with relative
/// paths anchored at the keystone root.
pub fn load_config(home: &Path) -> Result<RuntimeConfig, RuntimeError> {
    let mut config = RuntimeConfig::load_or_default_at(&config_path(home))?;
    config.resolve_paths(&keystone_root(home));
    Ok(config)
}

impl Runtime {
    pub fn open_at(home: &Path) -> Result<Self, RuntimeError> {
        let config = load_config(home)?;
        Self::new(home, config)
    }

    /// Build from an already resolved config.
    pub fn new(home: &Path, config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let root = keystone_root(home);
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;

        let cache = Arc::new(match config.strategy.cache_mode {
            CacheMode::None => CacheCoordinator::disabled(),
            CacheMode::Memory => CacheCoordinator::in_memory(),
            CacheMode::Persistent => {
                let dir = config.cache.dir.clone().unwrap_or_else(|| cache_dir(home));
                CacheCoordinator::persistent(Arc::new(FileCacheBackend::new(dir)))
            }
        });
        let remote = config.remote.root.clone().unwrap_or_else(|| remote_dir(home));

        let config = Arc::new(RwLock::new(config));
        let reload = ConfigFileReload {
            path: config_path(home),
            base: root,
            config: config.clone(),
        };
        let gatherer = Gatherer::new(cache.clone(), Loaders::builtin());
        let engine = SyncEngine::new(Arc::new(FsBackend::new(remote)), cache.clone())
            .with_reload(Arc::new(reload));

        Ok(Self {
            home: home.to_path_buf(),
            config,
            cache,
            gatherer,
            engine,
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Snapshot of the current config.
    pub async fn config(&self) -> RuntimeConfig {
        self.config.read().await.clone()
    }

    pub fn cache(&self) -> &Arc<CacheCoordinator> {
        &self.cache
    }

    pub fn gatherer(&self) -> &Gatherer {
        &self.gatherer
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Discover every domain declared under `discovery`.
    pub async fn gather(&self) -> Result<ApplicationManifest, RuntimeError> {
        let config = self.config().await;
        let manifest = self
            .gatherer
            .gather_all(&config.discovery, &config.strategy)
            .await?;
        tracing::info!(
            total = manifest.total_count(),
            has_errors = manifest.has_errors(),
            "application discovered"
        );
        Ok(manifest)
    }

    /// Run the configured sync jobs in order. Jobs are read once, at the
    /// start; a fatal job error stops the remaining jobs.
    pub async fn sync_all(&self) -> Result<Vec<SyncReport>, RuntimeError> {
        let jobs = self.config().await.sync;
        let mut reports = Vec::new();
        for (domain, request) in jobs.ordered() {
            let report = self.engine.sync(domain, request).await?;
            let summary = SyncSummary::from(&report);
            tracing::info!(
                domain = %summary.domain,
                synced = summary.synced,
                conflicts = summary.conflicts,
                errors = summary.errors,
                duration_ms = summary.duration_ms as u64,
                "sync job finished"
            );
            reports.push(report);
        }
        Ok(reports)
    }

    /// Sync first so discovery sees freshly pulled templates.
    pub async fn run_once(&self) -> Result<RunSummary, RuntimeError> {
        let started = Instant::now();
        let reports = self.sync_all().await?;
        let manifest = self.gather().await?;
        let summary = RunSummary {
            discovered: manifest.total_count(),
            discovery_errors: manifest.has_errors(),
            jobs: reports.iter().map(SyncSummary::from).collect(),
        };
        tracing::info!(
            jobs = summary.jobs.len(),
            discovered = summary.discovered,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run complete"
        );
        Ok(summary)
    }
}

/// Run one sync-then-discover pass for `home`, blocking the current thread.
pub fn start_blocking(home: &Path) -> Result<RunSummary, RuntimeError> {
    let config = load_config(home)?;
    telemetry::init(&config.log);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let keystone = Runtime::new(home, config)?;
    runtime.block_on(keystone.run_once())
}

/// Async counterpart of [`start_blocking`].
pub async fn run(home: PathBuf) -> Result<RunSummary, RuntimeError> {
    Runtime::open_at(&home)?.run_once().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cache_follows_strategy_mode() {
        let tmp = TempDir::new().unwrap();
        for mode in [CacheMode::None, CacheMode::Memory, CacheMode::Persistent] {
            let mut config = RuntimeConfig::default();
            config.strategy.cache_mode = mode;
            let runtime = Runtime::new(tmp.path(), config).unwrap();
            assert_eq!(runtime.cache().mode(), mode);
        }
        assert!(keystone_root(tmp.path()).is_dir());
    }

    #[test]
    fn start_blocking_with_empty_home_does_nothing() {
        let tmp = TempDir::new().unwrap();
        let summary = start_blocking(tmp.path()).unwrap();
        assert!(summary.jobs.is_empty());
        assert_eq!(summary.discovered, 0);
        assert!(!summary.discovery_errors);
    }
}
