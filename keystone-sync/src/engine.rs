//! The sync state machine.
//!
//! ```text
//! INIT -> DIFF -> RESOLVE -> TRANSFER -> INVALIDATE -> DONE
//!                    |           |            |
//!                    +-----------+------------+--> FAILED
//! ```
//!
//! Each phase is a barrier: no path enters TRANSFER before every path has
//! been diffed and resolved.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use keystone_cache::{namespace, CacheCoordinator, Invalidation};
use keystone_classify::{classify_asset, resolve, AssetClass};
use keystone_core::scheduler::Task;
use keystone_core::{
    Bucket, CacheMode, Classification, ConflictRecord, ConflictStrategy, Direction, Domain,
    Resolution, StrategyConfig, SyncItem,
};

use crate::backend::{ConfigReload, StorageBackend};
use crate::diff::{self, Sides};
use crate::error::{ItemError, SyncError};
use crate::local::{backup_stamp, LocalStore};
use crate::report::{PlannedAction, SyncPhase, SyncReport, TransferKind};
use crate::transfer::{self, Transferred};

/// TTL for static assets warmed on write.
pub const STATIC_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Parameters of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncRequest {
    /// Local base directory.
    pub local_root: PathBuf,
    /// Explicit relative paths; when non-empty no listing happens.
    pub paths: Vec<String>,
    /// Filename globs; empty matches everything.
    pub patterns: Vec<String>,
    /// Only keys under this prefix take part.
    pub prefix: String,
    pub strategy: StrategyConfig,
    /// Defaults to the domain's own bucket.
    pub bucket: Option<Bucket>,
    pub direction: Direction,
    pub conflict_strategy: ConflictStrategy,
    pub dry_run: bool,
    pub backup_on_conflict: bool,
    pub reload_config: bool,
}

impl SyncRequest {
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            ..Self::default()
        }
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<Bucket>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn backup_on_conflict(mut self, backup: bool) -> Self {
        self.backup_on_conflict = backup;
        self
    }

    pub fn reload_config(mut self, reload: bool) -> Self {
        self.reload_config = reload;
        self
    }
}

fn namespace_for(domain: Domain) -> &'static str {
    match domain {
        Domain::Templates => namespace::TEMPLATES,
        Domain::Settings => namespace::SETTINGS,
        Domain::Static | Domain::Cache => namespace::STATIC,
        Domain::Routes | Domain::Middleware | Domain::Models | Domain::Application => {
            namespace::DISCOVERY
        }
    }
}

/// Changes to these domains can alter what discovery finds.
fn affects_discovery(domain: Domain) -> bool {
    !matches!(domain, Domain::Settings | Domain::Static | Domain::Cache)
}

// ---------------------------------------------------------------------------
// SyncEngine
// ---------------------------------------------------------------------------

pub struct SyncEngine {
    backend: Arc<dyn StorageBackend>,
    cache: Arc<CacheCoordinator>,
    reload: Option<Arc<dyn ConfigReload>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("cache", &self.cache)
            .field("reload", &self.reload.is_some())
            .finish()
    }
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn StorageBackend>, cache: Arc<CacheCoordinator>) -> Self {
        Self {
            backend,
            cache,
            reload: None,
        }
    }

    pub fn with_reload(mut self, reload: Arc<dyn ConfigReload>) -> Self {
        self.reload = Some(reload);
        self
    }

    pub fn cache_coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.cache
    }

    pub async fn templates(&self, request: &SyncRequest) -> Result<SyncReport, SyncError> {
        self.sync(Domain::Templates, request).await
    }

    pub async fn settings(&self, request: &SyncRequest) -> Result<SyncReport, SyncError> {
        self.sync(Domain::Settings, request).await
    }

    pub async fn static_assets(&self, request: &SyncRequest) -> Result<SyncReport, SyncError> {
        self.sync(Domain::Static, request).await
    }

    pub async fn cache(&self, request: &SyncRequest) -> Result<SyncReport, SyncError> {
        self.sync(Domain::Cache, request).await
    }

    /// Run one sync for `domain`. Errors leave the run in
    /// [`SyncPhase::Failed`]; committed per-item writes are not rolled back.
    pub async fn sync(&self, domain: Domain, request: &SyncRequest) -> Result<SyncReport, SyncError> {
        let outcome = if domain == Domain::Cache {
            self.reconcile_cache(request).await
        } else {
            self.run(domain, request).await
        };
        if let Err(err) = &outcome {
            tracing::error!(%domain, phase = %SyncPhase::Failed, error = %err, "sync failed");
        }
        outcome
    }

    async fn run(&self, domain: Domain, request: &SyncRequest) -> Result<SyncReport, SyncError> {
        let cfg = &request.strategy;
        cfg.validate()?;
        let started = Instant::now();
        let sides = Sides {
            local: LocalStore::new(&request.local_root),
            backend: Arc::clone(&self.backend),
            bucket: request
                .bucket
                .clone()
                .unwrap_or_else(|| Bucket::for_domain(domain)),
        };
        let mut report = SyncReport::new(domain, request.dry_run, cfg.error_mode);

        // DIFF
        report.phase = SyncPhase::Diff;
        let paths = diff::candidates(&sides, &request.paths, &request.patterns, &request.prefix)
            .await?;
        let (items, diff_errors) = diff::build_items(&sides, paths, cfg).await?;
        report.errors.extend(diff_errors);
        tracing::debug!(%domain, bucket = %sides.bucket, items = items.len(), "diff complete");

        // RESOLVE
        report.phase = SyncPhase::Resolve;
        let unresolved = self.resolve(&sides, &items, request, &mut report).await;
        if request.dry_run {
            if domain == Domain::Static {
                let planned: Vec<String> = report.planned.iter().map(|a| a.path.clone()).collect();
                classify_assets(&mut report, planned.iter());
            }
            return Ok(finish(report, started));
        }
        if !unresolved.is_empty() {
            return Err(SyncError::Conflict {
                records: unresolved,
            });
        }

        // TRANSFER
        report.phase = SyncPhase::Transfer;
        let transferred = self
            .transfer(&sides, domain, &report.planned, cfg, &mut report.errors)
            .await?;
        report.synced_items = transferred.iter().map(|t| t.path.clone()).collect();
        report.backed_up = transferred.iter().filter_map(|t| t.backup.clone()).collect();

        if domain == Domain::Settings && request.reload_config && !report.synced_items.is_empty() {
            self.reload_config(&mut report).await;
        }

        // INVALIDATE
        report.phase = SyncPhase::Invalidate;
        self.invalidate(domain, cfg, &transferred, &mut report).await?;

        Ok(finish(report, started))
    }

    /// Plan transfers and record conflicts. Returns records left unresolved.
    async fn resolve(
        &self,
        sides: &Sides,
        items: &[SyncItem],
        request: &SyncRequest,
        report: &mut SyncReport,
    ) -> Vec<ConflictRecord> {
        let mut unresolved = Vec::new();
        for item in items {
            let path = item.relative_path.clone();
            match item.classification {
                Classification::Unchanged => {}
                Classification::LocalOnly if request.direction.pushes() => {
                    report.planned.push(PlannedAction {
                        path,
                        kind: TransferKind::Push,
                        backup: false,
                    });
                }
                Classification::RemoteOnly if request.direction.pulls() => {
                    report.planned.push(PlannedAction {
                        path,
                        kind: TransferKind::Pull,
                        backup: false,
                    });
                }
                Classification::LocalOnly | Classification::RemoteOnly => {}
                Classification::Conflict => {
                    let resolution =
                        resolve(&item.local_state, &item.remote_state, request.conflict_strategy);
                    let mut record = ConflictRecord::from_item(item, resolution);
                    if request.dry_run {
                        record.preview = conflict_preview(sides, &path).await;
                    }

                    match resolution.winner() {
                        None => unresolved.push(record.clone()),
                        Some(winner) => {
                            let kind = TransferKind::toward(winner.opposite());
                            let allowed = match kind {
                                TransferKind::Push => request.direction.pushes(),
                                TransferKind::Pull => request.direction.pulls(),
                            };
                            let backup = request.backup_on_conflict
                                || matches!(resolution, Resolution::BackupBoth { .. });
                            if allowed {
                                report.planned.push(PlannedAction { path, kind, backup });
                            }
                        }
                    }
                    report.conflicts.push(record);
                }
            }
        }
        unresolved
    }

    /// Run the planned copies. If the run fails after some copies
    /// committed, their cache keys are invalidated before the error is
    /// surfaced.
    async fn transfer(
        &self,
        sides: &Sides,
        domain: Domain,
        planned: &[PlannedAction],
        cfg: &StrategyConfig,
        errors: &mut Vec<ItemError>,
    ) -> Result<Vec<Transferred>, SyncError> {
        let stamp = backup_stamp(Utc::now());
        let validate = domain == Domain::Settings;
        let committed: Arc<Mutex<Vec<String>>> = Arc::default();
        let tasks: Vec<Task<Transferred, SyncError>> = planned
            .iter()
            .map(|action| {
                let sides = sides.clone();
                let action = action.clone();
                let stamp = stamp.clone();
                let committed = Arc::clone(&committed);
                Task::new(action.path.clone(), move || {
                    let sides = sides.clone();
                    let action = action.clone();
                    let stamp = stamp.clone();
                    let committed = Arc::clone(&committed);
                    async move {
                        let done = transfer::transfer(&sides, &action, &stamp, validate).await?;
                        if let Ok(mut log) = committed.lock() {
                            log.push(done.path.clone());
                        }
                        Ok(done)
                    }
                })
            })
            .collect();

        let failure = match diff::run_units(tasks, cfg).await {
            Ok(settled) => match settled.outage {
                None => {
                    errors.extend(settled.errors);
                    let mut transferred = settled.ok;
                    transferred.sort_by(|a, b| a.path.cmp(&b.path));
                    return Ok(transferred);
                }
                Some(outage) => outage,
            },
            Err(err) => err,
        };

        let paths = committed
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default();
        if !paths.is_empty() {
            match self.invalidate_paths(domain, &paths).await {
                Ok(keys) => tracing::warn!(
                    %domain,
                    committed = paths.len(),
                    invalidated = keys.len(),
                    "transfer failed after partial commit"
                ),
                Err(err) => tracing::error!(
                    %domain,
                    error = %err,
                    "could not invalidate committed paths"
                ),
            }
        }
        Err(failure)
    }

    /// Drop the cache keys of `paths`, plus discovery results when the
    /// domain feeds discovery. Returns the qualified keys removed.
    async fn invalidate_paths(
        &self,
        domain: Domain,
        paths: &[String],
    ) -> Result<Vec<String>, SyncError> {
        let mut keys = self
            .cache
            .invalidate(namespace_for(domain), Invalidation::Keys(paths.to_vec()))
            .await?;
        if affects_discovery(domain) {
            let dropped = self
                .cache
                .invalidate(namespace::DISCOVERY, Invalidation::All)
                .await?;
            keys.extend(dropped);
        }
        Ok(keys)
    }

    async fn reload_config(&self, report: &mut SyncReport) {
        let Some(reload) = &self.reload else {
            tracing::warn!("settings changed but no config reload handler is registered");
            return;
        };
        match reload.reload().await {
            Ok(()) => {
                report.config_reloaded = true;
                tracing::info!(changed = report.synced_items.len(), "configuration reloaded");
            }
            Err(err) => report.errors.push(ItemError::new(None, &err)),
        }
    }

    async fn invalidate(
        &self,
        domain: Domain,
        cfg: &StrategyConfig,
        transferred: &[Transferred],
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        if transferred.is_empty() {
            return Ok(());
        }
        let ns = namespace_for(domain);
        report.cache_invalidated = self.invalidate_paths(domain, &report.synced_items).await?;

        if domain != Domain::Static {
            return Ok(());
        }
        classify_assets(report, transferred.iter().map(|t| &t.path));
        if cfg.cache_mode == CacheMode::None || report.cacheable_assets.is_empty() {
            return Ok(());
        }

        let contents: HashMap<&str, &[u8]> = transferred
            .iter()
            .map(|t| (t.path.as_str(), t.content.as_slice()))
            .collect();
        let warm = self
            .cache
            .warm(
                ns,
                report.cacheable_assets.clone(),
                Some(STATIC_CACHE_TTL),
                |key| {
                    let bytes = contents.get(key.as_str()).map(|b| b.to_vec());
                    async move { bytes.ok_or("content not retained") }
                },
            )
            .await;
        report.cache_warmed = warm.warmed;
        report
            .errors
            .extend(warm.failed.into_iter().map(|e| ItemError::new(None, &SyncError::from(e))));
        Ok(())
    }

    /// Refresh cached copies of local cacheable files whose bytes drifted.
    async fn reconcile_cache(&self, request: &SyncRequest) -> Result<SyncReport, SyncError> {
        let cfg = &request.strategy;
        cfg.validate()?;
        let started = Instant::now();
        let mut report = SyncReport::new(Domain::Cache, request.dry_run, cfg.error_mode);
        let local = LocalStore::new(&request.local_root);
        let ns = namespace_for(Domain::Cache);

        report.phase = SyncPhase::Diff;
        let files: Vec<String> = if request.paths.is_empty() {
            local
                .list(diff::build_matcher(&request.patterns)?)
                .await?
                .into_iter()
                .filter(|p| p.starts_with(&request.prefix))
                .collect()
        } else {
            request.paths.clone()
        };
        let cacheable: Vec<String> = files
            .into_iter()
            .filter(|p| classify_asset(p) == AssetClass::Cacheable)
            .collect();

        // `Some((path, None))`: cached, but the local file is gone.
        let tasks: Vec<Task<Option<(String, Option<Vec<u8>>)>, SyncError>> = cacheable
            .into_iter()
            .map(|path| {
                let local = local.clone();
                let cache = Arc::clone(&self.cache);
                Task::new(path.clone(), move || {
                    let local = local.clone();
                    let cache = Arc::clone(&cache);
                    let path = path.clone();
                    async move {
                        let Some(cached) = cache.get(ns, &path).await? else {
                            return Ok(None);
                        };
                        Ok(match local.read(&path).await? {
                            Some(disk) if disk == cached => None,
                            disk => Some((path, disk)),
                        })
                    }
                })
            })
            .collect();
        let settled = diff::run_units(tasks, cfg).await?;
        if let Some(outage) = settled.outage {
            return Err(outage);
        }
        report.errors.extend(settled.errors);

        let mut stale: Vec<(String, Option<Vec<u8>>)> = settled.ok.into_iter().flatten().collect();
        stale.sort_by(|a, b| a.0.cmp(&b.0));
        report.cacheable_assets = stale.iter().map(|(p, _)| p.clone()).collect();
        if request.dry_run || stale.is_empty() {
            return Ok(finish(report, started));
        }

        report.phase = SyncPhase::Invalidate;
        report.cache_invalidated = self
            .cache
            .invalidate(ns, Invalidation::Keys(report.cacheable_assets.clone()))
            .await?;
        let contents: HashMap<String, Vec<u8>> = stale
            .into_iter()
            .filter_map(|(path, disk)| disk.map(|bytes| (path, bytes)))
            .collect();
        let mut rewarm: Vec<String> = contents.keys().cloned().collect();
        rewarm.sort();
        let warm = self
            .cache
            .warm(ns, rewarm, Some(STATIC_CACHE_TTL), |key| {
                let bytes = contents.get(&key).cloned();
                async move { bytes.ok_or("content not retained") }
            })
            .await;
        report.synced_items = report.cacheable_assets.clone();
        report.cache_warmed = warm.warmed;
        report
            .errors
            .extend(warm.failed.into_iter().map(|e| ItemError::new(None, &SyncError::from(e))));
        Ok(finish(report, started))
    }
}

async fn conflict_preview(sides: &Sides, path: &str) -> Option<String> {
    let (local, remote) = tokio::join!(
        sides.local.read(path),
        sides.backend.get(&sides.bucket, path)
    );
    diff::preview(path, &local.ok()??, &remote.ok()??)
}

fn classify_assets<'a>(report: &mut SyncReport, paths: impl Iterator<Item = &'a String>) {
    for path in paths {
        match classify_asset(path) {
            AssetClass::Cacheable => report.cacheable_assets.push(path.clone()),
            AssetClass::StorageOnly => report.non_cacheable_assets.push(path.clone()),
        }
    }
}

fn finish(mut report: SyncReport, started: Instant) -> SyncReport {
    report.phase = SyncPhase::Done;
    report.elapsed = started.elapsed();
    tracing::info!(
        domain = %report.domain,
        synced = report.synced_items.len(),
        conflicts = report.conflicts.len(),
        errors = report.errors.len(),
        invalidated = report.cache_invalidated.len(),
        warmed = report.cache_warmed.len(),
        dry_run = report.dry_run,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "sync complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_per_domain() {
        assert_eq!(namespace_for(Domain::Templates), "templates");
        assert_eq!(namespace_for(Domain::Static), "static");
        assert_eq!(namespace_for(Domain::Cache), "static");
        assert!(affects_discovery(Domain::Templates));
        assert!(!affects_discovery(Domain::Static));
    }

    #[test]
    fn request_round_trips_through_yaml() {
        let yaml = "local_root: /srv/app/static\npatterns: ['*.css']\ndirection: push\nconflict_strategy: backup_both\n";
        let req: SyncRequest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(req.direction, Direction::Push);
        assert_eq!(req.conflict_strategy, ConflictStrategy::BackupBoth);
        assert!(!req.dry_run);
        assert_eq!(req.strategy, StrategyConfig::default());
    }
}
