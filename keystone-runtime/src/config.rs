//! Runtime configuration, stored as YAML under the keystone root.
//!
//! ```yaml
//! strategy:
//!   max_concurrent: 4
//!   cache_mode: persistent
//! cache:
//!   dir: cache
//! remote:
//!   root: /srv/keystone
//! discovery:
//!   routes:
//!     - { name: app, location: app/routes, priority: 0 }
//! sync:
//!   settings:
//!     local_root: settings
//!     direction: push
//!     reload_config: true
//! log:
//!   filter: keystone=debug
//!   json: false
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use keystone_core::config::{load_yaml_at, save_yaml_at};
use keystone_core::{ConfigError, Domain, SourceDescriptor, StrategyConfig};
use keystone_gather::DomainSources;
use keystone_sync::SyncRequest;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Strategy for discovery calls and the cache mode of the runtime.
    pub strategy: StrategyConfig,
    pub cache: CacheSettings,
    pub remote: RemoteSettings,
    pub discovery: DomainSources,
    pub sync: SyncJobs,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Directory for the persistent cache; defaults to `<root>/cache`.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Root of the filesystem storage backend; defaults to `<root>/remote`.
    pub root: Option<PathBuf>,
}

/// One optional request per sync domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncJobs {
    pub settings: Option<SyncRequest>,
    pub templates: Option<SyncRequest>,
    pub static_assets: Option<SyncRequest>,
    pub cache: Option<SyncRequest>,
}

impl SyncJobs {
    /// Configured jobs in run order. Settings go first so a reload lands
    /// before the other domains run.
    pub fn ordered(&self) -> Vec<(Domain, &SyncRequest)> {
        [
            (Domain::Settings, self.settings.as_ref()),
            (Domain::Templates, self.templates.as_ref()),
            (Domain::Static, self.static_assets.as_ref()),
            (Domain::Cache, self.cache.as_ref()),
        ]
        .into_iter()
        .filter_map(|(domain, job)| job.map(|job| (domain, job)))
        .collect()
    }

    fn requests_mut(&mut self) -> impl Iterator<Item = &mut SyncRequest> {
        [
            self.settings.as_mut(),
            self.templates.as_mut(),
            self.static_assets.as_mut(),
            self.cache.as_mut(),
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: Option<String>,
    pub json: bool,
}

impl RuntimeConfig {
    /// Load and validate the config at `path`.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        let cfg: RuntimeConfig = load_yaml_at(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like [`RuntimeConfig::load_at`], but a missing file yields defaults.
    pub fn load_or_default_at(path: &Path) -> Result<Self, ConfigError> {
        match Self::load_at(path) {
            Err(ConfigError::NotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save_at(&self, path: &Path) -> Result<(), ConfigError> {
        save_yaml_at(path, self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.validate()?;
        for (domain, job) in self.sync.ordered() {
            job.strategy
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("sync.{domain}: {e}")))?;
        }
        Ok(())
    }

    /// Anchor every relative path at `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(dir) = self.cache.dir.as_mut() {
            anchor(dir);
        }
        if let Some(root) = self.remote.root.as_mut() {
            anchor(root);
        }
        for source in sources_mut(&mut self.discovery) {
            anchor(&mut source.location);
        }
        for job in self.sync.requests_mut() {
            anchor(&mut job.local_root);
        }
    }
}

fn sources_mut(sources: &mut DomainSources) -> impl Iterator<Item = &mut SourceDescriptor> {
    sources
        .routes
        .iter_mut()
        .chain(sources.templates.iter_mut())
        .chain(sources.middleware.iter_mut())
        .chain(sources.models.iter_mut())
        .chain(sources.application.iter_mut())
}
