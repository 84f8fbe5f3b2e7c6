//! The discovery pipeline: cache lookup, source expansion, scheduled loads,
//! priority merge.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use keystone_cache::{namespace, CacheCoordinator};
use keystone_core::scheduler::{self, Task};
use keystone_core::{CacheMode, Domain, Fault, FaultKind, SourceDescriptor, StrategyConfig};

use crate::error::{GatherError, LoadError};
use crate::items::{
    default_patterns, ComponentItem, GatherItem, MiddlewareItem, ModelItem, RouteItem,
    TemplateItem,
};
use crate::loader::{Loader, Loaders};
use crate::report::{GatherReport, SourceError};
use crate::source::{expand, Candidate};

/// Sources for every list domain, as declared in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainSources {
    pub routes: Vec<SourceDescriptor>,
    pub templates: Vec<SourceDescriptor>,
    pub middleware: Vec<SourceDescriptor>,
    pub models: Vec<SourceDescriptor>,
    pub application: Vec<SourceDescriptor>,
}

/// Everything discovered for one application.
#[derive(Debug, Clone)]
pub struct ApplicationManifest {
    pub routes: GatherReport<RouteItem>,
    pub templates: GatherReport<TemplateItem>,
    pub middleware: GatherReport<MiddlewareItem>,
    pub models: GatherReport<ModelItem>,
    pub components: GatherReport<ComponentItem>,
}

impl ApplicationManifest {
    pub fn total_count(&self) -> usize {
        self.routes.total_count
            + self.templates.total_count
            + self.middleware.total_count
            + self.models.total_count
            + self.components.total_count
    }

    pub fn has_errors(&self) -> bool {
        self.routes.has_errors()
            || self.templates.has_errors()
            || self.middleware.has_errors()
            || self.models.has_errors()
            || self.components.has_errors()
    }
}

/// Discovery engine. Cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Gatherer {
    cache: Arc<CacheCoordinator>,
    loaders: Loaders,
}

impl Gatherer {
    pub fn new(cache: Arc<CacheCoordinator>, loaders: Loaders) -> Self {
        Self { cache, loaders }
    }

    pub fn cache(&self) -> &Arc<CacheCoordinator> {
        &self.cache
    }

    pub async fn routes(
        &self,
        sources: &[SourceDescriptor],
        cfg: &StrategyConfig,
    ) -> Result<GatherReport<RouteItem>, GatherError> {
        self.discover(sources, &[], cfg).await
    }

    pub async fn templates(
        &self,
        sources: &[SourceDescriptor],
        cfg: &StrategyConfig,
    ) -> Result<GatherReport<TemplateItem>, GatherError> {
        self.discover(sources, &[], cfg).await
    }

    pub async fn middleware(
        &self,
        sources: &[SourceDescriptor],
        cfg: &StrategyConfig,
    ) -> Result<GatherReport<MiddlewareItem>, GatherError> {
        self.discover(sources, &[], cfg).await
    }

    pub async fn models(
        &self,
        sources: &[SourceDescriptor],
        cfg: &StrategyConfig,
    ) -> Result<GatherReport<ModelItem>, GatherError> {
        self.discover(sources, &[], cfg).await
    }

    pub async fn components(
        &self,
        sources: &[SourceDescriptor],
        cfg: &StrategyConfig,
    ) -> Result<GatherReport<ComponentItem>, GatherError> {
        self.discover(sources, &[], cfg).await
    }

    /// Discover all five domains concurrently.
    pub async fn gather_all(
        &self,
        sources: &DomainSources,
        cfg: &StrategyConfig,
    ) -> Result<ApplicationManifest, GatherError> {
        let (routes, templates, middleware, models, components) = tokio::try_join!(
            self.routes(&sources.routes, cfg),
            self.templates(&sources.templates, cfg),
            self.middleware(&sources.middleware, cfg),
            self.models(&sources.models, cfg),
            self.components(&sources.application, cfg),
        )?;
        Ok(ApplicationManifest {
            routes,
            templates,
            middleware,
            models,
            components,
        })
    }

    /// Discover `T` items with the loader registered for its domain.
    /// Empty `patterns` fall back to the domain defaults.
    pub async fn discover<T: GatherItem>(
        &self,
        sources: &[SourceDescriptor],
        patterns: &[String],
        cfg: &StrategyConfig,
    ) -> Result<GatherReport<T>, GatherError> {
        let loader = T::loader(&self.loaders).ok_or(GatherError::NoLoader(T::DOMAIN))?;
        self.discover_with(sources, patterns, cfg, loader).await
    }

    /// Discover `T` items with an explicit loader.
    pub async fn discover_with<T: GatherItem>(
        &self,
        sources: &[SourceDescriptor],
        patterns: &[String],
        cfg: &StrategyConfig,
        loader: Arc<dyn Loader<T>>,
    ) -> Result<GatherReport<T>, GatherError> {
        cfg.validate()?;
        let started = Instant::now();
        let domain = T::DOMAIN;

        let patterns: Vec<String> = if patterns.is_empty() {
            default_patterns(domain).iter().map(|p| p.to_string()).collect()
        } else {
            patterns.to_vec()
        };

        let use_cache = cfg.cache_mode != CacheMode::None;
        let key = cache_key(domain, sources, &patterns, cfg);
        if use_cache {
            match self
                .cache
                .get_json::<GatherReport<T>>(namespace::DISCOVERY, &key)
                .await
            {
                Ok(Some(mut report)) => {
                    tracing::debug!(%domain, items = report.total_count, "discovery cache hit");
                    report.from_cache = true;
                    return Ok(report);
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(%domain, error = %err, "discovery cache read failed"),
            }
        }

        let expansion = expand(sources, &patterns, cfg.error_mode).await?;
        let tasks: Vec<Task<(usize, Vec<T>), LoadError>> = expansion
            .candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                let loader = Arc::clone(&loader);
                let candidate = candidate.clone();
                Task::new(candidate.label(), move || {
                    let loader = Arc::clone(&loader);
                    let candidate = candidate.clone();
                    async move { loader.load(&candidate).await.map(|items| (index, items)) }
                })
            })
            .collect();

        let batch = scheduler::run(tasks, cfg).await?;
        let timed_out = batch.timed_out.clone();
        let (loaded, failed) = batch.partition();

        let mut report = merge(domain, &expansion.candidates, loaded, cfg);
        report.skipped = expansion.skipped.iter().map(|s| s.0.clone()).collect();
        report.errors = expansion.failed.clone();
        report
            .errors
            .extend(collect_errors(&expansion.candidates, failed, timed_out));
        report.elapsed = started.elapsed();

        tracing::info!(
            %domain,
            items = report.total_count,
            errors = report.errors.len(),
            skipped = report.skipped.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "discovery complete"
        );

        if use_cache && is_cacheable(&report) {
            if let Err(err) = self
                .cache
                .set_json(namespace::DISCOVERY, &key, &report, Some(cfg.cache_ttl))
                .await
            {
                tracing::warn!(%domain, error = %err, "discovery cache write failed");
            }
        }
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Keep the first item per natural key. Candidates are already ordered by
/// (priority, declaration order, path), so the first seen is the winner.
fn merge<T: GatherItem>(
    domain: Domain,
    candidates: &[Candidate],
    loaded: Vec<(String, (usize, Vec<T>))>,
    cfg: &StrategyConfig,
) -> GatherReport<T> {
    let mut loaded: Vec<(usize, Vec<T>)> = loaded.into_iter().map(|(_, v)| v).collect();
    loaded.sort_by_key(|(index, _)| *index);

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    let mut by_source: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for (index, batch) in loaded {
        let source = &candidates[index].source;
        for item in batch {
            let key = item.natural_key();
            if !seen.insert(key.clone()) {
                tracing::debug!(%domain, %source, key = %key, "shadowed by higher-priority source");
                continue;
            }
            by_source
                .entry(source.0.clone())
                .or_default()
                .push(item.clone());
            items.push(item);
        }
    }

    GatherReport {
        domain,
        total_count: items.len(),
        items,
        by_source,
        errors: Vec::new(),
        skipped: Vec::new(),
        elapsed: Default::default(),
        error_mode: cfg.error_mode,
        from_cache: false,
    }
}

/// Reports are cached with their errors unless a retry could change the
/// outcome.
fn is_cacheable<T>(report: &GatherReport<T>) -> bool {
    report
        .errors
        .iter()
        .all(|e| !e.kind.is_transient() && e.kind != FaultKind::Timeout)
}

fn collect_errors(
    candidates: &[Candidate],
    failed: Vec<(String, LoadError)>,
    timed_out: Vec<String>,
) -> Vec<SourceError> {
    let by_label: HashMap<String, &Candidate> =
        candidates.iter().map(|c| (c.label(), c)).collect();
    let describe = |label: &str| match by_label.get(label) {
        Some(c) => (c.source.0.clone(), Some(c.path.clone())),
        None => (label.to_string(), None),
    };

    let mut errors: Vec<SourceError> = failed
        .into_iter()
        .map(|(label, err)| {
            let (source, path) = describe(&label);
            SourceError {
                source,
                path,
                kind: err.kind(),
                message: err.to_string(),
            }
        })
        .collect();
    errors.extend(timed_out.into_iter().map(|label| {
        let (source, path) = describe(&label);
        SourceError {
            source,
            path,
            kind: FaultKind::Timeout,
            message: format!("'{label}' did not finish before the timeout"),
        }
    }));
    errors
}

/// Stable across runs and independent of declaration order.
pub(crate) fn cache_key(
    domain: Domain,
    sources: &[SourceDescriptor],
    patterns: &[String],
    cfg: &StrategyConfig,
) -> String {
    let mut identities: Vec<String> = sources
        .iter()
        .map(|s| {
            let mut own = s.patterns.clone();
            own.sort();
            format!(
                "{}|{:?}|{}|{}|{}",
                s.name,
                s.kind,
                s.location.display(),
                s.priority,
                own.join(",")
            )
        })
        .collect();
    identities.sort();
    let mut patterns = patterns.to_vec();
    patterns.sort();

    let mut hasher = Sha256::new();
    hasher.update(domain.to_string());
    for part in identities.iter().chain(patterns.iter()) {
        hasher.update([0u8]);
        hasher.update(part.as_bytes());
    }
    hasher.update([0u8]);
    hasher.update(format!("{:?}", cfg.error_mode));
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::ErrorMode;

    #[test]
    fn cache_key_ignores_declaration_order() {
        let a = SourceDescriptor::directory("a", "/a", 1);
        let b = SourceDescriptor::directory("b", "/b", 2);
        let cfg = StrategyConfig::default();
        let pats = vec!["x".to_string(), "y".to_string()];
        let rev = vec!["y".to_string(), "x".to_string()];
        assert_eq!(
            cache_key(Domain::Routes, &[a.clone(), b.clone()], &pats, &cfg),
            cache_key(Domain::Routes, &[b, a], &rev, &cfg)
        );
    }

    #[test]
    fn cache_key_depends_on_domain_and_error_mode() {
        let src = vec![SourceDescriptor::directory("a", "/a", 1)];
        let cfg = StrategyConfig::default();
        let base = cache_key(Domain::Routes, &src, &[], &cfg);
        assert_ne!(base, cache_key(Domain::Models, &src, &[], &cfg));
        let strict = cfg.clone().with_error_mode(ErrorMode::FailFast);
        assert_ne!(base, cache_key(Domain::Routes, &src, &[], &strict));
    }
}
