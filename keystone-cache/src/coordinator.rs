//! Namespaced cache coordinator.
//!
//! One explicitly constructed [`CacheCoordinator`] is shared (behind an `Arc`)
//! by every worker in a process. It is the only shared mutable state in the
//! engines, so each key replacement happens under a single write lock.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use keystone_core::CacheMode;

use crate::backend::{CacheBackend, CacheEntry};
use crate::error::CacheError;

/// Well-known namespaces.
pub mod namespace {
    pub const DISCOVERY: &str = "discovery";
    pub const TEMPLATES: &str = "templates";
    pub const SETTINGS: &str = "settings";
    pub const STATIC: &str = "static";
    pub const RESPONSES: &str = "responses";
}

/// `namespace:key`, the form used in sync reports.
pub fn qualified_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

/// Which keys an invalidation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Keys(Vec<String>),
    All,
}

/// Result of a best-effort warm.
#[derive(Debug, Default)]
pub struct WarmReport {
    /// Qualified keys now present in the cache.
    pub warmed: Vec<String>,
    pub failed: Vec<CacheError>,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

type MemoryTable = HashMap<(String, String), CacheEntry>;

pub struct CacheCoordinator {
    mode: CacheMode,
    memory: RwLock<MemoryTable>,
    backend: Option<Arc<dyn CacheBackend>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("mode", &self.mode)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

impl CacheCoordinator {
    fn with_mode(mode: CacheMode, backend: Option<Arc<dyn CacheBackend>>) -> Self {
        Self {
            mode,
            memory: RwLock::new(HashMap::new()),
            backend,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Every get misses and every set is a no-op.
    pub fn disabled() -> Self {
        Self::with_mode(CacheMode::None, None)
    }

    /// In-process table with lazy TTL expiry on read.
    pub fn in_memory() -> Self {
        Self::with_mode(CacheMode::Memory, None)
    }

    /// Delegates storage to an external backend.
    pub fn persistent(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_mode(CacheMode::Persistent, Some(backend))
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// A clone of the live entry for `namespace:key`, expiry included.
    pub async fn entry(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let now = Utc::now();
        let found = match (self.mode, &self.backend) {
            (CacheMode::None, _) => None,
            (CacheMode::Persistent, Some(backend)) => match backend.get(namespace, key).await? {
                Some(entry) if entry.is_expired(now) => {
                    backend.delete(namespace, key).await?;
                    None
                }
                other => other,
            },
            _ => {
                let id = (namespace.to_string(), key.to_string());
                let cached = self.memory.read().await.get(&id).cloned();
                match cached {
                    Some(entry) if entry.is_expired(now) => {
                        let mut table = self.memory.write().await;
                        if table.get(&id).is_some_and(|e| e.is_expired(now)) {
                            table.remove(&id);
                        }
                        None
                    }
                    other => other,
                }
            }
        };
        self.record(found.is_some());
        Ok(found)
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entry(namespace, key).await?.map(|e| e.value))
    }

    /// Store `value`; `ttl = None` never expires.
    pub async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        // A TTL too large for chrono is treated as no expiry.
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        let entry = CacheEntry {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value,
            expires_at,
        };
        match (self.mode, &self.backend) {
            (CacheMode::None, _) => Ok(()),
            (CacheMode::Persistent, Some(backend)) => backend.set(entry).await,
            _ => {
                self.memory
                    .write()
                    .await
                    .insert((namespace.to_string(), key.to_string()), entry);
                Ok(())
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.get(namespace, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.set(namespace, key, bytes, ttl).await
    }

    /// Drop keys from `namespace`, returning the qualified keys targeted.
    ///
    /// For [`Invalidation::Keys`] every requested key is returned whether or
    /// not it was present; for [`Invalidation::All`] only the keys removed.
    pub async fn invalidate(
        &self,
        namespace: &str,
        scope: Invalidation,
    ) -> Result<Vec<String>, CacheError> {
        let keys = match (scope, self.mode, &self.backend) {
            (Invalidation::Keys(keys), CacheMode::None, _) => keys,
            (Invalidation::All, CacheMode::None, _) => Vec::new(),
            (Invalidation::Keys(keys), CacheMode::Persistent, Some(backend)) => {
                for key in &keys {
                    backend.delete(namespace, key).await?;
                }
                keys
            }
            (Invalidation::All, CacheMode::Persistent, Some(backend)) => {
                backend.clear(namespace).await?
            }
            (Invalidation::Keys(keys), _, _) => {
                let mut table = self.memory.write().await;
                for key in &keys {
                    table.remove(&(namespace.to_string(), key.clone()));
                }
                keys
            }
            (Invalidation::All, _, _) => {
                let mut table = self.memory.write().await;
                let mut removed: Vec<String> = table
                    .keys()
                    .filter(|(ns, _)| ns == namespace)
                    .map(|(_, key)| key.clone())
                    .collect();
                table.retain(|(ns, _), _| ns != namespace);
                removed.sort();
                removed
            }
        };
        if !keys.is_empty() {
            tracing::debug!(namespace, count = keys.len(), "cache invalidated");
        }
        Ok(keys.iter().map(|k| qualified_key(namespace, k)).collect())
    }

    /// Load and store each key. A failing loader is recorded in
    /// [`WarmReport::failed`] and its key stays absent.
    pub async fn warm<F, Fut, E>(
        &self,
        namespace: &str,
        keys: Vec<String>,
        ttl: Option<Duration>,
        loader: F,
    ) -> WarmReport
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
        E: Display,
    {
        let mut report = WarmReport::default();
        if self.mode == CacheMode::None {
            return report;
        }

        let loads = keys.into_iter().map(|key| {
            let fut = loader(key.clone());
            async move { (key, fut.await) }
        });
        for (key, loaded) in futures::future::join_all(loads).await {
            let stored = match loaded {
                Ok(value) => self.set(namespace, &key, value, ttl).await,
                Err(err) => Err(CacheError::Loader {
                    namespace: namespace.to_string(),
                    key: key.clone(),
                    message: err.to_string(),
                }),
            };
            match stored {
                Ok(()) => report.warmed.push(qualified_key(namespace, &key)),
                Err(err) => {
                    tracing::warn!(namespace, key = %key, error = %err, "cache warm failed");
                    report.failed.push(err);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FileCacheBackend;
    use tempfile::TempDir;

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = CacheCoordinator::disabled();
        cache.set("static", "a.css", b"x".to_vec(), None).await.unwrap();
        assert!(cache.get("static", "a.css").await.unwrap().is_none());
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 1 });
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let cache = CacheCoordinator::in_memory();
        cache.set("static", "k", b"static".to_vec(), None).await.unwrap();
        cache.set("templates", "k", b"tpl".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("static", "k").await.unwrap().unwrap(), b"static");
        assert_eq!(cache.get("templates", "k").await.unwrap().unwrap(), b"tpl");

        let removed = cache.invalidate("static", Invalidation::All).await.unwrap();
        assert_eq!(removed, vec!["static:k".to_string()]);
        assert!(cache.get("templates", "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_on_read() {
        let cache = CacheCoordinator::in_memory();
        cache
            .set("responses", "r", b"body".to_vec(), Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(cache.get("responses", "r").await.unwrap().is_none());
        assert!(cache.memory.read().await.is_empty());
    }

    #[tokio::test]
    async fn invalidate_keys_reports_qualified_names() {
        let cache = CacheCoordinator::in_memory();
        cache.set("static", "a.css", b"a".to_vec(), None).await.unwrap();
        let keys = cache
            .invalidate(
                "static",
                Invalidation::Keys(vec!["a.css".to_string(), "b.js".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(keys, vec!["static:a.css", "static:b.js"]);
        assert!(cache.get("static", "a.css").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn warm_is_best_effort() {
        let cache = CacheCoordinator::in_memory();
        let report = cache
            .warm(
                "static",
                vec!["ok.css".to_string(), "broken.css".to_string()],
                Some(Duration::from_secs(60)),
                |key| async move {
                    if key == "broken.css" {
                        Err("disk on fire")
                    } else {
                        Ok(format!("/* {key} */").into_bytes())
                    }
                },
            )
            .await;
        assert_eq!(report.warmed, vec!["static:ok.css"]);
        assert_eq!(report.failed.len(), 1);
        assert!(cache.get("static", "broken.css").await.unwrap().is_none());
        assert!(cache.get("static", "ok.css").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn json_helpers_roundtrip() {
        let cache = CacheCoordinator::in_memory();
        cache
            .set_json("discovery", "routes", &vec!["/users", "/posts"], None)
            .await
            .unwrap();
        let loaded: Vec<String> = cache.get_json("discovery", "routes").await.unwrap().unwrap();
        assert_eq!(loaded, vec!["/users", "/posts"]);
    }

    #[tokio::test]
    async fn persistent_entries_survive_a_new_coordinator() {
        let tmp = TempDir::new().unwrap();
        let first = CacheCoordinator::persistent(Arc::new(FileCacheBackend::new(tmp.path())));
        first
            .set("static", "app.css", b"body{}".to_vec(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        drop(first);

        let second = CacheCoordinator::persistent(Arc::new(FileCacheBackend::new(tmp.path())));
        let entry = second.entry("static", "app.css").await.unwrap().unwrap();
        assert_eq!(entry.value, b"body{}");
        assert!(entry.ttl_remaining().unwrap() > Duration::from_secs(3500));
    }
}
