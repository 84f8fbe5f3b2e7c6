//! Persistent cache backends.
//!
//! [`FileCacheBackend`] stores one JSON document per key at
//! `<root>/<namespace>/<sha256(key)>.json`. Writes go to `<file>.tmp` and are
//! renamed into place, so readers never observe a half-written entry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{io_err, CacheError};

/// A single cached value. Owned by the coordinator; callers get clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub namespace: String,
    pub key: String,
    #[serde(with = "hex")]
    pub value: Vec<u8>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    /// Remaining lifetime, or `None` for entries without a TTL.
    pub fn ttl_remaining(&self) -> Option<std::time::Duration> {
        self.expires_at
            .map(|at| (at - Utc::now()).to_std().unwrap_or_default())
    }
}

/// External cache capability used in persistent mode.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError>;

    /// Remove every entry in `namespace`, returning the removed keys.
    async fn clear(&self, namespace: &str) -> Result<Vec<String>, CacheError>;
}

/// Directory-backed persistent cache; survives process restarts.
#[derive(Debug, Clone)]
pub struct FileCacheBackend {
    root: PathBuf,
}

impl FileCacheBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.namespace_dir(namespace).join(format!("{digest}.json"))
    }
}

async fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

#[async_trait]
impl CacheBackend for FileCacheBackend {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        read_entry(&self.entry_path(namespace, key)).await
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let dir = self.namespace_dir(&entry.namespace);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_err(&dir, e))?;

        let path = self.entry_path(&entry.namespace, &entry.key);
        let json = serde_json::to_vec(&entry)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(&path, e));
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let path = self.entry_path(namespace, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_err(&path, err)),
        }
    }

    async fn clear(&self, namespace: &str) -> Result<Vec<String>, CacheError> {
        let dir = self.namespace_dir(namespace);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&dir, err)),
        };

        let mut removed = Vec::new();
        while let Some(dir_entry) = entries.next_entry().await.map_err(|e| io_err(&dir, e))? {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(entry) = read_entry(&path).await? {
                removed.push(entry.key);
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(&path, err)),
            }
        }
        removed.sort();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(namespace: &str, key: &str, value: &[u8]) -> CacheEntry {
        CacheEntry {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: value.to_vec(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn missing_entry_is_none() {
        let tmp = TempDir::new().unwrap();
        let backend = FileCacheBackend::new(tmp.path());
        assert!(backend.get("static", "nope.css").await.unwrap().is_none());
        assert!(!backend.delete("static", "nope.css").await.unwrap());
    }

    #[tokio::test]
    async fn roundtrip_and_tmp_cleanup() {
        let tmp = TempDir::new().unwrap();
        let backend = FileCacheBackend::new(tmp.path());
        backend.set(entry("static", "app.css", b"body{}")).await.unwrap();

        let loaded = backend.get("static", "app.css").await.unwrap().unwrap();
        assert_eq!(loaded.value, b"body{}");

        let path = backend.entry_path("static", "app.css");
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn clear_only_touches_one_namespace() {
        let tmp = TempDir::new().unwrap();
        let backend = FileCacheBackend::new(tmp.path());
        backend.set(entry("static", "a.css", b"a")).await.unwrap();
        backend.set(entry("static", "b.js", b"b")).await.unwrap();
        backend.set(entry("templates", "base.html", b"t")).await.unwrap();

        let removed = backend.clear("static").await.unwrap();
        assert_eq!(removed, vec!["a.css".to_string(), "b.js".to_string()]);
        assert!(backend.get("templates", "base.html").await.unwrap().is_some());
    }
}
