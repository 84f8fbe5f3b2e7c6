//! External capabilities consumed by the sync engine.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use keystone_core::Bucket;

use crate::error::SyncError;
use crate::local::{check_relative, content_hash, is_sync_artifact, join_relative};

/// Remote metadata for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStat {
    pub mtime: DateTime<Utc>,
    /// Backends that do not track content hashes return `None`; the engine
    /// then hashes the fetched bytes.
    pub hash: Option<String>,
}

/// Remote storage scoped per named bucket. Keys are `/`-separated relative
/// paths.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, bucket: &Bucket, key: &str) -> Result<Option<Vec<u8>>, SyncError>;

    async fn put(&self, bucket: &Bucket, key: &str, bytes: Vec<u8>) -> Result<(), SyncError>;

    async fn stat(&self, bucket: &Bucket, key: &str) -> Result<Option<RemoteStat>, SyncError>;

    /// Every key starting with `prefix`, sorted.
    async fn list(&self, bucket: &Bucket, prefix: &str) -> Result<Vec<String>, SyncError>;
}

/// No-argument signal invoked after settings changed.
#[async_trait]
pub trait ConfigReload: Send + Sync {
    async fn reload(&self) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// FsBackend
// ---------------------------------------------------------------------------

/// Directory-backed storage: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, bucket: &Bucket, key: &str) -> Result<PathBuf, SyncError> {
        check_relative(&bucket.0)?;
        join_relative(&self.root.join(&bucket.0), key)
    }

    fn unavailable(bucket: &Bucket, path: &Path, err: std::io::Error) -> SyncError {
        SyncError::Backend {
            bucket: bucket.0.clone(),
            message: format!("{}: {err}", path.display()),
        }
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn get(&self, bucket: &Bucket, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let path = self.path_of(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::unavailable(bucket, &path, err)),
        }
    }

    async fn put(&self, bucket: &Bucket, key: &str, bytes: Vec<u8>) -> Result<(), SyncError> {
        let path = self.path_of(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::unavailable(bucket, parent, e))?;
        }
        let tmp = PathBuf::from(format!("{}.keystone.tmp", path.display()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Self::unavailable(bucket, &tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Self::unavailable(bucket, &path, e));
        }
        Ok(())
    }

    async fn stat(&self, bucket: &Bucket, key: &str) -> Result<Option<RemoteStat>, SyncError> {
        let path = self.path_of(bucket, key)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Self::unavailable(bucket, &path, err)),
        };
        let mtime = meta
            .modified()
            .map_err(|e| Self::unavailable(bucket, &path, e))?;
        let hash = match self.get(bucket, key).await? {
            Some(bytes) => Some(content_hash(&bytes)),
            None => return Ok(None),
        };
        Ok(Some(RemoteStat {
            mtime: DateTime::<Utc>::from(mtime),
            hash,
        }))
    }

    async fn list(&self, bucket: &Bucket, prefix: &str) -> Result<Vec<String>, SyncError> {
        check_relative(&bucket.0)?;
        let dir = self.root.join(&bucket.0);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let prefix = prefix.to_string();
        let bucket_name = bucket.0.clone();
        tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            for entry in WalkDir::new(&dir) {
                let entry = entry.map_err(|e| SyncError::Backend {
                    bucket: bucket_name.clone(),
                    message: e.to_string(),
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry.path().strip_prefix(&dir).unwrap_or(entry.path());
                let key = rel.to_string_lossy().replace('\\', "/");
                if key.starts_with(&prefix) && !key.ends_with(".keystone.tmp") {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok::<_, SyncError>(keys)
        })
        .await?
    }
}

/// Keys the engine should consider: listed and not a backup or tmp file.
pub(crate) fn syncable(keys: Vec<String>) -> impl Iterator<Item = String> {
    keys.into_iter().filter(|k| !is_sync_artifact(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_get_stat_list() {
        let tmp = TempDir::new().unwrap();
        let backend = FsBackend::new(tmp.path());
        let bucket = Bucket::from("static");

        backend.put(&bucket, "css/app.css", b"body{}".to_vec()).await.unwrap();
        backend.put(&bucket, "logo.png", vec![0x89, 0x50]).await.unwrap();

        assert_eq!(
            backend.get(&bucket, "css/app.css").await.unwrap().unwrap(),
            b"body{}"
        );
        let stat = backend.stat(&bucket, "css/app.css").await.unwrap().unwrap();
        assert_eq!(stat.hash, Some(content_hash(b"body{}")));
        assert!(backend.stat(&bucket, "nope").await.unwrap().is_none());

        let all = backend.list(&bucket, "").await.unwrap();
        assert_eq!(all, vec!["css/app.css".to_string(), "logo.png".to_string()]);
        let css = backend.list(&bucket, "css/").await.unwrap();
        assert_eq!(css, vec!["css/app.css".to_string()]);
    }

    #[tokio::test]
    async fn buckets_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let backend = FsBackend::new(tmp.path());
        backend
            .put(&Bucket::from("templates"), "a.html", b"t".to_vec())
            .await
            .unwrap();
        assert!(backend.list(&Bucket::from("static"), "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_cannot_leave_the_bucket() {
        let tmp = TempDir::new().unwrap();
        let backend = FsBackend::new(tmp.path().join("remote"));
        let bucket = Bucket::from("static");

        let err = backend
            .put(&bucket, "../templates/base.html", b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnsafePath { .. }), "got: {err}");
        assert!(!tmp.path().join("remote/templates/base.html").exists());
        assert!(backend.get(&Bucket::from(".."), "a.css").await.is_err());
    }
}
