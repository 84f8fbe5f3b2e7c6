//! Local side of a sync: a base directory read and written through tokio.
//!
//! Writes follow the atomic protocol:
//!
//! 1. Ensure the parent directory exists.
//! 2. Write the bytes to `<path>.keystone.tmp`.
//! 3. Rename onto the final path (atomic on POSIX).
//! 4. On rename failure remove the tmp file and surface the error.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use globset::GlobSet;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use keystone_core::FileState;

use crate::error::{io_err, SyncError};

const TMP_SUFFIX: &str = ".keystone.tmp";
const BACKUP_MARKER: &str = ".backup-";

/// SHA-256 hex digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// `<path>.backup-<stamp>`, kept next to the original.
pub fn backup_path(relative: &str, stamp: &str) -> String {
    format!("{relative}{BACKUP_MARKER}{stamp}")
}

/// Backups and in-flight tmp files never take part in a sync.
pub fn is_sync_artifact(relative: &str) -> bool {
    let name = relative.rsplit('/').next().unwrap_or(relative);
    name.contains(BACKUP_MARKER) || name.ends_with(TMP_SUFFIX)
}

/// Relative paths must stay under their base: no `..`, root or drive
/// prefix, and at least one normal segment.
pub fn check_relative(relative: &str) -> Result<(), SyncError> {
    let unsafe_path = || SyncError::UnsafePath {
        path: relative.to_string(),
    };
    if relative.split(['/', '\\']).any(|part| part == "..") {
        return Err(unsafe_path());
    }
    let mut normal = 0;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path())
            }
        }
    }
    if normal == 0 {
        return Err(unsafe_path());
    }
    Ok(())
}

/// Join `/`-separated `relative` onto `base` after [`check_relative`].
pub(crate) fn join_relative(base: &Path, relative: &str) -> Result<PathBuf, SyncError> {
    check_relative(relative)?;
    Ok(relative
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .fold(base.to_path_buf(), |acc, part| acc.join(part)))
}

/// ISO 8601 basic-format UTC stamp used in backup names.
pub fn backup_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

/// A base directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, relative: &str) -> Result<PathBuf, SyncError> {
        join_relative(&self.root, relative)
    }

    pub async fn read(&self, relative: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let path = self.path_of(relative)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(path, err)),
        }
    }

    /// Existence, mtime and content hash of `relative`.
    pub async fn stat(&self, relative: &str) -> Result<FileState, SyncError> {
        let path = self.path_of(relative)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(FileState::missing()),
            Err(err) => return Err(io_err(path, err)),
        };
        let mtime = meta.modified().map_err(|e| io_err(&path, e))?;
        let Some(bytes) = self.read(relative).await? else {
            return Ok(FileState::missing());
        };
        Ok(FileState::present(
            DateTime::<Utc>::from(mtime),
            content_hash(&bytes),
        ))
    }

    pub async fn write_atomic(&self, relative: &str, bytes: &[u8]) -> Result<(), SyncError> {
        let path = self.path_of(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }

        let tmp = PathBuf::from(format!("{}{TMP_SUFFIX}", path.display()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(&path, e));
        }
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote local file");
        Ok(())
    }

    /// Copy `relative` byte-for-byte to its backup name. Returns the backup's
    /// relative path, or `None` if there was nothing to back up.
    pub async fn backup(&self, relative: &str, stamp: &str) -> Result<Option<String>, SyncError> {
        let source = self.path_of(relative)?;
        let target_rel = backup_path(relative, stamp);
        let target = self.path_of(&target_rel)?;
        match tokio::fs::copy(&source, &target).await {
            Ok(_) => Ok(Some(target_rel)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(target, err)),
        }
    }

    /// Every regular file under the root matching `matcher`, as sorted
    /// `/`-separated relative paths. A missing root lists nothing.
    pub async fn list(&self, matcher: GlobSet) -> Result<Vec<String>, SyncError> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || walk(&root, &matcher)).await?
    }
}

fn walk(root: &Path, matcher: &GlobSet) -> Result<Vec<String>, SyncError> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let relative = rel.to_string_lossy().replace('\\', "/");
        if is_sync_artifact(&relative) {
            continue;
        }
        if crate::diff::matches(matcher, &relative) {
            out.push(relative);
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn artifacts_are_recognised_by_file_name() {
        assert!(is_sync_artifact("css/a.css.backup-20260101T000000.000Z"));
        assert!(is_sync_artifact("a.css.keystone.tmp"));
        assert!(!is_sync_artifact("backup-notes/a.css"));
    }

    #[test]
    fn stamp_is_iso_basic() {
        let t = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(backup_stamp(t), "20260304T050607.000Z");
    }

    #[tokio::test]
    async fn write_then_stat() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        store.write_atomic("nested/a.css", b"body{}").await.unwrap();

        let state = store.stat("nested/a.css").await.unwrap();
        assert!(state.exists);
        assert_eq!(state.hash.as_deref(), Some(content_hash(b"body{}").as_str()));
        assert!(!tmp.path().join("nested/a.css.keystone.tmp").exists());
        assert!(!store.stat("nope.css").await.unwrap().exists);
    }

    #[tokio::test]
    async fn backup_copies_bytes_alongside_original() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        store.write_atomic("a.css", b"old").await.unwrap();

        let backup = store.backup("a.css", "STAMP").await.unwrap().unwrap();
        assert_eq!(backup, "a.css.backup-STAMP");
        assert_eq!(std::fs::read(tmp.path().join(&backup)).unwrap(), b"old");
        assert!(store.backup("missing.css", "STAMP").await.unwrap().is_none());
    }

    #[test]
    fn relative_paths_cannot_leave_the_root() {
        for bad in ["../escape.txt", "a/../../b", "/etc/passwd", "..\\x", "", "./"] {
            assert!(
                matches!(check_relative(bad), Err(SyncError::UnsafePath { .. })),
                "accepted {bad:?}"
            );
        }
        assert!(check_relative("css/a.css").is_ok());
        assert!(check_relative("./a.css").is_ok());
    }

    #[tokio::test]
    async fn store_refuses_escaping_paths() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().join("root"));
        let err = store.write_atomic("../escape.txt", b"x").await.unwrap_err();
        assert!(matches!(err, SyncError::UnsafePath { .. }), "got: {err}");
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn list_skips_artifacts() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        store.write_atomic("a.css", b"a").await.unwrap();
        store.write_atomic("b/c.js", b"c").await.unwrap();
        store.backup("a.css", "X").await.unwrap();

        let all = store
            .list(crate::diff::build_matcher(&[]).unwrap())
            .await
            .unwrap();
        assert_eq!(all, vec!["a.css".to_string(), "b/c.js".to_string()]);
    }
}
