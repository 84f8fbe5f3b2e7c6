//! DIFF phase: candidate collection, per-path state reads and classification,
//! plus unified-diff previews for dry runs.

use std::collections::BTreeSet;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use similar::TextDiff;

use keystone_classify::classify_item;
use keystone_core::scheduler::{self, Task};
use keystone_core::{Bucket, ErrorMode, Fault, FaultKind, FileState, StrategyConfig, SyncItem};

use crate::backend::{syncable, RemoteStat, StorageBackend};
use crate::error::{ItemError, SyncError};
use crate::local::{check_relative, content_hash, is_sync_artifact, LocalStore};

pub(crate) fn build_matcher(patterns: &[String]) -> Result<GlobSet, SyncError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Empty matchers accept everything; otherwise the relative path or the
/// bare file name must match.
pub(crate) fn matches(matcher: &GlobSet, relative: &str) -> bool {
    if matcher.is_empty() || matcher.is_match(relative) {
        return true;
    }
    let name = relative.rsplit('/').next().unwrap_or(relative);
    matcher.is_match(name)
}

/// Both sides of one run.
#[derive(Clone)]
pub(crate) struct Sides {
    pub local: LocalStore,
    pub backend: Arc<dyn StorageBackend>,
    pub bucket: Bucket,
}

impl Sides {
    /// Remote state, hashing fetched bytes when the backend has no hash.
    pub async fn remote_state(&self, key: &str) -> Result<FileState, SyncError> {
        match self.backend.stat(&self.bucket, key).await? {
            None => Ok(FileState::missing()),
            Some(RemoteStat {
                mtime,
                hash: Some(hash),
            }) => Ok(FileState::present(mtime, hash)),
            Some(RemoteStat { mtime, hash: None }) => {
                match self.backend.get(&self.bucket, key).await? {
                    Some(bytes) => Ok(FileState::present(mtime, content_hash(&bytes))),
                    None => Ok(FileState::missing()),
                }
            }
        }
    }
}

/// Union of local and remote paths under `prefix` matching `patterns`.
/// An explicit `paths` list replaces the listing.
pub(crate) async fn candidates(
    sides: &Sides,
    paths: &[String],
    patterns: &[String],
    prefix: &str,
) -> Result<Vec<String>, SyncError> {
    if !paths.is_empty() {
        for path in paths {
            check_relative(path)?;
        }
        let explicit: BTreeSet<String> = paths
            .iter()
            .filter(|p| !is_sync_artifact(p))
            .cloned()
            .collect();
        return Ok(explicit.into_iter().collect());
    }

    let matcher = build_matcher(patterns)?;
    let mut all: BTreeSet<String> = sides
        .local
        .list(matcher.clone())
        .await?
        .into_iter()
        .filter(|p| p.starts_with(prefix))
        .collect();
    let remote = sides.backend.list(&sides.bucket, prefix).await?;
    all.extend(
        syncable(remote)
            .filter(|k| match check_relative(k) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(bucket = %sides.bucket, error = %err, "skipping remote key");
                    false
                }
            })
            .filter(|k| matches(&matcher, k)),
    );
    Ok(all.into_iter().collect())
}

/// Read both sides of every path through the scheduler and classify.
///
/// Items come back sorted by path. Backend unavailability aborts; other
/// per-path failures are returned as [`ItemError`]s.
pub(crate) async fn build_items(
    sides: &Sides,
    paths: Vec<String>,
    cfg: &StrategyConfig,
) -> Result<(Vec<SyncItem>, Vec<ItemError>), SyncError> {
    let tasks: Vec<Task<SyncItem, SyncError>> = paths
        .into_iter()
        .map(|path| {
            let sides = sides.clone();
            Task::new(path.clone(), move || {
                let sides = sides.clone();
                let path = path.clone();
                async move {
                    let (local_state, remote_state) =
                        tokio::try_join!(sides.local.stat(&path), sides.remote_state(&path))?;
                    let classification = classify_item(&local_state, &remote_state);
                    Ok(SyncItem {
                        relative_path: path,
                        local_state,
                        remote_state,
                        classification,
                    })
                }
            })
        })
        .collect();

    let settled = run_units(tasks, cfg).await?;
    if let Some(outage) = settled.outage {
        return Err(outage);
    }
    let mut items = settled.ok;
    items.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok((items, settled.errors))
}

/// What a batch of sync units left behind.
pub(crate) struct Settled<T> {
    pub ok: Vec<T>,
    pub errors: Vec<ItemError>,
    /// First backend outage seen; the caller must surface it.
    pub outage: Option<SyncError>,
}

/// Run sync units under `cfg`, keeping backend outages visible.
///
/// `IGNORE_ERRORS` batches run as `COLLECT_ERRORS` so an outage is never
/// dropped by the scheduler; the remaining failures are discarded here.
pub(crate) async fn run_units<T: Send + 'static>(
    tasks: Vec<Task<T, SyncError>>,
    cfg: &StrategyConfig,
) -> Result<Settled<T>, SyncError> {
    let ignore = cfg.error_mode == ErrorMode::IgnoreErrors;
    let batch = if ignore {
        let collect = cfg.clone().with_error_mode(ErrorMode::CollectErrors);
        scheduler::run(tasks, &collect).await?
    } else {
        scheduler::run(tasks, cfg).await?
    };

    let timed_out = batch.timed_out.clone();
    let (ok, failed) = batch.partition();
    let mut settled = Settled {
        ok: ok.into_iter().map(|(_, value)| value).collect(),
        errors: Vec::with_capacity(failed.len()),
        outage: None,
    };
    for (label, err) in failed {
        if err.kind() == FaultKind::BackendUnavailable {
            settled.outage.get_or_insert(err);
        } else {
            settled.errors.push(ItemError::new(Some(label), &err));
        }
    }
    settled.errors.extend(timed_out.into_iter().map(timeout_error));
    if ignore {
        settled.errors.clear();
    }
    Ok(settled)
}

fn timeout_error(path: String) -> ItemError {
    ItemError {
        message: format!("'{path}' did not finish before the timeout"),
        path: Some(path),
        kind: FaultKind::Timeout,
    }
}

/// Unified diff from the local to the remote version, when both are text.
pub fn preview(path: &str, local: &[u8], remote: &[u8]) -> Option<String> {
    let local = std::str::from_utf8(local).ok()?;
    let remote = std::str::from_utf8(remote).ok()?;
    let old_header = format!("local/{path}");
    let new_header = format!("remote/{path}");
    Some(
        TextDiff::from_lines(local, remote)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matcher_accepts_nested_names() {
        let m = build_matcher(&["*.css".to_string()]).unwrap();
        assert!(matches(&m, "a.css"));
        assert!(matches(&m, "deep/dir/a.css"));
        assert!(!matches(&m, "a.js"));
        assert!(matches(&build_matcher(&[]).unwrap(), "anything.bin"));
    }

    #[test]
    fn preview_shows_both_sides() {
        let diff = preview("a.css", b"body{color:red}\n", b"body{color:blue}\n").unwrap();
        assert!(diff.contains("--- local/a.css"));
        assert!(diff.contains("+++ remote/a.css"));
        assert!(diff.contains("-body{color:red}"));
        assert!(diff.contains("+body{color:blue}"));
    }

    #[test]
    fn binary_content_has_no_preview() {
        assert!(preview("logo.png", &[0xff, 0xfe], b"x").is_none());
    }

    #[tokio::test]
    async fn outages_survive_ignore_errors() {
        let units = || {
            vec![
                Task::new("a.yaml", || async {
                    Err::<(), _>(SyncError::Validation {
                        path: "a.yaml".into(),
                        message: "bad".into(),
                    })
                }),
                Task::new("b.css", || async {
                    Err::<(), _>(SyncError::Backend {
                        bucket: "static".into(),
                        message: "down".into(),
                    })
                }),
                Task::new("c.css", || async { Ok(()) }),
            ]
        };

        let collect = StrategyConfig::sequential();
        let settled = run_units(units(), &collect).await.unwrap();
        assert_eq!(settled.ok.len(), 1);
        assert_eq!(settled.errors.len(), 1);
        assert_eq!(settled.errors[0].kind, FaultKind::Validation);
        assert!(settled.outage.is_some());

        let ignore = StrategyConfig::sequential().with_error_mode(ErrorMode::IgnoreErrors);
        let settled = run_units(units(), &ignore).await.unwrap();
        assert!(settled.errors.is_empty());
        assert!(matches!(settled.outage, Some(SyncError::Backend { .. })));
    }
}
