//! Source expansion: every declared source becomes zero or more concrete
//! candidates for a loader.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use keystone_core::{ErrorMode, FaultKind, SourceDescriptor, SourceKind, SourceName};

use crate::error::GatherError;
use crate::report::SourceError;

/// One concrete thing a loader is asked to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub source: SourceName,
    pub priority: u32,
    /// The source's root; [`Candidate::relative_name`] is computed against it.
    pub root: PathBuf,
    pub path: PathBuf,
}

impl Candidate {
    /// `/`-separated path relative to the source root.
    pub fn relative_name(&self) -> String {
        let rel = self.path.strip_prefix(&self.root).unwrap_or(&self.path);
        normalize_name(rel)
    }

    /// Scheduler label, unique within one discovery call.
    pub fn label(&self) -> String {
        format!("{}:{}", self.source, self.relative_name())
    }
}

fn normalize_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Result of expanding every source of one call.
#[derive(Debug, Default)]
pub struct Expansion {
    /// Ordered by (priority, declaration order, path).
    pub candidates: Vec<Candidate>,
    /// Directory sources whose location does not exist.
    pub skipped: Vec<SourceName>,
    /// Walk failures, one per unreadable entry. Empty under `IGNORE_ERRORS`.
    pub failed: Vec<SourceError>,
}

/// Files found by one walk plus the entries that could not be read.
#[derive(Debug, Default)]
pub(crate) struct Walked {
    pub files: Vec<PathBuf>,
    pub errors: Vec<walkdir::Error>,
}

pub(crate) fn build_matcher(patterns: &[String]) -> Result<GlobSet, GatherError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Walk `root` and return every file matching `matcher`, sorted by path.
/// An empty matcher accepts every file. Unreadable entries are collected
/// and the walk carries on past them.
pub(crate) fn walk_matching(root: &Path, matcher: &GlobSet) -> Walked {
    let mut walked = Walked::default();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                walked.errors.push(err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(path);
        let accepted = matcher.is_empty()
            || matcher.is_match(rel)
            || entry.file_name().to_str().is_some_and(|n| matcher.is_match(n));
        if accepted {
            walked.files.push(path.to_path_buf());
        }
    }
    walked.files.sort();
    walked
}

/// Expand `sources` into candidates. Directory walks run on the blocking
/// pool. Source-level patterns override the call-level ones.
///
/// A failed walk only costs the entries it could not read; under
/// `FAIL_FAST` the first one aborts the call.
pub async fn expand(
    sources: &[SourceDescriptor],
    patterns: &[String],
    mode: ErrorMode,
) -> Result<Expansion, GatherError> {
    let mut ordered: Vec<&SourceDescriptor> = sources.iter().collect();
    ordered.sort_by_key(|s| s.priority);

    let mut out = Expansion::default();
    for source in ordered {
        match source.kind {
            SourceKind::Adapter => {
                let root = source
                    .location
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                out.candidates.push(Candidate {
                    source: source.name.clone(),
                    priority: source.priority,
                    root,
                    path: source.location.clone(),
                });
            }
            SourceKind::Directory => {
                let root = source.location.clone();
                if !tokio::fs::try_exists(&root).await.unwrap_or(false) {
                    tracing::warn!(
                        source = %source.name,
                        location = %root.display(),
                        "source not found, skipping"
                    );
                    out.skipped.push(source.name.clone());
                    continue;
                }

                let globs = if source.patterns.is_empty() {
                    patterns
                } else {
                    source.patterns.as_slice()
                };
                let matcher = build_matcher(globs)?;
                let walk_root = root.clone();
                let walked =
                    tokio::task::spawn_blocking(move || walk_matching(&walk_root, &matcher))
                        .await?;

                for err in walked.errors {
                    tracing::warn!(source = %source.name, error = %err, "walk failed");
                    match mode {
                        ErrorMode::FailFast => return Err(GatherError::Walk(err)),
                        ErrorMode::IgnoreErrors => {}
                        ErrorMode::CollectErrors | ErrorMode::PartialSuccess => {
                            let path = err.path().map_or_else(|| root.clone(), Path::to_path_buf);
                            out.failed.push(SourceError {
                                source: source.name.0.clone(),
                                path: Some(path),
                                kind: FaultKind::Transfer,
                                message: err.to_string(),
                            });
                        }
                    }
                }

                tracing::debug!(
                    source = %source.name,
                    files = walked.files.len(),
                    "expanded source"
                );
                out.candidates.extend(walked.files.into_iter().map(|path| Candidate {
                    source: source.name.clone(),
                    priority: source.priority,
                    root: root.clone(),
                    path,
                }));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn walk_filters_by_name_and_relative_path() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "routes.yaml");
        touch(tmp.path(), "api/routes.yaml");
        touch(tmp.path(), "api/readme.md");

        let matcher = build_matcher(&["routes.yaml".to_string()]).unwrap();
        let files = walk_matching(tmp.path(), &matcher).files;
        assert_eq!(
            files,
            vec![tmp.path().join("api/routes.yaml"), tmp.path().join("routes.yaml")]
        );
    }

    #[test]
    fn empty_matcher_accepts_everything() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.txt");
        touch(tmp.path(), "b/c.bin");
        let walked = walk_matching(tmp.path(), &build_matcher(&[]).unwrap());
        assert_eq!(walked.files.len(), 2);
        assert!(walked.errors.is_empty());
    }

    #[test]
    fn bad_glob_is_rejected() {
        assert!(matches!(
            build_matcher(&["[".to_string()]),
            Err(GatherError::Pattern(_))
        ));
    }

    #[tokio::test]
    async fn missing_directory_is_skipped_and_order_follows_priority() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("low"), "routes.yaml");
        touch(&tmp.path().join("high"), "routes.yaml");

        let sources = vec![
            SourceDescriptor::directory("low", tmp.path().join("low"), 5),
            SourceDescriptor::directory("gone", tmp.path().join("gone"), 0),
            SourceDescriptor::directory("high", tmp.path().join("high"), 1),
        ];
        let out = expand(&sources, &["routes.yaml".to_string()], ErrorMode::CollectErrors)
            .await
            .unwrap();

        assert_eq!(out.skipped, vec![SourceName::from("gone")]);
        let names: Vec<_> = out.candidates.iter().map(|c| c.source.0.as_str()).collect();
        assert_eq!(names, vec!["high", "low"]);
        assert_eq!(out.candidates[0].label(), "high:routes.yaml");
    }

    #[tokio::test]
    async fn adapter_yields_its_location() {
        let sources = vec![SourceDescriptor::adapter("pkg", "/opt/app/components.yaml", 2)];
        let out = expand(&sources, &[], ErrorMode::CollectErrors).await.unwrap();
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].relative_name(), "components.yaml");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_entries_are_recorded_per_source() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("good"), "routes.yaml");
        touch(&tmp.path().join("bad"), "routes.yaml");
        std::os::unix::fs::symlink(tmp.path().join("nowhere"), tmp.path().join("bad/dangling"))
            .unwrap();

        let sources = vec![
            SourceDescriptor::directory("bad", tmp.path().join("bad"), 0),
            SourceDescriptor::directory("good", tmp.path().join("good"), 1),
        ];
        let out = expand(&sources, &[], ErrorMode::CollectErrors).await.unwrap();

        let names: Vec<_> = out.candidates.iter().map(|c| c.source.0.as_str()).collect();
        assert_eq!(names, vec!["bad", "good"]);
        assert_eq!(out.failed.len(), 1);
        assert_eq!(out.failed[0].source, "bad");
        assert_eq!(out.failed[0].path, Some(tmp.path().join("bad/dangling")));

        let quiet = expand(&sources, &[], ErrorMode::IgnoreErrors).await.unwrap();
        assert!(quiet.failed.is_empty());
        assert_eq!(quiet.candidates.len(), 2);

        assert!(matches!(
            expand(&sources, &[], ErrorMode::FailFast).await,
            Err(GatherError::Walk(_))
        ));
    }
}
