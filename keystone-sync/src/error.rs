//! Error types for keystone-sync.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use keystone_cache::CacheError;
use keystone_core::{BatchError, ConfigError, ConflictRecord, Fault, FaultKind};

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid strategy: {0}")]
    Config(#[from] ConfigError),

    /// A local filesystem error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The storage backend could not serve a request.
    #[error("storage backend unavailable for bucket '{bucket}': {message}")]
    Backend { bucket: String, message: String },

    /// Settings content did not parse; the file was not applied.
    #[error("invalid settings file {path}: {message}")]
    Validation { path: String, message: String },

    /// A relative path that would resolve outside its base directory.
    #[error("unsafe relative path '{path}'")]
    UnsafePath { path: String },

    /// `MANUAL` conflicts were left for an operator.
    #[error("{} unresolved conflict(s): {}", records.len(), describe(records))]
    Conflict { records: Vec<ConflictRecord> },

    /// `FAIL_FAST`: the first failing unit aborted the run.
    #[error("sync aborted by '{label}': {source}")]
    Aborted {
        label: String,
        #[source]
        source: Box<SyncError>,
    },

    /// `FAIL_FAST`: the run exceeded its timeout.
    #[error("sync timed out after {elapsed:?} with {} unit(s) unfinished", pending.len())]
    Timeout {
        elapsed: Duration,
        pending: Vec<String>,
    },

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("config reload failed: {0}")]
    Reload(String),
}

fn describe(records: &[ConflictRecord]) -> String {
    records
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Fault for SyncError {
    fn kind(&self) -> FaultKind {
        match self {
            SyncError::Config(_)
            | SyncError::Validation { .. }
            | SyncError::UnsafePath { .. }
            | SyncError::Pattern(_) => FaultKind::Validation,
            SyncError::Io { .. } | SyncError::Walk(_) | SyncError::Join(_) => FaultKind::Transfer,
            SyncError::Backend { .. } | SyncError::Reload(_) => FaultKind::BackendUnavailable,
            SyncError::Conflict { .. } => FaultKind::Conflict,
            SyncError::Aborted { source, .. } => source.kind(),
            SyncError::Timeout { .. } => FaultKind::Timeout,
            SyncError::Cache(err) => err.kind(),
        }
    }
}

impl From<BatchError<SyncError>> for SyncError {
    fn from(err: BatchError<SyncError>) -> Self {
        match err {
            BatchError::Aborted { label, source } => SyncError::Aborted {
                label,
                source: Box::new(source),
            },
            BatchError::TimedOut { elapsed, pending } => SyncError::Timeout { elapsed, pending },
        }
    }
}

/// A recoverable per-item failure recorded in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// Relative path, or `None` for run-level steps such as config reload.
    pub path: Option<String>,
    pub kind: FaultKind,
    pub message: String,
}

impl ItemError {
    pub(crate) fn new(path: Option<String>, err: &SyncError) -> Self {
        Self {
            path,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
