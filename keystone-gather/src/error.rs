//! Error types for keystone-gather.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use keystone_core::{BatchError, ConfigError, Domain, Fault, FaultKind};

/// A failure loading one candidate. Recoverable unless the batch runs
/// `FAIL_FAST`.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("load io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The candidate was read but its contents are malformed.
    #[error("invalid manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Tera rejected the template.
    #[error("template error in {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: tera::Error,
    },

    /// An adapter could not reach what it refers to.
    #[error("adapter '{reference}' unavailable: {message}")]
    Unavailable { reference: String, message: String },
}

impl Fault for LoadError {
    fn kind(&self) -> FaultKind {
        match self {
            LoadError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                FaultKind::SourceNotFound
            }
            LoadError::Io { .. } => FaultKind::Transfer,
            LoadError::Parse { .. } | LoadError::Template { .. } => FaultKind::Validation,
            LoadError::Unavailable { .. } => FaultKind::BackendUnavailable,
        }
    }
}

/// Call-level failures of a discovery run.
#[derive(Debug, Error)]
pub enum GatherError {
    #[error("invalid strategy: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("no loader registered for {0}")]
    NoLoader(Domain),

    /// `FAIL_FAST`: the first failing candidate aborted the run.
    #[error("discovery aborted by '{label}': {source}")]
    Aborted {
        label: String,
        #[source]
        source: LoadError,
    },

    /// `FAIL_FAST`: the run exceeded its timeout.
    #[error("discovery timed out after {elapsed:?}")]
    Timeout {
        elapsed: Duration,
        pending: Vec<String>,
    },

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<BatchError<LoadError>> for GatherError {
    fn from(err: BatchError<LoadError>) -> Self {
        match err {
            BatchError::Aborted { label, source } => GatherError::Aborted { label, source },
            BatchError::TimedOut { elapsed, pending } => GatherError::Timeout { elapsed, pending },
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LoadError {
    LoadError::Io {
        path: path.into(),
        source,
    }
}
