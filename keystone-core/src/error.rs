//! Error types for keystone-core.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can arise while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, with the path that was being accessed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// Structurally valid but semantically unusable values.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

/// The failure taxonomy shared by every engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Structured config content did not parse.
    Validation,
    /// A conflict was left unresolved.
    Conflict,
    /// I/O failure mid-copy.
    Transfer,
    /// Remote storage or cache backend unreachable.
    BackendUnavailable,
    /// The batch exceeded its time budget.
    Timeout,
    /// A declared source does not exist; skipped.
    SourceNotFound,
}

impl FaultKind {
    /// Only transfer and backend failures are worth retrying.
    pub fn is_transient(self) -> bool {
        matches!(self, FaultKind::Transfer | FaultKind::BackendUnavailable)
    }
}

/// An error that knows where it sits in the [`FaultKind`] taxonomy.
///
/// The scheduler uses this to decide whether a failed unit is retried.
pub trait Fault: std::error::Error + Send + 'static {
    fn kind(&self) -> FaultKind;

    fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

/// Batch-level failures raised by [`crate::scheduler::run`].
#[derive(Debug, Error)]
pub enum BatchError<E>
where
    E: std::error::Error + 'static,
{
    /// `FAIL_FAST`: the first terminal failure aborted the batch.
    #[error("batch aborted by '{label}': {source}")]
    Aborted {
        label: String,
        #[source]
        source: E,
    },

    /// `FAIL_FAST`: the batch ran past its timeout.
    #[error("batch timed out after {elapsed:?} with {} unit(s) unfinished", pending.len())]
    TimedOut {
        elapsed: Duration,
        pending: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transfer_and_backend_faults_are_transient() {
        let transient: Vec<_> = [
            FaultKind::Validation,
            FaultKind::Conflict,
            FaultKind::Transfer,
            FaultKind::BackendUnavailable,
            FaultKind::Timeout,
            FaultKind::SourceNotFound,
        ]
        .into_iter()
        .filter(|k| k.is_transient())
        .collect();
        assert_eq!(
            transient,
            vec![FaultKind::Transfer, FaultKind::BackendUnavailable]
        );
    }
}
