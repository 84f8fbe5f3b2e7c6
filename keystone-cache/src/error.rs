//! Error types for keystone-cache.

use std::path::PathBuf;

use thiserror::Error;

use keystone_core::{Fault, FaultKind};

/// All errors that can arise from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The persistent backend could not be reached.
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    /// An I/O error in a file-backed cache, with annotated path for context.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored entry could not be encoded or decoded.
    #[error("cache JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A warm loader failed; the key stays absent.
    #[error("warm loader failed for {namespace}:{key}: {message}")]
    Loader {
        namespace: String,
        key: String,
        message: String,
    },
}

impl Fault for CacheError {
    fn kind(&self) -> FaultKind {
        match self {
            CacheError::Unavailable(_) | CacheError::Io { .. } => FaultKind::BackendUnavailable,
            CacheError::Json(_) => FaultKind::Validation,
            CacheError::Loader { .. } => FaultKind::Transfer,
        }
    }
}

/// Convenience constructor for [`CacheError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.into(),
        source,
    }
}
