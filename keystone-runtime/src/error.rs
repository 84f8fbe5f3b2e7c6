use std::path::PathBuf;

use thiserror::Error;

/// Error surface for runtime assembly, config handling and job runs.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] keystone_core::ConfigError),

    #[error("discovery error: {0}")]
    Gather(#[from] keystone_gather::GatherError),

    #[error("sync error: {0}")]
    Sync(#[from] keystone_sync::SyncError),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RuntimeError {
    RuntimeError::Io {
        path: path.into(),
        source,
    }
}
