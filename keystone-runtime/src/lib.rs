//! Composition root: loads `~/.keystone/config.yaml`, installs tracing and
//! wires the cache, discovery engine and sync engine into a [`Runtime`].

pub mod config;
mod error;
pub mod paths;
mod runtime;
pub mod telemetry;

pub use config::{CacheSettings, LogSettings, RemoteSettings, RuntimeConfig, SyncJobs};
pub use error::RuntimeError;
pub use runtime::{load_config, run, start_blocking, RunSummary, Runtime, SyncSummary};
