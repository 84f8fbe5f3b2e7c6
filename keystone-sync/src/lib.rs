//! # keystone-sync
//!
//! Keeps a local directory, a remote [`StorageBackend`] bucket and the cache
//! consistent for templates, settings and static assets.
//!
//! - [`engine`]: [`SyncEngine`], [`SyncRequest`] and the phase machine
//! - [`diff`]: candidate listing, state reads, dry-run previews
//! - [`transfer`]: per-path copy with snapshot and settings validation
//! - [`local`]: atomic local writes, backups, hashing
//! - [`backend`]: [`StorageBackend`], [`ConfigReload`], [`FsBackend`]
//! - [`report`]: [`SyncReport`] and friends

pub mod backend;
pub mod diff;
pub mod engine;
pub mod error;
pub mod local;
pub mod report;
pub mod transfer;

pub use backend::{ConfigReload, FsBackend, RemoteStat, StorageBackend};
pub use engine::{SyncEngine, SyncRequest, STATIC_CACHE_TTL};
pub use error::{ItemError, SyncError};
pub use local::{content_hash, LocalStore};
pub use report::{BackupRecord, PlannedAction, SyncPhase, SyncReport, TransferKind};
pub use transfer::validate_settings;
