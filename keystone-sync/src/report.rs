use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use keystone_core::{ConflictRecord, Domain, ErrorMode, Side};

use crate::error::ItemError;

/// Sync state machine. A run moves strictly forward; `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Init,
    Diff,
    Resolve,
    Transfer,
    Invalidate,
    Done,
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Init => "init",
            SyncPhase::Diff => "diff",
            SyncPhase::Resolve => "resolve",
            SyncPhase::Transfer => "transfer",
            SyncPhase::Invalidate => "invalidate",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Direction of one copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Local to remote.
    Push,
    /// Remote to local.
    Pull,
}

impl TransferKind {
    /// The side being overwritten.
    pub fn destination(self) -> Side {
        match self {
            TransferKind::Push => Side::Remote,
            TransferKind::Pull => Side::Local,
        }
    }

    pub fn source(self) -> Side {
        self.destination().opposite()
    }

    pub(crate) fn toward(destination: Side) -> Self {
        match destination {
            Side::Remote => TransferKind::Push,
            Side::Local => TransferKind::Pull,
        }
    }
}

/// One copy the run performs, or would perform in a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub path: String,
    pub kind: TransferKind,
    /// The destination is snapshotted before being overwritten.
    pub backup: bool,
}

/// A byte-for-byte snapshot taken before an overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub side: Side,
    pub original: String,
    pub backup: String,
}

/// Everything one sync run did (or, in a dry run, would do).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub domain: Domain,
    /// Relative paths transferred, sorted.
    pub synced_items: Vec<String>,
    pub conflicts: Vec<ConflictRecord>,
    pub backed_up: Vec<BackupRecord>,
    /// Qualified `namespace:key` strings.
    pub cache_invalidated: Vec<String>,
    /// Qualified keys warmed; always a subset of `cache_invalidated`.
    pub cache_warmed: Vec<String>,
    pub cacheable_assets: Vec<String>,
    pub non_cacheable_assets: Vec<String>,
    pub planned: Vec<PlannedAction>,
    pub errors: Vec<ItemError>,
    pub config_reloaded: bool,
    pub dry_run: bool,
    pub phase: SyncPhase,
    pub error_mode: ErrorMode,
    pub elapsed: Duration,
}

impl SyncReport {
    pub fn new(domain: Domain, dry_run: bool, error_mode: ErrorMode) -> Self {
        Self {
            domain,
            synced_items: Vec::new(),
            conflicts: Vec::new(),
            backed_up: Vec::new(),
            cache_invalidated: Vec::new(),
            cache_warmed: Vec::new(),
            cacheable_assets: Vec::new(),
            non_cacheable_assets: Vec::new(),
            planned: Vec::new(),
            errors: Vec::new(),
            config_reloaded: false,
            dry_run,
            phase: SyncPhase::Init,
            error_mode,
            elapsed: Duration::ZERO,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Errors alongside synced items is a partial success.
    pub fn is_partial(&self) -> bool {
        self.has_errors() && !self.synced_items.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() || self.error_mode == ErrorMode::PartialSuccess
    }
}
