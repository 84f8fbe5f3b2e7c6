//! Domain types shared by the discovery and synchronization engines.
//!
//! All filesystem locations use `PathBuf`; relative artifact paths that are
//! shared between the local tree and a remote bucket are `/`-separated
//! strings. Every type is serializable via serde + serde_yaml.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a declared discovery source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceName(pub String);

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SourceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SourceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A named remote storage bucket (`templates`, `settings`, `static`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket(pub String);

impl Bucket {
    /// The conventional bucket for a sync domain.
    pub fn for_domain(domain: Domain) -> Self {
        Self(domain.to_string())
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Bucket {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// A category of artifact that is discovered or synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Routes,
    Templates,
    Middleware,
    Models,
    Application,
    Settings,
    Static,
    Cache,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Domain::Routes => "routes",
            Domain::Templates => "templates",
            Domain::Middleware => "middleware",
            Domain::Models => "models",
            Domain::Application => "application",
            Domain::Settings => "settings",
            Domain::Static => "static",
            Domain::Cache => "cache",
        };
        f.write_str(name)
    }
}

/// How a batch reacts to failing units of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// First terminal failure aborts the batch; partial outcomes are discarded.
    FailFast,
    /// Every unit runs; successes and failures are both returned.
    #[default]
    CollectErrors,
    /// Failures are dropped silently.
    IgnoreErrors,
    /// As `CollectErrors`, but the report still counts as successful.
    PartialSuccess,
}

/// Which cache layer, if any, backs a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    None,
    #[default]
    Memory,
    Persistent,
}

/// Direction of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Pull,
    Push,
    #[default]
    Bidirectional,
}

impl Direction {
    pub fn pushes(self) -> bool {
        matches!(self, Direction::Push | Direction::Bidirectional)
    }

    pub fn pulls(self) -> bool {
        matches!(self, Direction::Pull | Direction::Bidirectional)
    }
}

/// Policy applied to items classified as [`Classification::Conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    RemoteWins,
    LocalWins,
    #[default]
    NewestWins,
    BackupBoth,
    Manual,
}

/// Diff classification of one relative path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Unchanged,
    LocalOnly,
    RemoteOnly,
    Conflict,
}

/// One side of a sync pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => f.write_str("local"),
            Side::Remote => f.write_str("remote"),
        }
    }
}

/// Action chosen for a conflicting item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum Resolution {
    TakeLocal,
    TakeRemote,
    /// Loser is snapshotted next to the canonical path before the winner is written.
    BackupBoth { winner: Side },
    /// No corrective action; an operator must re-run with a concrete policy.
    Unresolved,
}

impl Resolution {
    /// The side whose content ends up at the canonical path, if any.
    pub fn winner(self) -> Option<Side> {
        match self {
            Resolution::TakeLocal => Some(Side::Local),
            Resolution::TakeRemote => Some(Side::Remote),
            Resolution::BackupBoth { winner } => Some(winner),
            Resolution::Unresolved => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy config
// ---------------------------------------------------------------------------

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Execution strategy consumed by both engines. Passed by value per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub parallel: bool,
    pub max_concurrent: usize,
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    pub error_mode: ErrorMode,
    pub cache_mode: CacheMode,
    pub retry_attempts: u32,
    #[serde(rename = "retry_delay_ms", with = "millis")]
    pub retry_delay: Duration,
    /// TTL applied when discovery reports are cached.
    #[serde(rename = "cache_ttl_ms", with = "millis")]
    pub cache_ttl: Duration,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_concurrent: 8,
            timeout: Duration::from_secs(30),
            error_mode: ErrorMode::default(),
            cache_mode: CacheMode::default(),
            retry_attempts: 0,
            retry_delay: Duration::from_millis(100),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

impl StrategyConfig {
    /// Strictly ordered, one unit at a time.
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            max_concurrent: 1,
            ..Self::default()
        }
    }

    pub fn with_parallelism(mut self, max_concurrent: usize) -> Self {
        self.parallel = true;
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Reject configurations the scheduler cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent must be greater than zero".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// How a source is expanded into candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A directory walked recursively and filtered by filename patterns.
    #[default]
    Directory,
    /// A single reference handed to the loader as-is (a manifest file, a
    /// package name resolved by the loader).
    Adapter,
}

/// One declared origin scanned by the discovery engine. Lives for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: SourceName,
    #[serde(default)]
    pub kind: SourceKind,
    pub location: PathBuf,
    /// Filename globs; empty means the call-level patterns apply.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Lower numbers win when two sources declare the same item.
    #[serde(default)]
    pub priority: u32,
}

impl SourceDescriptor {
    pub fn directory(name: impl Into<SourceName>, location: impl Into<PathBuf>, priority: u32) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Directory,
            location: location.into(),
            patterns: Vec::new(),
            priority,
        }
    }

    pub fn adapter(name: impl Into<SourceName>, location: impl Into<PathBuf>, priority: u32) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Adapter,
            location: location.into(),
            patterns: Vec::new(),
            priority,
        }
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// Sync data model
// ---------------------------------------------------------------------------

/// Observed state of one side of a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileState {
    pub exists: bool,
    pub mtime: Option<DateTime<Utc>>,
    /// Lowercase hex SHA-256 of the content.
    pub hash: Option<String>,
}

impl FileState {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn present(mtime: DateTime<Utc>, hash: impl Into<String>) -> Self {
        Self {
            exists: true,
            mtime: Some(mtime),
            hash: Some(hash.into()),
        }
    }
}

/// A relative path with both observed states and its diff classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncItem {
    pub relative_path: String,
    pub local_state: FileState,
    pub remote_state: FileState,
    pub classification: Classification,
}

/// Diagnostic record for an item whose two versions disagreed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub path: String,
    pub local_mtime: Option<DateTime<Utc>>,
    pub remote_mtime: Option<DateTime<Utc>>,
    pub local_hash: Option<String>,
    pub remote_hash: Option<String>,
    pub resolution_applied: Resolution,
    /// Unified diff of local → remote, for text content in dry runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl ConflictRecord {
    pub fn from_item(item: &SyncItem, resolution: Resolution) -> Self {
        Self {
            path: item.relative_path.clone(),
            local_mtime: item.local_state.mtime,
            remote_mtime: item.remote_state.mtime,
            local_hash: item.local_state.hash.clone(),
            remote_hash: item.remote_state.hash.clone(),
            resolution_applied: resolution,
            preview: None,
        }
    }
}

impl fmt::Display for ConflictRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn stamp(t: &Option<DateTime<Utc>>) -> String {
            t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
        }
        fn short(h: &Option<String>) -> String {
            h.as_deref()
                .map(|h| h.chars().take(12).collect())
                .unwrap_or_else(|| "-".to_string())
        }
        write!(
            f,
            "{} (local {} {}, remote {} {})",
            self.path,
            stamp(&self.local_mtime),
            short(&self.local_hash),
            stamp(&self.remote_mtime),
            short(&self.remote_hash),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
