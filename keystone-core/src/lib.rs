//! Keystone core library: strategy config, domain types, error taxonomy and
//! the bounded-concurrency task scheduler shared by both engines.
//!
//! - [`types`]: newtypes, enums, [`StrategyConfig`], sync data model
//! - [`error`]: [`ConfigError`], [`FaultKind`], [`Fault`], [`BatchError`]
//! - [`config`]: YAML load / atomic save
//! - [`scheduler`]: [`scheduler::run`]

pub mod config;
pub mod error;
pub mod scheduler;
pub mod types;

pub use error::{BatchError, ConfigError, Fault, FaultKind};
pub use scheduler::{BatchResult, Outcome, Task};
pub use types::{
    Bucket, CacheMode, Classification, ConflictRecord, ConflictStrategy, Direction, Domain,
    ErrorMode, FileState, Resolution, Side, SourceDescriptor, SourceKind, SourceName,
    StrategyConfig, SyncItem,
};
