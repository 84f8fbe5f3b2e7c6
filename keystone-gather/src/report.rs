use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use keystone_core::{Domain, ErrorMode, FaultKind};

/// A recoverable failure attached to one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    pub source: String,
    pub path: Option<PathBuf>,
    pub kind: FaultKind,
    pub message: String,
}

/// Outcome of one discovery call.
///
/// `total_count == items.len()` and equals the sum of `by_source` lengths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatherReport<T> {
    pub domain: Domain,
    pub items: Vec<T>,
    /// Items kept after dedupe, grouped by the source that won them.
    pub by_source: BTreeMap<String, Vec<T>>,
    pub errors: Vec<SourceError>,
    /// Sources that were declared but could not be found.
    pub skipped: Vec<String>,
    pub elapsed: Duration,
    pub total_count: usize,
    pub error_mode: ErrorMode,
    /// Set when the report was served from the discovery cache.
    #[serde(default)]
    pub from_cache: bool,
}

impl<T> GatherReport<T> {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Partial-success runs count as successful even with errors.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() || self.error_mode == ErrorMode::PartialSuccess
    }
}
