//! Static asset cacheability.
//!
//! | Class          | Extensions                                       |
//! |----------------|--------------------------------------------------|
//! | `Cacheable`    | css, js, mjs, html, htm, xml, svg, txt, md, json |
//! | `StorageOnly`  | everything else, including no extension          |
//!
//! Cacheable assets are warmed into the cache when synced; storage-only
//! assets live in the storage backend only.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Whether a static asset may also reside in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Cacheable,
    StorageOnly,
}

const CACHEABLE: &[(&str, &str)] = &[
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("mjs", "application/javascript"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("xml", "application/xml"),
    ("svg", "image/svg+xml"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("json", "application/json"),
];

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Classify `path` by its lowercase extension.
pub fn classify_asset(path: impl AsRef<Path>) -> AssetClass {
    if content_type(path).is_some() {
        AssetClass::Cacheable
    } else {
        AssetClass::StorageOnly
    }
}

/// MIME type for a cacheable asset; `None` for storage-only assets.
pub fn content_type(path: impl AsRef<Path>) -> Option<&'static str> {
    let ext = lowercase_extension(path.as_ref())?;
    CACHEABLE
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}
