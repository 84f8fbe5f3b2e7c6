//! # keystone-cache
//!
//! Namespaced key-value cache with TTL, invalidation and warming.
//!
//! | Mode         | Behaviour                                             |
//! |--------------|-------------------------------------------------------|
//! | `None`       | every get misses, every set is a no-op                |
//! | `Memory`     | in-process table, lazy TTL expiry on read             |
//! | `Persistent` | delegates to a [`CacheBackend`] (e.g. [`FileCacheBackend`]) |

pub mod backend;
pub mod coordinator;
pub mod error;

pub use backend::{CacheBackend, CacheEntry, FileCacheBackend};
pub use coordinator::{
    namespace, qualified_key, CacheCoordinator, CacheStats, Invalidation, WarmReport,
};
pub use error::CacheError;
