//! # keystone-gather
//!
//! Discovers routes, templates, middleware, models and application
//! components from prioritised sources.
//!
//! A call expands each [`SourceDescriptor`](keystone_core::SourceDescriptor)
//! into candidates, loads every candidate as one scheduler unit, then merges
//! the results so the lowest priority number wins per natural key. Reports
//! are cached in the `discovery` namespace for `cache_ttl`.

pub mod engine;
pub mod error;
pub mod items;
pub mod loader;
pub mod report;
pub mod source;

pub use engine::{ApplicationManifest, DomainSources, Gatherer};
pub use error::{GatherError, LoadError};
pub use items::{
    default_patterns, ComponentItem, GatherItem, MiddlewareItem, ModelItem, RouteItem,
    TemplateItem,
};
pub use loader::{Loader, Loaders, TeraTemplateLoader, YamlManifestLoader};
pub use report::{GatherReport, SourceError};
pub use source::{Candidate, Expansion};
