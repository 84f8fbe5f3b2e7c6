//! Typed items yielded by loaders, one type per discovery domain.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use keystone_core::Domain;

use crate::loader::{Loader, Loaders};

/// An item the discovery engine can merge, cache and report.
pub trait GatherItem: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const DOMAIN: Domain;

    /// Identity used to dedupe items declared by several sources.
    fn natural_key(&self) -> String;

    /// The loader registered for this item type, if any.
    fn loader(loaders: &Loaders) -> Option<Arc<dyn Loader<Self>>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteItem {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub handler: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl GatherItem for RouteItem {
    const DOMAIN: Domain = Domain::Routes;

    fn natural_key(&self) -> String {
        format!("{} {}", self.method.to_uppercase(), self.path)
    }

    fn loader(loaders: &Loaders) -> Option<Arc<dyn Loader<Self>>> {
        loaders.routes.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateItem {
    /// Path relative to the source root, `/`-separated.
    pub name: String,
    pub loader_kind: String,
    pub priority: u32,
    /// Parent template named by `{% extends %}`.
    #[serde(default)]
    pub extends: Option<String>,
}

impl GatherItem for TemplateItem {
    const DOMAIN: Domain = Domain::Templates;

    fn natural_key(&self) -> String {
        self.name.clone()
    }

    fn loader(loaders: &Loaders) -> Option<Arc<dyn Loader<Self>>> {
        loaders.templates.clone()
    }
}

/// Middleware occupies a slot in the chain; two sources claiming the same
/// slot collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiddlewareItem {
    pub reference: String,
    pub position: u32,
}

impl GatherItem for MiddlewareItem {
    const DOMAIN: Domain = Domain::Middleware;

    fn natural_key(&self) -> String {
        self.position.to_string()
    }

    fn loader(loaders: &Loaders) -> Option<Arc<dyn Loader<Self>>> {
        loaders.middleware.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelItem {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl GatherItem for ModelItem {
    const DOMAIN: Domain = Domain::Models;

    fn natural_key(&self) -> String {
        self.name.clone()
    }

    fn loader(loaders: &Loaders) -> Option<Arc<dyn Loader<Self>>> {
        loaders.models.clone()
    }
}

/// An installed application component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentItem {
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub entry: Option<String>,
}

impl GatherItem for ComponentItem {
    const DOMAIN: Domain = Domain::Application;

    fn natural_key(&self) -> String {
        self.name.clone()
    }

    fn loader(loaders: &Loaders) -> Option<Arc<dyn Loader<Self>>> {
        loaders.components.clone()
    }
}

/// Filename globs used when neither the call nor the source names any.
pub fn default_patterns(domain: Domain) -> &'static [&'static str] {
    match domain {
        Domain::Routes => &["routes.yaml", "routes.yml", "*.routes.yaml"],
        Domain::Templates => &["*.html", "*.htm", "*.tera", "*.txt", "*.xml"],
        Domain::Middleware => &["middleware.yaml", "middleware.yml"],
        Domain::Models => &["models.yaml", "models.yml"],
        Domain::Application => &["components.yaml", "components.yml"],
        Domain::Settings => &["*.yaml", "*.yml", "*.json"],
        Domain::Static | Domain::Cache => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_key_normalises_method_case() {
        let a = RouteItem {
            path: "/users".into(),
            method: "get".into(),
            handler: "a".into(),
            name: None,
        };
        let b = RouteItem {
            method: "GET".into(),
            handler: "b".into(),
            ..a.clone()
        };
        assert_eq!(a.natural_key(), b.natural_key());
        assert_eq!(a.natural_key(), "GET /users");
    }

    #[test]
    fn route_method_defaults_to_get() {
        let route: RouteItem = serde_yaml::from_str("path: /\nhandler: home").unwrap();
        assert_eq!(route.method, "GET");
    }

    #[test]
    fn middleware_key_is_position() {
        let m = MiddlewareItem {
            reference: "auth".into(),
            position: 3,
        };
        assert_eq!(m.natural_key(), "3");
    }
}
