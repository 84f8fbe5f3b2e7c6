//! Loader capabilities and the built-in loaders.
//!
//! A [`Loader`] turns one [`Candidate`] into zero or more typed items. The
//! engine never looks loaders up by name; they are registered once in a
//! [`Loaders`] set at composition time.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{io_err, LoadError};
use crate::items::{ComponentItem, MiddlewareItem, ModelItem, RouteItem, TemplateItem};
use crate::source::Candidate;

#[async_trait]
pub trait Loader<T>: Send + Sync {
    /// Short name recorded on items that carry their loader.
    fn kind(&self) -> &str;

    async fn load(&self, candidate: &Candidate) -> Result<Vec<T>, LoadError>;
}

/// One optional loader per discovery domain.
#[derive(Clone, Default)]
pub struct Loaders {
    pub routes: Option<Arc<dyn Loader<RouteItem>>>,
    pub templates: Option<Arc<dyn Loader<TemplateItem>>>,
    pub middleware: Option<Arc<dyn Loader<MiddlewareItem>>>,
    pub models: Option<Arc<dyn Loader<ModelItem>>>,
    pub components: Option<Arc<dyn Loader<ComponentItem>>>,
}

impl std::fmt::Debug for Loaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loaders")
            .field("routes", &self.routes.as_ref().map(|l| l.kind().to_string()))
            .field("templates", &self.templates.as_ref().map(|l| l.kind().to_string()))
            .field("middleware", &self.middleware.as_ref().map(|l| l.kind().to_string()))
            .field("models", &self.models.as_ref().map(|l| l.kind().to_string()))
            .field("components", &self.components.as_ref().map(|l| l.kind().to_string()))
            .finish()
    }
}

impl Loaders {
    /// YAML manifests for every list domain, tera for templates.
    pub fn builtin() -> Self {
        Self {
            routes: Some(Arc::new(YamlManifestLoader::<RouteItem>::new())),
            templates: Some(Arc::new(TeraTemplateLoader)),
            middleware: Some(Arc::new(YamlManifestLoader::<MiddlewareItem>::new())),
            models: Some(Arc::new(YamlManifestLoader::<ModelItem>::new())),
            components: Some(Arc::new(YamlManifestLoader::<ComponentItem>::new())),
        }
    }

    pub fn with_routes(mut self, loader: impl Loader<RouteItem> + 'static) -> Self {
        self.routes = Some(Arc::new(loader));
        self
    }

    pub fn with_templates(mut self, loader: impl Loader<TemplateItem> + 'static) -> Self {
        self.templates = Some(Arc::new(loader));
        self
    }

    pub fn with_middleware(mut self, loader: impl Loader<MiddlewareItem> + 'static) -> Self {
        self.middleware = Some(Arc::new(loader));
        self
    }

    pub fn with_models(mut self, loader: impl Loader<ModelItem> + 'static) -> Self {
        self.models = Some(Arc::new(loader));
        self
    }

    pub fn with_components(mut self, loader: impl Loader<ComponentItem> + 'static) -> Self {
        self.components = Some(Arc::new(loader));
        self
    }
}

// ---------------------------------------------------------------------------
// YamlManifestLoader
// ---------------------------------------------------------------------------

/// Reads a YAML document holding a list of `T`. An empty file yields no items.
pub struct YamlManifestLoader<T> {
    _item: PhantomData<fn() -> T>,
}

impl<T> YamlManifestLoader<T> {
    pub fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T> Default for YamlManifestLoader<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Loader<T> for YamlManifestLoader<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn kind(&self) -> &str {
        "yaml"
    }

    async fn load(&self, candidate: &Candidate) -> Result<Vec<T>, LoadError> {
        let text = tokio::fs::read_to_string(&candidate.path)
            .await
            .map_err(|e| io_err(&candidate.path, e))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let items: Option<Vec<T>> =
            serde_yaml::from_str(&text).map_err(|e| LoadError::Parse {
                path: candidate.path.clone(),
                message: e.to_string(),
            })?;
        Ok(items.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// TeraTemplateLoader
// ---------------------------------------------------------------------------

/// Parses each template with tera so syntax errors surface at discovery
/// time. Parent templates named by `{% extends %}` need not be loaded yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeraTemplateLoader;

#[async_trait]
impl Loader<TemplateItem> for TeraTemplateLoader {
    fn kind(&self) -> &str {
        "tera"
    }

    async fn load(&self, candidate: &Candidate) -> Result<Vec<TemplateItem>, LoadError> {
        let content = tokio::fs::read_to_string(&candidate.path)
            .await
            .map_err(|e| io_err(&candidate.path, e))?;
        let name = candidate.relative_name();
        let template = tera::Template::new(&name, None, &content).map_err(|source| {
            LoadError::Template {
                path: candidate.path.clone(),
                source,
            }
        })?;

        Ok(vec![TemplateItem {
            name,
            loader_kind: self.kind().to_string(),
            priority: candidate.priority,
            extends: template.parent,
        }])
    }
}
