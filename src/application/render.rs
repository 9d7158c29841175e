//! Renders a node through a template, memoised in the fragment cache.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::cache::{
    CacheLayer, Dependency, FragmentCache, FragmentKey, ProjectionCache, ProjectionError,
    TemplateCache, TemplateError,
};
use crate::domain::types::{ContentId, Preview};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Clone)]
pub struct FragmentRenderer {
    projection: Arc<ProjectionCache>,
    fragments: Arc<FragmentCache>,
    templates: Arc<TemplateCache>,
}

impl FragmentRenderer {
    pub fn new(caches: &CacheLayer) -> Self {
        Self {
            projection: Arc::clone(&caches.projection),
            fragments: Arc::clone(&caches.fragments),
            templates: Arc::clone(&caches.templates),
        }
    }

    /// `None` when the node is not visible in `preview`.
    #[instrument(skip(self))]
    pub async fn render(
        &self,
        template: &str,
        id: ContentId,
        preview: Preview,
    ) -> Result<Option<Arc<str>>, RenderError> {
        let key = FragmentKey::new(template, id, preview);
        if let Some(html) = self.fragments.get(&key) {
            return Ok(Some(html));
        }

        let generation = self.fragments.generation();
        let content = match preview {
            Preview::Published => match self.projection.get_by_id(preview, id).await? {
                Some(content) => Some(content),
                None => self.projection.get_media(id).await?,
            },
            Preview::Draft => self.projection.get_by_id(preview, id).await?,
        };
        let Some(content) = content else {
            return Ok(None);
        };

        let compiled = self.templates.get(template).await?;
        let html: Arc<str> = Arc::from(compiled.render(&content));
        // A fragment is only valid while every ancestor keeps it visible.
        let mut dependencies: HashSet<Dependency> = content
            .path
            .ids()
            .iter()
            .copied()
            .map(Dependency::Content)
            .collect();
        dependencies.insert(Dependency::Content(id));
        dependencies.insert(Dependency::Template(template.to_string()));
        if !self
            .fragments
            .put(key, Arc::clone(&html), dependencies, generation)
        {
            debug!(%id, template, "Fragment rendered but not cached");
        }
        Ok(Some(html))
    }
}
