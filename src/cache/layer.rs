//! The per-node set of caches and the channels that purge them.

use std::path::PathBuf;
use std::sync::Arc;

use super::channel::ChannelError;
use super::channels::{
    ContentChannel, ContentTypeChannel, DataTypeChannel, DomainChannel, MediaChannel, TagChannel,
    TemplateChannel,
};
use super::config::CacheConfig;
use super::fragments::FragmentCache;
use super::projection::ProjectionCache;
use super::registry::ChannelRegistry;
use super::templates::TemplateCache;
use crate::application::repos::ContentReader;

#[derive(Clone)]
pub struct CacheLayer {
    pub projection: Arc<ProjectionCache>,
    pub fragments: Arc<FragmentCache>,
    pub templates: Arc<TemplateCache>,
}

impl CacheLayer {
    pub fn new(
        store: Arc<dyn ContentReader>,
        config: &CacheConfig,
        template_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            projection: Arc::new(ProjectionCache::new(store)),
            fragments: Arc::new(FragmentCache::new(config)),
            templates: Arc::new(TemplateCache::new(template_dir, config)),
        }
    }

    /// Registry with every built-in channel wired to these caches.
    pub fn channel_registry(&self) -> Result<ChannelRegistry, ChannelError> {
        let projection = &self.projection;
        let fragments = &self.fragments;
        let registry = ChannelRegistry::builder()
            .register(Arc::new(DataTypeChannel::new(
                Arc::clone(projection),
                Arc::clone(fragments),
            )))?
            .register(Arc::new(ContentTypeChannel::new(
                Arc::clone(projection),
                Arc::clone(fragments),
            )))?
            .register(Arc::new(ContentChannel::new(
                Arc::clone(projection),
                Arc::clone(fragments),
            )))?
            .register(Arc::new(MediaChannel::new(
                Arc::clone(projection),
                Arc::clone(fragments),
            )))?
            .register(Arc::new(TagChannel::new(Arc::clone(projection))))?
            .register(Arc::new(DomainChannel::new(Arc::clone(projection))))?
            .register(Arc::new(TemplateChannel::new(
                Arc::clone(&self.templates),
                Arc::clone(fragments),
            )))?
            .build();
        Ok(registry)
    }
}
