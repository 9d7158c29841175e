//! Everything one node needs, wired together.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;
use vellum_wire::NotificationEnvelope;

use crate::application::content::ContentService;
use crate::application::media::MediaService;
use crate::application::render::FragmentRenderer;
use crate::application::repos::{ContentReader, ContentStore};
use crate::application::structure::StructureService;
use crate::cache::{
    CacheConfig, CacheInvalidator, CacheLayer, CacheObserver, ChannelError, ObserverRegistry,
};
use crate::cluster::{ClusterMessenger, NotificationReceiver};

#[derive(Clone)]
pub struct NodeContext {
    pub node_id: Uuid,
    pub store: Arc<dyn ContentStore>,
    pub caches: CacheLayer,
    pub messenger: Arc<ClusterMessenger>,
    pub receiver: Arc<NotificationReceiver>,
    pub content: ContentService,
    pub media: MediaService,
    pub structure: StructureService,
    pub renderer: FragmentRenderer,
}

impl NodeContext {
    /// Build the node and hand back its outbox for a dispatch worker.
    pub fn build<S>(
        node_id: Uuid,
        store: Arc<S>,
        config: &CacheConfig,
        template_dir: impl Into<PathBuf>,
        observers: Vec<Arc<dyn CacheObserver>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<NotificationEnvelope>), ChannelError>
    where
        S: ContentStore + 'static,
    {
        let reader: Arc<dyn ContentReader> = store.clone();
        let store: Arc<dyn ContentStore> = store;

        let caches = CacheLayer::new(reader, config, template_dir);
        let registry = Arc::new(caches.channel_registry()?);
        let invalidator = CacheInvalidator::new(
            Arc::clone(&registry),
            Arc::new(ObserverRegistry::new(observers)),
        );

        let (messenger, outbox) = ClusterMessenger::new(node_id, invalidator.clone());
        let messenger = Arc::new(messenger);
        let receiver = Arc::new(NotificationReceiver::new(node_id, invalidator));

        info!(%node_id, channels = registry.len(), "Node context ready");

        let context = Self {
            node_id,
            content: ContentService::new(Arc::clone(&store), Arc::clone(&messenger)),
            media: MediaService::new(Arc::clone(&store), Arc::clone(&messenger)),
            structure: StructureService::new(Arc::clone(&store), Arc::clone(&messenger)),
            renderer: FragmentRenderer::new(&caches),
            store,
            caches,
            messenger,
            receiver,
        };
        Ok((context, outbox))
    }
}
