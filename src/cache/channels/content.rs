//! Document and media channels.
//!
//! Both purge the read projection for the ids in the payload. The document
//! channel distinguishes draft and published state; media items are published
//! on save, so the media channel drops both views.

use std::sync::Arc;

use tracing::debug;

use crate::cache::changes::{ChangeKind, ContentChange};
use crate::cache::channel::{
    AppliedScope, ChannelError, ChannelId, ChannelMessage, ChannelPayload, InvalidationChannel,
    PayloadKind, expect_payload, payload_mismatch,
};
use crate::cache::dependencies::Dependency;
use crate::cache::fragments::FragmentCache;
use crate::cache::projection::ProjectionCache;
use crate::domain::types::Preview;

pub struct ContentChannel {
    projection: Arc<ProjectionCache>,
    fragments: Arc<FragmentCache>,
}

impl ContentChannel {
    pub fn new(projection: Arc<ProjectionCache>, fragments: Arc<FragmentCache>) -> Self {
        Self {
            projection,
            fragments,
        }
    }

    fn apply_change(&self, change: &ContentChange, scope: &mut AppliedScope) {
        let id = change.id;
        let changes = change.changes;

        if changes.contains(ChangeKind::Removed) && !changes.contains(ChangeKind::NodeChanged) {
            scope.purged += self.projection.purge_branch(None, id);
            scope.removed.insert(id.get());
        } else {
            if changes.contains(ChangeKind::NodeChanged) {
                scope.purged += self.projection.purge(Preview::Draft, id);
                scope.nodes.insert(id.get());
            }
            // Published descendants are masked by their ancestors, so any
            // change to the published state reaches the whole published branch.
            if changes.contains(ChangeKind::PublishedChanged)
                || changes.contains(ChangeKind::Removed)
            {
                scope.purged += self.projection.purge_branch(Some(Preview::Published), id);
                scope.nodes.insert(id.get());
            }
            if changes.contains(ChangeKind::Removed) {
                scope.removed.insert(id.get());
            }
        }

        if changes.contains(ChangeKind::BranchChanged) {
            scope.purged += self.projection.purge_branch(None, id);
            scope.branches.insert(id.get());
        }

        scope.purged += self.fragments.invalidate(&Dependency::Content(id));
    }
}

impl InvalidationChannel for ContentChannel {
    fn id(&self) -> ChannelId {
        ChannelId::CONTENT
    }

    fn name(&self) -> &'static str {
        "content"
    }

    fn payload_kind(&self) -> PayloadKind {
        PayloadKind::Content
    }

    fn apply(&self, message: ChannelMessage) -> Result<AppliedScope, ChannelError> {
        let changes = match expect_payload(self, message)? {
            ChannelPayload::Content(changes) => changes,
            other => return Err(payload_mismatch(self, &other)),
        };

        let mut scope = AppliedScope::default();
        for change in &changes {
            if change.is_refresh_all() {
                let purged = self.projection.clear_documents() + self.fragments.clear();
                scope = AppliedScope::everything(purged);
                break;
            }
            self.apply_change(change, &mut scope);
        }
        scope.purged += self.projection.clear_routes();

        debug!(entries = changes.len(), purged = scope.purged, "Content channel applied");
        Ok(scope)
    }
}

pub struct MediaChannel {
    projection: Arc<ProjectionCache>,
    fragments: Arc<FragmentCache>,
}

impl MediaChannel {
    pub fn new(projection: Arc<ProjectionCache>, fragments: Arc<FragmentCache>) -> Self {
        Self {
            projection,
            fragments,
        }
    }
}

impl InvalidationChannel for MediaChannel {
    fn id(&self) -> ChannelId {
        ChannelId::MEDIA
    }

    fn name(&self) -> &'static str {
        "media"
    }

    fn payload_kind(&self) -> PayloadKind {
        PayloadKind::Content
    }

    fn apply(&self, message: ChannelMessage) -> Result<AppliedScope, ChannelError> {
        let changes = match expect_payload(self, message)? {
            ChannelPayload::Content(changes) => changes,
            other => return Err(payload_mismatch(self, &other)),
        };

        let mut scope = AppliedScope::default();
        for change in &changes {
            let id = change.id;
            if change.is_refresh_all() {
                let purged = self.projection.clear_media() + self.fragments.clear();
                return Ok(AppliedScope::everything(purged));
            }
            if change.changes.contains(ChangeKind::Removed)
                || change.changes.contains(ChangeKind::BranchChanged)
            {
                scope.purged += self.projection.purge_branch(None, id);
                if change.changes.contains(ChangeKind::Removed) {
                    scope.removed.insert(id.get());
                } else {
                    scope.branches.insert(id.get());
                }
            } else {
                scope.purged += self.projection.purge(Preview::Draft, id)
                    + self.projection.purge(Preview::Published, id);
                scope.nodes.insert(id.get());
            }
            scope.purged += self.fragments.invalidate(&Dependency::Content(id));
        }
        Ok(scope)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::application::repos::{ContentStore, NewContent, SaveContentType};
    use crate::cache::config::CacheConfig;
    use crate::domain::entities::PropertyValues;
    use crate::domain::types::{ContentId, ContentKind, ItemType};
    use crate::infra::memory::InMemoryContentStore;

    async fn seeded() -> (InMemoryContentStore, ContentId, ContentId) {
        let store = InMemoryContentStore::new();
        let mut tx = store.begin().await.expect("begin");
        let page = tx
            .save_content_type(SaveContentType {
                id: None,
                alias: "page".to_string(),
                item_type: ItemType::Content,
                properties: Vec::new(),
                updated_at: OffsetDateTime::UNIX_EPOCH,
            })
            .await
            .expect("type");
        let mut ids = Vec::new();
        let mut parent = None;
        for name in ["Home", "About"] {
            let (mut record, _) = tx
                .insert_content(NewContent {
                    key: Uuid::new_v4(),
                    kind: ContentKind::Document,
                    content_type_id: page.id,
                    parent_id: parent,
                    sort_order: 0,
                    name: name.to_string(),
                    values: PropertyValues::new(),
                    tags: BTreeSet::new(),
                    author: "editor".to_string(),
                    release_date: None,
                    expire_date: None,
                    created_at: OffsetDateTime::UNIX_EPOCH,
                })
                .await
                .expect("insert");
            record.published_version_id = Some(record.newest_version_id);
            tx.update_content(&record).await.expect("publish");
            parent = Some(record.id);
            ids.push(record.id);
        }
        tx.commit().await.expect("commit");
        (store, ids[0], ids[1])
    }

    fn channel(store: &InMemoryContentStore) -> (Arc<ProjectionCache>, ContentChannel) {
        let projection = Arc::new(ProjectionCache::new(Arc::new(store.clone())));
        let fragments = Arc::new(FragmentCache::new(&CacheConfig::default()));
        let channel = ContentChannel::new(Arc::clone(&projection), fragments);
        (projection, channel)
    }

    async fn warm(projection: &ProjectionCache, ids: &[ContentId]) {
        for preview in [Preview::Draft, Preview::Published] {
            for id in ids {
                projection.get_by_id(preview, *id).await.expect("warm");
            }
        }
    }

    fn payload(change: ContentChange) -> ChannelMessage {
        ChannelMessage::Payload(ChannelPayload::Content(vec![change]))
    }

    #[tokio::test]
    async fn unpublish_drops_draft_node_and_published_branch() {
        let (store, home, about) = seeded().await;
        let (projection, channel) = channel(&store);
        warm(&projection, &[home, about]).await;

        let scope = channel
            .apply(payload(ContentChange::new(
                home,
                ChangeKind::NodeChanged | ChangeKind::Removed,
            )))
            .expect("apply");

        // Draft home, published home and published about.
        assert_eq!(scope.purged, 3);
        assert!(scope.removed.contains(&home.get()));
        assert_eq!(projection.len(), 1);
    }

    #[tokio::test]
    async fn remove_alone_purges_both_views_of_the_branch() {
        let (store, home, about) = seeded().await;
        let (projection, channel) = channel(&store);
        warm(&projection, &[home, about]).await;

        channel
            .apply(payload(ContentChange::new(about, ChangeKind::Removed)))
            .expect("apply");
        assert_eq!(projection.len(), 2);
    }

    #[tokio::test]
    async fn branch_payload_applied_twice_equals_once() {
        let (store, home, about) = seeded().await;
        let (projection, channel) = channel(&store);
        warm(&projection, &[home, about]).await;

        let change = ContentChange::new(home, ChangeKind::NodeChanged | ChangeKind::BranchChanged);
        let first = channel.apply(payload(change)).expect("first");
        let after_first = projection.len();
        let second = channel.apply(payload(change)).expect("second");

        assert_eq!(first.purged, 4);
        assert_eq!(second.purged, 0);
        assert_eq!(projection.len(), after_first);
        assert_eq!(first.branches, second.branches);
    }

    #[tokio::test]
    async fn refresh_all_sentinel_clears_documents() {
        let (store, home, about) = seeded().await;
        let (projection, channel) = channel(&store);
        warm(&projection, &[home, about]).await;

        let scope = channel
            .apply(payload(ContentChange::refresh_all()))
            .expect("apply");
        assert!(scope.refreshed_all);
        assert!(projection.is_empty());
    }

    #[test]
    fn legacy_shapes_are_rejected() {
        let store = InMemoryContentStore::new();
        let (_, channel) = channel(&store);
        assert!(matches!(
            channel.apply(ChannelMessage::RemoveById(3)),
            Err(ChannelError::UnsupportedShape { .. })
        ));
    }
}
