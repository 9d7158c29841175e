//! Media items: the same tree rules as documents, but always published.

use std::sync::Arc;

use tracing::instrument;

use crate::application::content::{ContentService, ContentServiceError, SaveContentCommand};
use crate::application::repos::ContentStore;
use crate::application::unit_of_work::WriteScope;
use crate::cluster::ClusterMessenger;
use crate::domain::entities::ContentRecord;
use crate::domain::error::DomainError;
use crate::domain::types::{ContentId, ContentKind};

#[derive(Clone)]
pub struct MediaService {
    inner: ContentService,
}

impl MediaService {
    pub fn new(store: Arc<dyn ContentStore>, messenger: Arc<ClusterMessenger>) -> Self {
        Self {
            inner: ContentService::for_kind(ContentKind::Media, store, messenger),
        }
    }

    /// Save and publish in one write. Trashed items are saved but stay hidden.
    #[instrument(skip(self, command))]
    pub async fn save(
        &self,
        actor: &str,
        command: SaveContentCommand,
    ) -> Result<ContentRecord, ContentServiceError> {
        let mut scope = self.inner.begin().await?;
        let result = self.save_in(&mut scope, actor, command).await;
        self.inner.finish(scope, result).await
    }

    /// Re-parent an item; restoring from the recycle bin publishes it again.
    #[instrument(skip(self))]
    pub async fn move_to(
        &self,
        id: ContentId,
        parent: Option<ContentId>,
    ) -> Result<ContentRecord, ContentServiceError> {
        let mut scope = self.inner.begin().await?;
        let result: Result<ContentRecord, ContentServiceError> = async {
            let was_trashed = self.inner.load(&mut scope, id).await?.trashed;
            let moved = self.inner.move_in(&mut scope, id, parent).await?;
            if was_trashed {
                self.inner.publish_branch_in(&mut scope, id, false).await?;
                return self.inner.load(&mut scope, id).await;
            }
            Ok(moved)
        }
        .await;
        self.inner.finish(scope, result).await
    }

    pub async fn move_to_recycle_bin(&self, id: ContentId) -> Result<bool, ContentServiceError> {
        self.inner.move_to_recycle_bin(id).await
    }

    pub async fn delete(&self, id: ContentId) -> Result<usize, ContentServiceError> {
        self.inner.delete(id).await
    }

    pub async fn empty_recycle_bin(&self) -> Result<usize, ContentServiceError> {
        self.inner.empty_recycle_bin().await
    }

    async fn save_in(
        &self,
        scope: &mut WriteScope,
        actor: &str,
        command: SaveContentCommand,
    ) -> Result<ContentRecord, ContentServiceError> {
        let saved = self.inner.save_in(scope, actor, command).await?;
        if saved.trashed {
            return Ok(saved);
        }
        let outcome = self.inner.publish_in(scope, saved.id, false).await?;
        if let Err(failure) = outcome.result {
            return Err(DomainError::validation(format!(
                "media {} cannot be published: {failure}",
                saved.id
            ))
            .into());
        }
        self.inner.load(scope, saved.id).await
    }
}
