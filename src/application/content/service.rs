use std::collections::BTreeSet;
use std::sync::Arc;

use crate::application::repos::ContentStore;
use crate::application::unit_of_work::WriteScope;
use crate::cache::{ChangeTypes, ContentChange};
use crate::cluster::ClusterMessenger;
use crate::domain::entities::{ContentRecord, ContentVersionRecord};
use crate::domain::error::DomainError;
use crate::domain::types::{ContentId, ContentKind, VersionId};

use super::types::ContentServiceError;

/// Document operations. Media go through [`MediaService`](crate::application::media::MediaService),
/// which shares this implementation with `kind` set to media.
#[derive(Clone)]
pub struct ContentService {
    pub(crate) kind: ContentKind,
    pub(crate) store: Arc<dyn ContentStore>,
    pub(crate) messenger: Arc<ClusterMessenger>,
}

impl ContentService {
    pub fn new(store: Arc<dyn ContentStore>, messenger: Arc<ClusterMessenger>) -> Self {
        Self::for_kind(ContentKind::Document, store, messenger)
    }

    pub(crate) fn for_kind(
        kind: ContentKind,
        store: Arc<dyn ContentStore>,
        messenger: Arc<ClusterMessenger>,
    ) -> Self {
        Self {
            kind,
            store,
            messenger,
        }
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub(crate) async fn begin(&self) -> Result<WriteScope, ContentServiceError> {
        Ok(WriteScope::begin(self.store.as_ref()).await?)
    }

    /// Commit on success, roll back on error.
    pub(crate) async fn finish<T>(
        &self,
        scope: WriteScope,
        result: Result<T, ContentServiceError>,
    ) -> Result<T, ContentServiceError> {
        scope.complete(&self.messenger, result).await
    }

    /// Queue a descriptor on the channel that caches this service's kind.
    pub(crate) fn emit(&self, scope: &mut WriteScope, id: ContentId, changes: impl Into<ChangeTypes>) {
        let change = ContentChange::new(id, changes);
        match self.kind {
            ContentKind::Document => scope.changes().content(change),
            ContentKind::Media => scope.changes().media(change),
        }
    }

    pub(crate) async fn find(
        &self,
        scope: &mut WriteScope,
        id: ContentId,
    ) -> Result<ContentRecord, ContentServiceError> {
        Ok(scope
            .tx()
            .find_content(id)
            .await?
            .ok_or_else(|| DomainError::not_found("content", id))?)
    }

    /// Like [`find`](Self::find), but only entities of this service's kind.
    pub(crate) async fn load(
        &self,
        scope: &mut WriteScope,
        id: ContentId,
    ) -> Result<ContentRecord, ContentServiceError> {
        let record = self.find(scope, id).await?;
        if record.kind != self.kind {
            return Err(DomainError::not_found(self.kind.as_str(), id).into());
        }
        Ok(record)
    }

    pub(crate) async fn version(
        &self,
        scope: &mut WriteScope,
        entity: &ContentRecord,
        version: VersionId,
    ) -> Result<ContentVersionRecord, ContentServiceError> {
        Ok(scope
            .tx()
            .find_version(entity.id, version)
            .await?
            .ok_or_else(|| {
                DomainError::invariant(format!("version {version} of {} is missing", entity.id))
            })?)
    }

    pub(crate) async fn published_tags(
        &self,
        scope: &mut WriteScope,
        entity: &ContentRecord,
    ) -> Result<BTreeSet<String>, ContentServiceError> {
        match entity.published_version_id {
            Some(published) => Ok(self.version(scope, entity, published).await?.tags),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Ancestors root first, as the transaction currently sees them.
    pub(crate) async fn ancestors(
        &self,
        scope: &mut WriteScope,
        entity: &ContentRecord,
    ) -> Result<Vec<ContentRecord>, ContentServiceError> {
        let mut ancestors = Vec::with_capacity(entity.path.ancestors().len());
        for id in entity.path.ancestors() {
            ancestors.push(self.find(scope, *id).await?);
        }
        Ok(ancestors)
    }
}
