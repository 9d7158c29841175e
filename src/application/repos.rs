//! Repository traits describing persistence adapters.
//!
//! Reads that serve the projection go through [`ContentReader`]. Every write
//! happens inside a [`ContentTransaction`] obtained from [`ContentStore::begin`];
//! the transaction sees its own uncommitted writes.

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{
    ContentRecord, ContentTypeRecord, ContentVersionRecord, DataTypeRecord, DomainRecord,
    PropertyTypeRecord, PropertyValues,
};
use crate::domain::types::{
    ContentId, ContentKind, ContentTypeId, DataTypeId, DomainId, ItemType, VersionId,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewContent {
    pub key: Uuid,
    pub kind: ContentKind,
    pub content_type_id: ContentTypeId,
    pub parent_id: Option<ContentId>,
    pub sort_order: i32,
    pub name: String,
    pub values: PropertyValues,
    pub tags: BTreeSet<String>,
    pub author: String,
    pub release_date: Option<OffsetDateTime>,
    pub expire_date: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewVersion {
    pub content_id: ContentId,
    pub name: String,
    pub values: PropertyValues,
    pub tags: BTreeSet<String>,
    pub author: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct SaveContentType {
    pub id: Option<ContentTypeId>,
    pub alias: String,
    pub item_type: ItemType,
    pub properties: Vec<PropertyTypeRecord>,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct SaveDataType {
    pub id: Option<DataTypeId>,
    pub key: Uuid,
    pub name: String,
    pub editor_alias: String,
}

#[derive(Debug, Clone)]
pub struct SaveDomain {
    pub id: Option<DomainId>,
    pub host: String,
    pub root_content_id: ContentId,
}

#[async_trait]
pub trait ContentReader: Send + Sync {
    async fn find_content(&self, id: ContentId) -> Result<Option<ContentRecord>, RepoError>;

    async fn find_content_by_key(&self, key: Uuid) -> Result<Option<ContentRecord>, RepoError>;

    async fn find_version(
        &self,
        id: ContentId,
        version: VersionId,
    ) -> Result<Option<ContentVersionRecord>, RepoError>;

    /// Versions of an entity, newest first.
    async fn list_versions(&self, id: ContentId) -> Result<Vec<ContentVersionRecord>, RepoError>;

    /// Children ordered by sort order; `None` lists roots.
    async fn children(
        &self,
        parent: Option<ContentId>,
        kind: ContentKind,
    ) -> Result<Vec<ContentRecord>, RepoError>;

    /// Descendants in document order (depth first, siblings by sort order).
    async fn descendants(&self, id: ContentId) -> Result<Vec<ContentRecord>, RepoError>;

    /// Trashed entities whose parent is not trashed.
    async fn trashed_roots(&self, kind: ContentKind) -> Result<Vec<ContentRecord>, RepoError>;

    /// Ids whose published version carries `tag`.
    async fn tagged(&self, tag: &str) -> Result<Vec<ContentId>, RepoError>;

    /// Untrashed documents with a passed release date and unpublished changes.
    async fn due_for_release(&self, now: OffsetDateTime) -> Result<Vec<ContentId>, RepoError>;

    /// Published documents with a passed expire date.
    async fn due_for_expiry(&self, now: OffsetDateTime) -> Result<Vec<ContentId>, RepoError>;

    async fn find_content_type(
        &self,
        id: ContentTypeId,
    ) -> Result<Option<ContentTypeRecord>, RepoError>;

    async fn find_data_type(&self, id: DataTypeId) -> Result<Option<DataTypeRecord>, RepoError>;

    async fn list_domains(&self) -> Result<Vec<DomainRecord>, RepoError>;
}

#[async_trait]
pub trait ContentStore: ContentReader {
    async fn begin(&self) -> Result<Box<dyn ContentTransaction>, RepoError>;

    /// Cheap round trip proving the backing store is reachable.
    async fn health_check(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

#[async_trait]
pub trait ContentTransaction: Send {
    async fn find_content(&mut self, id: ContentId) -> Result<Option<ContentRecord>, RepoError>;

    async fn find_version(
        &mut self,
        id: ContentId,
        version: VersionId,
    ) -> Result<Option<ContentVersionRecord>, RepoError>;

    async fn list_versions(
        &mut self,
        id: ContentId,
    ) -> Result<Vec<ContentVersionRecord>, RepoError>;

    async fn children(
        &mut self,
        parent: Option<ContentId>,
        kind: ContentKind,
    ) -> Result<Vec<ContentRecord>, RepoError>;

    async fn descendants(&mut self, id: ContentId) -> Result<Vec<ContentRecord>, RepoError>;

    async fn content_of_type(
        &mut self,
        content_type_id: ContentTypeId,
    ) -> Result<Vec<ContentRecord>, RepoError>;

    async fn find_content_type(
        &mut self,
        id: ContentTypeId,
    ) -> Result<Option<ContentTypeRecord>, RepoError>;

    async fn content_types_using(
        &mut self,
        data_type_id: DataTypeId,
    ) -> Result<Vec<ContentTypeRecord>, RepoError>;

    async fn find_data_type(&mut self, id: DataTypeId)
    -> Result<Option<DataTypeRecord>, RepoError>;

    async fn find_domain(&mut self, id: DomainId) -> Result<Option<DomainRecord>, RepoError>;

    async fn list_domains(&mut self) -> Result<Vec<DomainRecord>, RepoError>;

    /// Insert an entity together with its first version; the store assigns ids and the path.
    async fn insert_content(
        &mut self,
        params: NewContent,
    ) -> Result<(ContentRecord, ContentVersionRecord), RepoError>;

    async fn insert_version(&mut self, params: NewVersion)
    -> Result<ContentVersionRecord, RepoError>;

    /// Overwrite a draft version in place.
    async fn replace_version(&mut self, version: &ContentVersionRecord) -> Result<(), RepoError>;

    /// Persist the mutable columns of an entity.
    async fn update_content(&mut self, record: &ContentRecord) -> Result<(), RepoError>;

    /// Remove one entity and its versions. Children must already be gone.
    async fn delete_content(&mut self, id: ContentId) -> Result<(), RepoError>;

    async fn delete_versions(
        &mut self,
        id: ContentId,
        versions: &[VersionId],
    ) -> Result<u64, RepoError>;

    async fn save_content_type(
        &mut self,
        params: SaveContentType,
    ) -> Result<ContentTypeRecord, RepoError>;

    async fn delete_content_type(&mut self, id: ContentTypeId) -> Result<(), RepoError>;

    async fn save_data_type(&mut self, params: SaveDataType) -> Result<DataTypeRecord, RepoError>;

    async fn delete_data_type(&mut self, id: DataTypeId) -> Result<(), RepoError>;

    async fn save_domain(&mut self, params: SaveDomain) -> Result<DomainRecord, RepoError>;

    async fn delete_domain(&mut self, id: DomainId) -> Result<(), RepoError>;

    async fn commit(self: Box<Self>) -> Result<(), RepoError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepoError>;
}
