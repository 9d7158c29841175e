//! Postgres-backed content store.

mod content;
mod rows;
mod structure;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{
    PgConnection, Postgres, Transaction,
    pool::PoolConnection,
    postgres::{PgPool, PgPoolOptions},
    query,
};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::application::repos::{
    ContentReader, ContentStore, ContentTransaction, NewContent, NewVersion, RepoError,
    SaveContentType, SaveDataType, SaveDomain,
};
use crate::domain::entities::{
    ContentRecord, ContentTypeRecord, ContentVersionRecord, DataTypeRecord, DomainRecord,
};
use crate::domain::types::{
    ContentId, ContentKind, ContentTypeId, DataTypeId, DomainId, VersionId,
};

#[derive(Clone)]
pub struct PostgresContentStore {
    pool: Arc<PgPool>,
}

impl PostgresContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(pool).await
    }

    async fn acquire(&self) -> Result<PoolConnection<Postgres>, RepoError> {
        self.pool.acquire().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl ContentReader for PostgresContentStore {
    async fn find_content(&self, id: ContentId) -> Result<Option<ContentRecord>, RepoError> {
        content::find_content(&mut *self.acquire().await?, id).await
    }

    async fn find_content_by_key(&self, key: Uuid) -> Result<Option<ContentRecord>, RepoError> {
        content::find_content_by_key(&mut *self.acquire().await?, key).await
    }

    async fn find_version(
        &self,
        id: ContentId,
        version: VersionId,
    ) -> Result<Option<ContentVersionRecord>, RepoError> {
        content::find_version(&mut *self.acquire().await?, id, version).await
    }

    async fn list_versions(&self, id: ContentId) -> Result<Vec<ContentVersionRecord>, RepoError> {
        content::list_versions(&mut *self.acquire().await?, id).await
    }

    async fn children(
        &self,
        parent: Option<ContentId>,
        kind: ContentKind,
    ) -> Result<Vec<ContentRecord>, RepoError> {
        content::children(&mut *self.acquire().await?, parent, kind).await
    }

    async fn descendants(&self, id: ContentId) -> Result<Vec<ContentRecord>, RepoError> {
        content::descendants(&mut *self.acquire().await?, id).await
    }

    async fn trashed_roots(&self, kind: ContentKind) -> Result<Vec<ContentRecord>, RepoError> {
        content::trashed_roots(&mut *self.acquire().await?, kind).await
    }

    async fn tagged(&self, tag: &str) -> Result<Vec<ContentId>, RepoError> {
        content::tagged(&mut *self.acquire().await?, tag).await
    }

    async fn due_for_release(&self, now: OffsetDateTime) -> Result<Vec<ContentId>, RepoError> {
        content::due_for_release(&mut *self.acquire().await?, now).await
    }

    async fn due_for_expiry(&self, now: OffsetDateTime) -> Result<Vec<ContentId>, RepoError> {
        content::due_for_expiry(&mut *self.acquire().await?, now).await
    }

    async fn find_content_type(
        &self,
        id: ContentTypeId,
    ) -> Result<Option<ContentTypeRecord>, RepoError> {
        structure::find_content_type(&mut *self.acquire().await?, id).await
    }

    async fn find_data_type(&self, id: DataTypeId) -> Result<Option<DataTypeRecord>, RepoError> {
        structure::find_data_type(&mut *self.acquire().await?, id).await
    }

    async fn list_domains(&self) -> Result<Vec<DomainRecord>, RepoError> {
        structure::list_domains(&mut *self.acquire().await?).await
    }
}

#[async_trait]
impl ContentStore for PostgresContentStore {
    async fn begin(&self) -> Result<Box<dyn ContentTransaction>, RepoError> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        query("SELECT 1")
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl ContentTransaction for PostgresTransaction {
    async fn find_content(&mut self, id: ContentId) -> Result<Option<ContentRecord>, RepoError> {
        content::find_content(self.conn(), id).await
    }

    async fn find_version(
        &mut self,
        id: ContentId,
        version: VersionId,
    ) -> Result<Option<ContentVersionRecord>, RepoError> {
        content::find_version(self.conn(), id, version).await
    }

    async fn list_versions(
        &mut self,
        id: ContentId,
    ) -> Result<Vec<ContentVersionRecord>, RepoError> {
        content::list_versions(self.conn(), id).await
    }

    async fn children(
        &mut self,
        parent: Option<ContentId>,
        kind: ContentKind,
    ) -> Result<Vec<ContentRecord>, RepoError> {
        content::children(self.conn(), parent, kind).await
    }

    async fn descendants(&mut self, id: ContentId) -> Result<Vec<ContentRecord>, RepoError> {
        content::descendants(self.conn(), id).await
    }

    async fn content_of_type(
        &mut self,
        content_type_id: ContentTypeId,
    ) -> Result<Vec<ContentRecord>, RepoError> {
        content::content_of_type(self.conn(), content_type_id).await
    }

    async fn find_content_type(
        &mut self,
        id: ContentTypeId,
    ) -> Result<Option<ContentTypeRecord>, RepoError> {
        structure::find_content_type(self.conn(), id).await
    }

    async fn content_types_using(
        &mut self,
        data_type_id: DataTypeId,
    ) -> Result<Vec<ContentTypeRecord>, RepoError> {
        structure::content_types_using(self.conn(), data_type_id).await
    }

    async fn find_data_type(
        &mut self,
        id: DataTypeId,
    ) -> Result<Option<DataTypeRecord>, RepoError> {
        structure::find_data_type(self.conn(), id).await
    }

    async fn find_domain(&mut self, id: DomainId) -> Result<Option<DomainRecord>, RepoError> {
        structure::find_domain(self.conn(), id).await
    }

    async fn list_domains(&mut self) -> Result<Vec<DomainRecord>, RepoError> {
        structure::list_domains(self.conn()).await
    }

    async fn insert_content(
        &mut self,
        params: NewContent,
    ) -> Result<(ContentRecord, ContentVersionRecord), RepoError> {
        content::insert_content(self.conn(), params).await
    }

    async fn insert_version(
        &mut self,
        params: NewVersion,
    ) -> Result<ContentVersionRecord, RepoError> {
        content::insert_version(self.conn(), params).await
    }

    async fn replace_version(&mut self, version: &ContentVersionRecord) -> Result<(), RepoError> {
        content::replace_version(self.conn(), version).await
    }

    async fn update_content(&mut self, record: &ContentRecord) -> Result<(), RepoError> {
        content::update_content(self.conn(), record).await
    }

    async fn delete_content(&mut self, id: ContentId) -> Result<(), RepoError> {
        content::delete_content(self.conn(), id).await
    }

    async fn delete_versions(
        &mut self,
        id: ContentId,
        versions: &[VersionId],
    ) -> Result<u64, RepoError> {
        content::delete_versions(self.conn(), id, versions).await
    }

    async fn save_content_type(
        &mut self,
        params: SaveContentType,
    ) -> Result<ContentTypeRecord, RepoError> {
        structure::save_content_type(self.conn(), params).await
    }

    async fn delete_content_type(&mut self, id: ContentTypeId) -> Result<(), RepoError> {
        structure::delete_content_type(self.conn(), id).await
    }

    async fn save_data_type(&mut self, params: SaveDataType) -> Result<DataTypeRecord, RepoError> {
        structure::save_data_type(self.conn(), params).await
    }

    async fn delete_data_type(&mut self, id: DataTypeId) -> Result<(), RepoError> {
        structure::delete_data_type(self.conn(), id).await
    }

    async fn save_domain(&mut self, params: SaveDomain) -> Result<DomainRecord, RepoError> {
        structure::save_domain(self.conn(), params).await
    }

    async fn delete_domain(&mut self, id: DomainId) -> Result<(), RepoError> {
        structure::delete_domain(self.conn(), id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepoError> {
        if let Err(err) = self.tx.rollback().await {
            warn!(error = %err, "Rolling back content transaction failed");
            return Err(map_sqlx_error(err));
        }
        Ok(())
    }
}
