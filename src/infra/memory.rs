//! In-memory content store.
//!
//! Readers see an immutable snapshot. A transaction clones the snapshot under
//! a single writer lock and swaps its staged copy in on commit, so readers
//! never observe a half-applied write and concurrent writers queue.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::application::repos::{
    ContentReader, ContentStore, ContentTransaction, NewContent, NewVersion, RepoError,
    SaveContentType, SaveDataType, SaveDomain,
};
use crate::domain::entities::{
    ContentRecord, ContentTypeRecord, ContentVersionRecord, DataTypeRecord, DomainRecord,
};
use crate::domain::path::ContentPath;
use crate::domain::types::{
    ContentId, ContentKind, ContentTypeId, DataTypeId, DomainId, VersionId,
};
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "infra::memory";

#[derive(Debug, Clone, Default)]
struct StoreState {
    content: BTreeMap<ContentId, ContentRecord>,
    versions: BTreeMap<VersionId, ContentVersionRecord>,
    content_types: BTreeMap<ContentTypeId, ContentTypeRecord>,
    data_types: BTreeMap<DataTypeId, DataTypeRecord>,
    domains: BTreeMap<DomainId, DomainRecord>,
    last_content_id: i32,
    last_version_id: i64,
    last_content_type_id: i32,
    last_data_type_id: i32,
    last_domain_id: i32,
}

impl StoreState {
    fn find_content(&self, id: ContentId) -> Option<ContentRecord> {
        self.content.get(&id).cloned()
    }

    fn find_content_by_key(&self, key: Uuid) -> Option<ContentRecord> {
        self.content.values().find(|record| record.key == key).cloned()
    }

    fn find_version(&self, id: ContentId, version: VersionId) -> Option<ContentVersionRecord> {
        self.versions
            .get(&version)
            .filter(|record| record.content_id == id)
            .cloned()
    }

    fn list_versions(&self, id: ContentId) -> Vec<ContentVersionRecord> {
        self.versions
            .values()
            .rev()
            .filter(|version| version.content_id == id)
            .cloned()
            .collect()
    }

    fn children(&self, parent: Option<ContentId>, kind: ContentKind) -> Vec<ContentRecord> {
        let mut children: Vec<ContentRecord> = self
            .content
            .values()
            .filter(|record| record.parent_id == parent && record.kind == kind)
            .cloned()
            .collect();
        children.sort_by_key(|record| (record.sort_order, record.id));
        children
    }

    fn descendants(&self, id: ContentId) -> Vec<ContentRecord> {
        let mut keyed: Vec<(Vec<(i32, ContentId)>, ContentRecord)> = self
            .content
            .values()
            .filter(|record| record.path.is_descendant_of(id))
            .map(|record| (self.document_order_key(&record.path), record.clone()))
            .collect();
        keyed.sort_by(|left, right| left.0.cmp(&right.0));
        keyed.into_iter().map(|(_, record)| record).collect()
    }

    fn document_order_key(&self, path: &ContentPath) -> Vec<(i32, ContentId)> {
        path.ids()
            .iter()
            .map(|id| {
                let sort_order = self.content.get(id).map_or(0, |record| record.sort_order);
                (sort_order, *id)
            })
            .collect()
    }

    fn trashed_roots(&self, kind: ContentKind) -> Vec<ContentRecord> {
        self.content
            .values()
            .filter(|record| record.kind == kind && record.trashed)
            .filter(|record| {
                record
                    .parent_id
                    .and_then(|parent| self.content.get(&parent))
                    .is_none_or(|parent| !parent.trashed)
            })
            .cloned()
            .collect()
    }

    fn tagged(&self, tag: &str) -> Vec<ContentId> {
        self.content
            .values()
            .filter(|record| !record.trashed)
            .filter_map(|record| {
                let published = record.published_version_id?;
                let version = self.versions.get(&published)?;
                version.tags.contains(tag).then_some(record.id)
            })
            .collect()
    }

    fn due_for_release(&self, now: OffsetDateTime) -> Vec<ContentId> {
        self.content
            .values()
            .filter(|record| record.kind == ContentKind::Document && !record.trashed)
            .filter(|record| !record.has_no_pending_changes())
            .filter(|record| record.release_date.is_some_and(|release| release <= now))
            .map(|record| record.id)
            .collect()
    }

    fn due_for_expiry(&self, now: OffsetDateTime) -> Vec<ContentId> {
        self.content
            .values()
            .filter(|record| record.kind == ContentKind::Document && record.is_published())
            .filter(|record| record.expire_date.is_some_and(|expire| expire <= now))
            .map(|record| record.id)
            .collect()
    }

    fn content_of_type(&self, content_type_id: ContentTypeId) -> Vec<ContentRecord> {
        self.content
            .values()
            .filter(|record| record.content_type_id == content_type_id)
            .cloned()
            .collect()
    }

    fn content_types_using(&self, data_type_id: DataTypeId) -> Vec<ContentTypeRecord> {
        self.content_types
            .values()
            .filter(|content_type| content_type.uses_data_type(data_type_id))
            .cloned()
            .collect()
    }

    fn insert_content(
        &mut self,
        params: NewContent,
    ) -> Result<(ContentRecord, ContentVersionRecord), RepoError> {
        if self.content.values().any(|record| record.key == params.key) {
            return Err(RepoError::Duplicate {
                constraint: "content_key_key".to_string(),
            });
        }
        if !self.content_types.contains_key(&params.content_type_id) {
            return Err(RepoError::InvalidInput {
                message: format!("content type {} does not exist", params.content_type_id),
            });
        }
        let parent_path = match params.parent_id {
            Some(parent_id) => Some(
                self.content
                    .get(&parent_id)
                    .map(|parent| parent.path.clone())
                    .ok_or_else(|| RepoError::InvalidInput {
                        message: format!("parent {parent_id} does not exist"),
                    })?,
            ),
            None => None,
        };

        self.last_content_id += 1;
        let id = ContentId(self.last_content_id);
        self.last_version_id += 1;
        let version_id = VersionId(self.last_version_id);

        let version = ContentVersionRecord {
            content_id: id,
            version_id,
            name: params.name.clone(),
            values: params.values,
            tags: params.tags,
            author: params.author,
            created_at: params.created_at,
        };
        let record = ContentRecord {
            id,
            key: params.key,
            kind: params.kind,
            content_type_id: params.content_type_id,
            parent_id: params.parent_id,
            path: match parent_path {
                Some(path) => path.child(id),
                None => ContentPath::root(id),
            },
            sort_order: params.sort_order,
            name: params.name,
            newest_version_id: version_id,
            published_version_id: None,
            trashed: false,
            release_date: params.release_date,
            expire_date: params.expire_date,
            created_at: params.created_at,
            updated_at: params.created_at,
        };

        self.versions.insert(version_id, version.clone());
        self.content.insert(id, record.clone());
        Ok((record, version))
    }

    fn insert_version(&mut self, params: NewVersion) -> Result<ContentVersionRecord, RepoError> {
        if !self.content.contains_key(&params.content_id) {
            return Err(RepoError::NotFound);
        }
        self.last_version_id += 1;
        let version = ContentVersionRecord {
            content_id: params.content_id,
            version_id: VersionId(self.last_version_id),
            name: params.name,
            values: params.values,
            tags: params.tags,
            author: params.author,
            created_at: params.created_at,
        };
        self.versions.insert(version.version_id, version.clone());
        Ok(version)
    }

    fn replace_version(&mut self, version: &ContentVersionRecord) -> Result<(), RepoError> {
        match self.versions.get_mut(&version.version_id) {
            Some(existing) if existing.content_id == version.content_id => {
                *existing = version.clone();
                Ok(())
            }
            _ => Err(RepoError::NotFound),
        }
    }

    fn update_content(&mut self, record: &ContentRecord) -> Result<(), RepoError> {
        match self.content.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(RepoError::NotFound),
        }
    }

    fn delete_content(&mut self, id: ContentId) -> Result<(), RepoError> {
        if self
            .content
            .values()
            .any(|record| record.parent_id == Some(id))
        {
            return Err(RepoError::integrity(format!(
                "content {id} still has children"
            )));
        }
        if self.content.remove(&id).is_none() {
            return Err(RepoError::NotFound);
        }
        self.versions.retain(|_, version| version.content_id != id);
        self.domains
            .retain(|_, domain| domain.root_content_id != id);
        Ok(())
    }

    fn delete_versions(&mut self, id: ContentId, versions: &[VersionId]) -> u64 {
        let before = self.versions.len();
        self.versions
            .retain(|version_id, version| version.content_id != id || !versions.contains(version_id));
        (before - self.versions.len()) as u64
    }

    fn save_content_type(&mut self, params: SaveContentType) -> Result<ContentTypeRecord, RepoError> {
        if self
            .content_types
            .values()
            .any(|existing| existing.alias == params.alias && Some(existing.id) != params.id)
        {
            return Err(RepoError::Duplicate {
                constraint: "content_types_alias_key".to_string(),
            });
        }
        let id = match params.id {
            Some(id) if self.content_types.contains_key(&id) => id,
            Some(_) => return Err(RepoError::NotFound),
            None => {
                self.last_content_type_id += 1;
                ContentTypeId(self.last_content_type_id)
            }
        };
        let record = ContentTypeRecord {
            id,
            alias: params.alias,
            item_type: params.item_type,
            properties: params.properties,
            updated_at: params.updated_at,
        };
        self.content_types.insert(id, record.clone());
        Ok(record)
    }

    fn delete_content_type(&mut self, id: ContentTypeId) -> Result<(), RepoError> {
        if self
            .content
            .values()
            .any(|record| record.content_type_id == id)
        {
            return Err(RepoError::integrity(format!(
                "content type {id} is still in use"
            )));
        }
        self.content_types
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }

    fn save_data_type(&mut self, params: SaveDataType) -> Result<DataTypeRecord, RepoError> {
        if self
            .data_types
            .values()
            .any(|existing| existing.key == params.key && Some(existing.id) != params.id)
        {
            return Err(RepoError::Duplicate {
                constraint: "data_types_key_key".to_string(),
            });
        }
        let id = match params.id {
            Some(id) if self.data_types.contains_key(&id) => id,
            Some(_) => return Err(RepoError::NotFound),
            None => {
                self.last_data_type_id += 1;
                DataTypeId(self.last_data_type_id)
            }
        };
        let record = DataTypeRecord {
            id,
            key: params.key,
            name: params.name,
            editor_alias: params.editor_alias,
        };
        self.data_types.insert(id, record.clone());
        Ok(record)
    }

    fn delete_data_type(&mut self, id: DataTypeId) -> Result<(), RepoError> {
        if !self.content_types_using(id).is_empty() {
            return Err(RepoError::integrity(format!(
                "data type {id} is referenced by a content type"
            )));
        }
        self.data_types
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }

    fn save_domain(&mut self, params: SaveDomain) -> Result<DomainRecord, RepoError> {
        if !self.content.contains_key(&params.root_content_id) {
            return Err(RepoError::InvalidInput {
                message: format!("content {} does not exist", params.root_content_id),
            });
        }
        if self.domains.values().any(|existing| {
            existing.host.eq_ignore_ascii_case(&params.host) && Some(existing.id) != params.id
        }) {
            return Err(RepoError::Duplicate {
                constraint: "domains_host_key".to_string(),
            });
        }
        let id = match params.id {
            Some(id) if self.domains.contains_key(&id) => id,
            Some(_) => return Err(RepoError::NotFound),
            None => {
                self.last_domain_id += 1;
                DomainId(self.last_domain_id)
            }
        };
        let record = DomainRecord {
            id,
            host: params.host,
            root_content_id: params.root_content_id,
        };
        self.domains.insert(id, record.clone());
        Ok(record)
    }

    fn delete_domain(&mut self, id: DomainId) -> Result<(), RepoError> {
        self.domains
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }
}

struct Inner {
    snapshot: RwLock<Arc<StoreState>>,
    writer: Arc<Mutex<()>>,
}

/// Content store kept entirely in process memory.
#[derive(Clone)]
pub struct InMemoryContentStore {
    inner: Arc<Inner>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                snapshot: RwLock::new(Arc::new(StoreState::default())),
                writer: Arc::new(Mutex::new(())),
            }),
        }
    }

    fn snapshot(&self) -> Arc<StoreState> {
        rw_read(&self.inner.snapshot, SOURCE, "snapshot").clone()
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentReader for InMemoryContentStore {
    async fn find_content(&self, id: ContentId) -> Result<Option<ContentRecord>, RepoError> {
        Ok(self.snapshot().find_content(id))
    }

    async fn find_content_by_key(&self, key: Uuid) -> Result<Option<ContentRecord>, RepoError> {
        Ok(self.snapshot().find_content_by_key(key))
    }

    async fn find_version(
        &self,
        id: ContentId,
        version: VersionId,
    ) -> Result<Option<ContentVersionRecord>, RepoError> {
        Ok(self.snapshot().find_version(id, version))
    }

    async fn list_versions(&self, id: ContentId) -> Result<Vec<ContentVersionRecord>, RepoError> {
        Ok(self.snapshot().list_versions(id))
    }

    async fn children(
        &self,
        parent: Option<ContentId>,
        kind: ContentKind,
    ) -> Result<Vec<ContentRecord>, RepoError> {
        Ok(self.snapshot().children(parent, kind))
    }

    async fn descendants(&self, id: ContentId) -> Result<Vec<ContentRecord>, RepoError> {
        Ok(self.snapshot().descendants(id))
    }

    async fn trashed_roots(&self, kind: ContentKind) -> Result<Vec<ContentRecord>, RepoError> {
        Ok(self.snapshot().trashed_roots(kind))
    }

    async fn tagged(&self, tag: &str) -> Result<Vec<ContentId>, RepoError> {
        Ok(self.snapshot().tagged(tag))
    }

    async fn due_for_release(&self, now: OffsetDateTime) -> Result<Vec<ContentId>, RepoError> {
        Ok(self.snapshot().due_for_release(now))
    }

    async fn due_for_expiry(&self, now: OffsetDateTime) -> Result<Vec<ContentId>, RepoError> {
        Ok(self.snapshot().due_for_expiry(now))
    }

    async fn find_content_type(
        &self,
        id: ContentTypeId,
    ) -> Result<Option<ContentTypeRecord>, RepoError> {
        Ok(self.snapshot().content_types.get(&id).cloned())
    }

    async fn find_data_type(&self, id: DataTypeId) -> Result<Option<DataTypeRecord>, RepoError> {
        Ok(self.snapshot().data_types.get(&id).cloned())
    }

    async fn list_domains(&self) -> Result<Vec<DomainRecord>, RepoError> {
        Ok(self.snapshot().domains.values().cloned().collect())
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn begin(&self) -> Result<Box<dyn ContentTransaction>, RepoError> {
        let guard = Arc::clone(&self.inner.writer).lock_owned().await;
        let staged = StoreState::clone(&self.snapshot());
        Ok(Box::new(InMemoryTransaction {
            staged,
            inner: Arc::clone(&self.inner),
            _guard: guard,
        }))
    }
}

struct InMemoryTransaction {
    staged: StoreState,
    inner: Arc<Inner>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl ContentTransaction for InMemoryTransaction {
    async fn find_content(&mut self, id: ContentId) -> Result<Option<ContentRecord>, RepoError> {
        Ok(self.staged.find_content(id))
    }

    async fn find_version(
        &mut self,
        id: ContentId,
        version: VersionId,
    ) -> Result<Option<ContentVersionRecord>, RepoError> {
        Ok(self.staged.find_version(id, version))
    }

    async fn list_versions(
        &mut self,
        id: ContentId,
    ) -> Result<Vec<ContentVersionRecord>, RepoError> {
        Ok(self.staged.list_versions(id))
    }

    async fn children(
        &mut self,
        parent: Option<ContentId>,
        kind: ContentKind,
    ) -> Result<Vec<ContentRecord>, RepoError> {
        Ok(self.staged.children(parent, kind))
    }

    async fn descendants(&mut self, id: ContentId) -> Result<Vec<ContentRecord>, RepoError> {
        Ok(self.staged.descendants(id))
    }

    async fn content_of_type(
        &mut self,
        content_type_id: ContentTypeId,
    ) -> Result<Vec<ContentRecord>, RepoError> {
        Ok(self.staged.content_of_type(content_type_id))
    }

    async fn find_content_type(
        &mut self,
        id: ContentTypeId,
    ) -> Result<Option<ContentTypeRecord>, RepoError> {
        Ok(self.staged.content_types.get(&id).cloned())
    }

    async fn content_types_using(
        &mut self,
        data_type_id: DataTypeId,
    ) -> Result<Vec<ContentTypeRecord>, RepoError> {
        Ok(self.staged.content_types_using(data_type_id))
    }

    async fn find_data_type(
        &mut self,
        id: DataTypeId,
    ) -> Result<Option<DataTypeRecord>, RepoError> {
        Ok(self.staged.data_types.get(&id).cloned())
    }

    async fn find_domain(&mut self, id: DomainId) -> Result<Option<DomainRecord>, RepoError> {
        Ok(self.staged.domains.get(&id).cloned())
    }

    async fn list_domains(&mut self) -> Result<Vec<DomainRecord>, RepoError> {
        Ok(self.staged.domains.values().cloned().collect())
    }

    async fn insert_content(
        &mut self,
        params: NewContent,
    ) -> Result<(ContentRecord, ContentVersionRecord), RepoError> {
        self.staged.insert_content(params)
    }

    async fn insert_version(
        &mut self,
        params: NewVersion,
    ) -> Result<ContentVersionRecord, RepoError> {
        self.staged.insert_version(params)
    }

    async fn replace_version(&mut self, version: &ContentVersionRecord) -> Result<(), RepoError> {
        self.staged.replace_version(version)
    }

    async fn update_content(&mut self, record: &ContentRecord) -> Result<(), RepoError> {
        self.staged.update_content(record)
    }

    async fn delete_content(&mut self, id: ContentId) -> Result<(), RepoError> {
        self.staged.delete_content(id)
    }

    async fn delete_versions(
        &mut self,
        id: ContentId,
        versions: &[VersionId],
    ) -> Result<u64, RepoError> {
        Ok(self.staged.delete_versions(id, versions))
    }

    async fn save_content_type(
        &mut self,
        params: SaveContentType,
    ) -> Result<ContentTypeRecord, RepoError> {
        self.staged.save_content_type(params)
    }

    async fn delete_content_type(&mut self, id: ContentTypeId) -> Result<(), RepoError> {
        self.staged.delete_content_type(id)
    }

    async fn save_data_type(&mut self, params: SaveDataType) -> Result<DataTypeRecord, RepoError> {
        self.staged.save_data_type(params)
    }

    async fn delete_data_type(&mut self, id: DataTypeId) -> Result<(), RepoError> {
        self.staged.delete_data_type(id)
    }

    async fn save_domain(&mut self, params: SaveDomain) -> Result<DomainRecord, RepoError> {
        self.staged.save_domain(params)
    }

    async fn delete_domain(&mut self, id: DomainId) -> Result<(), RepoError> {
        self.staged.delete_domain(id)
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        let InMemoryTransaction {
            staged,
            inner,
            _guard,
        } = *self;
        *rw_write(&inner.snapshot, SOURCE, "commit") = Arc::new(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepoError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::domain::entities::PropertyValues;
    use crate::domain::types::ItemType;

    async fn seed_type(store: &InMemoryContentStore) -> ContentTypeId {
        let mut tx = store.begin().await.expect("begin");
        let content_type = tx
            .save_content_type(SaveContentType {
                id: None,
                alias: "page".to_string(),
                item_type: ItemType::Content,
                properties: Vec::new(),
                updated_at: OffsetDateTime::UNIX_EPOCH,
            })
            .await
            .expect("save type");
        tx.commit().await.expect("commit");
        content_type.id
    }

    fn new_content(
        content_type_id: ContentTypeId,
        parent_id: Option<ContentId>,
        name: &str,
        sort_order: i32,
    ) -> NewContent {
        NewContent {
            key: Uuid::new_v4(),
            kind: ContentKind::Document,
            content_type_id,
            parent_id,
            sort_order,
            name: name.to_string(),
            values: PropertyValues::new(),
            tags: BTreeSet::new(),
            author: "tester".to_string(),
            release_date: None,
            expire_date: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_to_readers() {
        let store = InMemoryContentStore::new();
        let type_id = seed_type(&store).await;

        let mut tx = store.begin().await.expect("begin");
        let (record, _) = tx
            .insert_content(new_content(type_id, None, "Home", 0))
            .await
            .expect("insert");
        assert!(
            store
                .find_content(record.id)
                .await
                .expect("read")
                .is_none()
        );
        assert!(tx.find_content(record.id).await.expect("tx read").is_some());

        tx.rollback().await.expect("rollback");
        assert!(
            store
                .find_content(record.id)
                .await
                .expect("read")
                .is_none()
        );
    }

    #[tokio::test]
    async fn paths_and_document_order_follow_the_tree() {
        let store = InMemoryContentStore::new();
        let type_id = seed_type(&store).await;

        let mut tx = store.begin().await.expect("begin");
        let (home, _) = tx
            .insert_content(new_content(type_id, None, "Home", 0))
            .await
            .expect("home");
        let (second, _) = tx
            .insert_content(new_content(type_id, Some(home.id), "Second", 2))
            .await
            .expect("second");
        let (first, _) = tx
            .insert_content(new_content(type_id, Some(home.id), "First", 1))
            .await
            .expect("first");
        let (leaf, _) = tx
            .insert_content(new_content(type_id, Some(first.id), "Leaf", 0))
            .await
            .expect("leaf");
        tx.commit().await.expect("commit");

        assert_eq!(leaf.path.ids(), &[home.id, first.id, leaf.id]);
        let order: Vec<ContentId> = store
            .descendants(home.id)
            .await
            .expect("descendants")
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(order, vec![first.id, leaf.id, second.id]);
    }

    #[tokio::test]
    async fn deleting_a_parent_with_children_is_refused() {
        let store = InMemoryContentStore::new();
        let type_id = seed_type(&store).await;

        let mut tx = store.begin().await.expect("begin");
        let (home, _) = tx
            .insert_content(new_content(type_id, None, "Home", 0))
            .await
            .expect("home");
        tx.insert_content(new_content(type_id, Some(home.id), "Child", 0))
            .await
            .expect("child");

        assert!(matches!(
            tx.delete_content(home.id).await,
            Err(RepoError::Integrity { .. })
        ));
    }
}
