//! Read projection of the content tree.
//!
//! The projection is a pure function of the store and the preview flag: on a
//! miss an entry is rebuilt from the store, and channels purge entries when
//! the store changes. The published view hides trashed and unpublished
//! entities and everything below an unpublished or trashed ancestor; the
//! draft view shows the newest version of every entity outside the recycle
//! bin.
//!
//! Absence is cached as well, so a purge must also reach entries that were
//! hidden. Every purge bumps an epoch under the write side of `gate`; a
//! rebuilt entry is stored only if the epoch it started under is still
//! current, otherwise the caller gets it uncached.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use super::query::{Axis, Query, QueryError};
use crate::application::repos::{ContentReader, RepoError};
use crate::domain::entities::{
    ContentRecord, ContentTypeRecord, DataTypeRecord, DomainRecord, PropertyValues,
};
use crate::domain::path::ContentPath;
use crate::domain::slug::url_segment;
use crate::domain::types::{
    ContentId, ContentKind, ContentTypeId, DataTypeId, Preview, VersionId,
};
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::projection";
const METRIC_PROJECTION_HIT: &str = "vellum_projection_hit_total";
const METRIC_PROJECTION_MISS: &str = "vellum_projection_miss_total";
const METRIC_PROJECTION_PURGED: &str = "vellum_projection_purged_total";

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("content {content} references missing content type {content_type}")]
    MissingContentType {
        content: ContentId,
        content_type: ContentTypeId,
    },
}

/// One entity as the read side sees it under a given preview flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedContent {
    pub id: ContentId,
    pub key: Uuid,
    pub kind: ContentKind,
    pub content_type_id: ContentTypeId,
    pub content_type_alias: String,
    pub parent_id: Option<ContentId>,
    pub path: ContentPath,
    pub level: usize,
    pub sort_order: i32,
    pub name: String,
    pub url_segment: String,
    pub version_id: VersionId,
    pub values: PropertyValues,
    pub tags: BTreeSet<String>,
    pub author: String,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct EntryKey {
    preview: Preview,
    id: ContentId,
}

#[derive(Debug, Clone)]
enum CachedEntry {
    Present(Arc<ProjectedContent>),
    /// The entity exists but this view must not show it.
    Hidden { path: ContentPath, kind: ContentKind },
    Missing,
}

impl CachedEntry {
    fn in_branch(&self, key: &EntryKey, root: ContentId) -> bool {
        match self {
            CachedEntry::Present(content) => content.path.contains(root),
            CachedEntry::Hidden { path, .. } => path.contains(root),
            CachedEntry::Missing => key.id == root,
        }
    }

    fn kind(&self) -> Option<ContentKind> {
        match self {
            CachedEntry::Present(content) => Some(content.kind),
            CachedEntry::Hidden { kind, .. } => Some(*kind),
            CachedEntry::Missing => None,
        }
    }

    fn visible(self) -> Option<Arc<ProjectedContent>> {
        match self {
            CachedEntry::Present(content) => Some(content),
            _ => None,
        }
    }
}

pub struct ProjectionCache {
    store: Arc<dyn ContentReader>,
    entries: DashMap<EntryKey, CachedEntry>,
    content_types: DashMap<ContentTypeId, Arc<ContentTypeRecord>>,
    data_types: DashMap<DataTypeId, Arc<DataTypeRecord>>,
    domains: RwLock<Option<Arc<Vec<DomainRecord>>>>,
    routes: DashMap<(Preview, String), ContentId>,
    tags: DashMap<String, Arc<Vec<ContentId>>>,
    epoch: AtomicU64,
    gate: RwLock<()>,
}

impl ProjectionCache {
    pub fn new(store: Arc<dyn ContentReader>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            content_types: DashMap::new(),
            data_types: DashMap::new(),
            domains: RwLock::new(None),
            routes: DashMap::new(),
            tags: DashMap::new(),
            epoch: AtomicU64::new(0),
            gate: RwLock::new(()),
        }
    }

    /// Cached entity count across both views.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_by_id(
        &self,
        preview: Preview,
        id: ContentId,
    ) -> Result<Option<Arc<ProjectedContent>>, ProjectionError> {
        Ok(self
            .entry(preview, id)
            .await?
            .visible()
            .filter(|content| content.kind == ContentKind::Document))
    }

    /// Media items are published on save, so only the published view applies.
    pub async fn get_media(
        &self,
        id: ContentId,
    ) -> Result<Option<Arc<ProjectedContent>>, ProjectionError> {
        Ok(self
            .entry(Preview::Published, id)
            .await?
            .visible()
            .filter(|content| content.kind == ContentKind::Media))
    }

    /// Visible root documents in sort order.
    pub async fn get_at_root(
        &self,
        preview: Preview,
    ) -> Result<Vec<Arc<ProjectedContent>>, ProjectionError> {
        let roots = self.store.children(None, ContentKind::Document).await?;
        self.resolve_all(preview, roots.iter().map(|record| record.id))
            .await
    }

    pub async fn has_content(&self, preview: Preview) -> Result<bool, ProjectionError> {
        Ok(!self.get_at_root(preview).await?.is_empty())
    }

    /// Visible children of a visible node, in sort order.
    pub async fn children(
        &self,
        preview: Preview,
        id: ContentId,
    ) -> Result<Vec<Arc<ProjectedContent>>, ProjectionError> {
        let Some(parent) = self.entry(preview, id).await?.visible() else {
            return Ok(Vec::new());
        };
        let children = self.store.children(Some(id), parent.kind).await?;
        self.resolve_all(preview, children.iter().map(|record| record.id))
            .await
    }

    /// Visible descendants of a visible node, in document order.
    pub async fn descendants(
        &self,
        preview: Preview,
        id: ContentId,
    ) -> Result<Vec<Arc<ProjectedContent>>, ProjectionError> {
        if self.entry(preview, id).await?.visible().is_none() {
            return Ok(Vec::new());
        }
        let descendants = self.store.descendants(id).await?;
        self.resolve_all(preview, descendants.iter().map(|record| record.id))
            .await
    }

    /// Resolve `/segment/segment` from the roots; `/` is the first visible root.
    pub async fn get_by_route(
        &self,
        preview: Preview,
        route: &str,
    ) -> Result<Option<Arc<ProjectedContent>>, ProjectionError> {
        let route_key = normalize_route(route);
        if let Some(id) = self.cached_route(preview, &route_key) {
            return self.get_by_id(preview, id).await;
        }

        let epoch = self.epoch();
        let segments = route_segments(&route_key);
        let roots = self.get_at_root(preview).await?;
        let resolved = match segments.split_first() {
            None => roots.into_iter().next(),
            Some((first, rest)) => {
                match roots.into_iter().find(|root| root.url_segment == *first) {
                    Some(root) => self.walk(preview, root, rest).await?,
                    None => None,
                }
            }
        };

        if let Some(content) = &resolved {
            self.store_route(preview, route_key, content.id, epoch);
        }
        Ok(resolved)
    }

    /// Resolve a path below the root node assigned to `host`.
    pub async fn get_by_host_route(
        &self,
        preview: Preview,
        host: &str,
        path: &str,
    ) -> Result<Option<Arc<ProjectedContent>>, ProjectionError> {
        let domains = self.domains().await?;
        let Some(domain) = domains
            .iter()
            .find(|domain| domain.host.eq_ignore_ascii_case(host.trim()))
        else {
            return Ok(None);
        };

        let route_key = format!("{}{}", domain.root_content_id, normalize_route(path));
        if let Some(id) = self.cached_route(preview, &route_key) {
            return self.get_by_id(preview, id).await;
        }

        let epoch = self.epoch();
        let Some(root) = self.get_by_id(preview, domain.root_content_id).await? else {
            return Ok(None);
        };
        let normalized = normalize_route(path);
        let segments = route_segments(&normalized);
        let resolved = self.walk(preview, root, &segments).await?;
        if let Some(content) = &resolved {
            self.store_route(preview, route_key, content.id, epoch);
        }
        Ok(resolved)
    }

    /// Published documents carrying `tag`, in id order.
    pub async fn tagged(&self, tag: &str) -> Result<Vec<Arc<ProjectedContent>>, ProjectionError> {
        let cached = self.tags.get(tag).map(|ids| Arc::clone(ids.value()));
        let ids = match cached {
            Some(ids) => ids,
            None => {
                let epoch = self.epoch();
                let ids = Arc::new(self.store.tagged(tag).await?);
                let _gate = rw_read(&self.gate, SOURCE, "tagged.store");
                if self.epoch() == epoch {
                    self.tags.insert(tag.to_string(), Arc::clone(&ids));
                }
                ids
            }
        };
        let mut tagged = Vec::with_capacity(ids.len());
        for id in ids.iter() {
            if let Some(content) = self.get_by_id(Preview::Published, *id).await? {
                tagged.push(content);
            }
        }
        Ok(tagged)
    }

    /// Evaluate a structural query; results keep first-seen order without duplicates.
    pub async fn query(
        &self,
        preview: Preview,
        expression: &str,
    ) -> Result<Vec<Arc<ProjectedContent>>, ProjectionError> {
        let query = Query::parse(expression)?;
        let mut context: Option<Vec<Arc<ProjectedContent>>> = None;

        for step in query.steps() {
            let mut candidates = Vec::new();
            match (&context, step.axis) {
                (None, Axis::Child) => candidates = self.get_at_root(preview).await?,
                (None, Axis::Descendant) => {
                    for root in self.get_at_root(preview).await? {
                        let below = self.descendants(preview, root.id).await?;
                        candidates.push(root);
                        candidates.extend(below);
                    }
                }
                (Some(nodes), Axis::Child) => {
                    for node in nodes {
                        candidates.extend(self.children(preview, node.id).await?);
                    }
                }
                (Some(nodes), Axis::Descendant) => {
                    for node in nodes {
                        candidates.extend(self.descendants(preview, node.id).await?);
                    }
                }
            }

            let mut seen = HashSet::new();
            candidates.retain(|content| step.matches(content) && seen.insert(content.id));
            context = Some(candidates);
        }

        Ok(context.unwrap_or_default())
    }

    pub async fn content_type(
        &self,
        id: ContentTypeId,
    ) -> Result<Option<Arc<ContentTypeRecord>>, ProjectionError> {
        let cached = self.content_types.get(&id).map(|record| Arc::clone(record.value()));
        if cached.is_some() {
            return Ok(cached);
        }
        let epoch = self.epoch();
        let Some(record) = self.store.find_content_type(id).await? else {
            return Ok(None);
        };
        let record = Arc::new(record);
        let _gate = rw_read(&self.gate, SOURCE, "content_type.store");
        if self.epoch() == epoch {
            self.content_types.insert(id, Arc::clone(&record));
        }
        Ok(Some(record))
    }

    pub async fn data_type(
        &self,
        id: DataTypeId,
    ) -> Result<Option<Arc<DataTypeRecord>>, ProjectionError> {
        let cached = self.data_types.get(&id).map(|record| Arc::clone(record.value()));
        if cached.is_some() {
            return Ok(cached);
        }
        let epoch = self.epoch();
        let Some(record) = self.store.find_data_type(id).await? else {
            return Ok(None);
        };
        let record = Arc::new(record);
        let _gate = rw_read(&self.gate, SOURCE, "data_type.store");
        if self.epoch() == epoch {
            self.data_types.insert(id, Arc::clone(&record));
        }
        Ok(Some(record))
    }

    pub async fn domains(&self) -> Result<Arc<Vec<DomainRecord>>, ProjectionError> {
        let cached = rw_read(&self.domains, SOURCE, "domains").clone();
        if let Some(domains) = cached {
            return Ok(domains);
        }
        let epoch = self.epoch();
        let domains = Arc::new(self.store.list_domains().await?);
        let _gate = rw_read(&self.gate, SOURCE, "domains.store");
        if self.epoch() == epoch {
            *rw_write(&self.domains, SOURCE, "domains.store") = Some(Arc::clone(&domains));
        }
        Ok(domains)
    }

    // ------------------------------------------------------------------
    // Purges
    // ------------------------------------------------------------------

    /// Drop one entry of one view.
    pub fn purge(&self, preview: Preview, id: ContentId) -> usize {
        self.purge_where("purge", |key, _| key.preview == preview && key.id == id)
    }

    /// Drop `id` and every entry below it, in one view or both.
    pub fn purge_branch(&self, preview: Option<Preview>, id: ContentId) -> usize {
        self.purge_where("purge_branch", |key, entry| {
            preview.is_none_or(|preview| key.preview == preview) && entry.in_branch(key, id)
        })
    }

    pub fn clear_documents(&self) -> usize {
        self.purge_where("clear_documents", |_, entry| {
            entry.kind().is_none_or(|kind| kind == ContentKind::Document)
        })
    }

    pub fn clear_media(&self) -> usize {
        self.purge_where("clear_media", |_, entry| {
            entry.kind().is_none_or(|kind| kind == ContentKind::Media)
        })
    }

    /// Drop a content type and every entity of that type; returns the entity ids.
    pub fn purge_content_type(&self, id: ContentTypeId) -> Vec<ContentId> {
        let _gate = rw_write(&self.gate, SOURCE, "purge_content_type");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.content_types.remove(&id);

        let mut purged = BTreeSet::new();
        self.entries.retain(|key, entry| match entry {
            CachedEntry::Present(content) if content.content_type_id == id => {
                purged.insert(key.id);
                false
            }
            _ => true,
        });
        counter!(METRIC_PROJECTION_PURGED).increment(purged.len() as u64);
        purged.into_iter().collect()
    }

    /// Drop a data type and everything built from content types that use it.
    pub fn purge_data_type(&self, id: DataTypeId) -> Vec<ContentId> {
        let affected: Vec<ContentTypeId> = {
            let _gate = rw_write(&self.gate, SOURCE, "purge_data_type");
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.data_types.remove(&id);
            self.content_types
                .iter()
                .filter(|entry| entry.value().uses_data_type(id))
                .map(|entry| *entry.key())
                .collect()
        };
        let mut purged: BTreeSet<ContentId> = BTreeSet::new();
        for content_type in affected {
            purged.extend(self.purge_content_type(content_type));
        }
        purged.into_iter().collect()
    }

    pub fn clear_routes(&self) -> usize {
        let _gate = rw_write(&self.gate, SOURCE, "clear_routes");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let dropped = self.routes.len();
        self.routes.clear();
        dropped
    }

    pub fn clear_domains(&self) -> usize {
        let _gate = rw_write(&self.gate, SOURCE, "clear_domains");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let dropped = rw_write(&self.domains, SOURCE, "clear_domains")
            .take()
            .map_or(0, |domains| domains.len());
        let routes = self.routes.len();
        self.routes.clear();
        dropped + routes
    }

    pub fn clear_tags(&self) -> usize {
        let _gate = rw_write(&self.gate, SOURCE, "clear_tags");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let dropped = self.tags.len();
        self.tags.clear();
        dropped
    }

    /// Drop the tag lists that mention `id`.
    pub fn purge_tags_containing(&self, id: ContentId) -> usize {
        let _gate = rw_write(&self.gate, SOURCE, "purge_tags_containing");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let before = self.tags.len();
        self.tags.retain(|_, ids| !ids.contains(&id));
        before - self.tags.len()
    }

    /// Drop everything, structure caches included.
    pub fn clear_all(&self) -> usize {
        let _gate = rw_write(&self.gate, SOURCE, "clear_all");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let dropped = self.entries.len();
        self.entries.clear();
        self.content_types.clear();
        self.data_types.clear();
        self.routes.clear();
        self.tags.clear();
        *rw_write(&self.domains, SOURCE, "clear_all") = None;
        counter!(METRIC_PROJECTION_PURGED).increment(dropped as u64);
        dropped
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn purge_where<F>(&self, op: &'static str, mut predicate: F) -> usize
    where
        F: FnMut(&EntryKey, &CachedEntry) -> bool,
    {
        let _gate = rw_write(&self.gate, SOURCE, op);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let before = self.entries.len();
        self.entries.retain(|key, entry| !predicate(key, &*entry));
        let dropped = before.saturating_sub(self.entries.len());
        debug!(op, dropped, "Projection entries purged");
        counter!(METRIC_PROJECTION_PURGED).increment(dropped as u64);
        dropped
    }

    async fn entry(&self, preview: Preview, id: ContentId) -> Result<CachedEntry, ProjectionError> {
        let key = EntryKey { preview, id };
        let cached = self.entries.get(&key).map(|entry| entry.value().clone());
        if let Some(entry) = cached {
            counter!(METRIC_PROJECTION_HIT).increment(1);
            return Ok(entry);
        }
        counter!(METRIC_PROJECTION_MISS).increment(1);

        let epoch = self.epoch();
        let entry = self.build(preview, id).await?;

        let _gate = rw_read(&self.gate, SOURCE, "entry.store");
        if self.epoch() == epoch {
            self.entries.insert(key, entry.clone());
        } else {
            debug!(%id, ?preview, "Projection changed during rebuild; entry not cached");
        }
        Ok(entry)
    }

    async fn build(&self, preview: Preview, id: ContentId) -> Result<CachedEntry, ProjectionError> {
        let Some(record) = self.store.find_content(id).await? else {
            return Ok(CachedEntry::Missing);
        };
        let hidden = |record: &ContentRecord| CachedEntry::Hidden {
            path: record.path.clone(),
            kind: record.kind,
        };
        if record.trashed {
            return Ok(hidden(&record));
        }

        let version_id = match preview {
            Preview::Draft => record.newest_version_id,
            Preview::Published => match record.published_version_id {
                Some(version_id) => version_id,
                None => return Ok(hidden(&record)),
            },
        };

        if preview == Preview::Published {
            for ancestor in record.path.ancestors() {
                let visible = self
                    .store
                    .find_content(*ancestor)
                    .await?
                    .is_some_and(|ancestor| ancestor.is_published() && !ancestor.trashed);
                if !visible {
                    return Ok(hidden(&record));
                }
            }
        }

        let Some(version) = self.store.find_version(id, version_id).await? else {
            warn!(%id, %version_id, "Content references a missing version");
            return Ok(CachedEntry::Missing);
        };
        let Some(content_type) = self.content_type(record.content_type_id).await? else {
            return Err(ProjectionError::MissingContentType {
                content: id,
                content_type: record.content_type_id,
            });
        };

        let segment = url_segment(&version.name).unwrap_or_else(|_| id.to_string());
        Ok(CachedEntry::Present(Arc::new(ProjectedContent {
            id,
            key: record.key,
            kind: record.kind,
            content_type_id: record.content_type_id,
            content_type_alias: content_type.alias.clone(),
            parent_id: record.parent_id,
            level: record.path.level(),
            path: record.path,
            sort_order: record.sort_order,
            name: version.name,
            url_segment: segment,
            version_id,
            values: version.values,
            tags: version.tags,
            author: version.author,
            updated_at: record.updated_at,
        })))
    }

    async fn resolve_all(
        &self,
        preview: Preview,
        ids: impl Iterator<Item = ContentId>,
    ) -> Result<Vec<Arc<ProjectedContent>>, ProjectionError> {
        let mut resolved = Vec::new();
        for id in ids {
            if let Some(content) = self.entry(preview, id).await?.visible() {
                resolved.push(content);
            }
        }
        Ok(resolved)
    }

    async fn walk(
        &self,
        preview: Preview,
        start: Arc<ProjectedContent>,
        segments: &[&str],
    ) -> Result<Option<Arc<ProjectedContent>>, ProjectionError> {
        let mut current = start;
        for segment in segments {
            let children = self.children(preview, current.id).await?;
            match children
                .into_iter()
                .find(|child| child.url_segment == *segment)
            {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    fn cached_route(&self, preview: Preview, route: &str) -> Option<ContentId> {
        self.routes
            .get(&(preview, route.to_string()))
            .map(|id| *id.value())
    }

    fn store_route(&self, preview: Preview, route: String, id: ContentId, epoch: u64) {
        let _gate = rw_read(&self.gate, SOURCE, "store_route");
        if self.epoch() == epoch {
            self.routes.insert((preview, route), id);
        }
    }
}

/// Lowercased, `/`-prefixed, without a trailing slash (except for `/`).
fn normalize_route(route: &str) -> String {
    let trimmed = route.trim().trim_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    format!("/{}", trimmed.to_lowercase())
}

fn route_segments(route: &str) -> Vec<&str> {
    route.split('/').filter(|segment| !segment.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::application::repos::{
        ContentStore, NewContent, SaveContentType, SaveDomain,
    };
    use crate::domain::entities::PropertyTypeRecord;
    use crate::domain::types::ItemType;
    use crate::infra::memory::InMemoryContentStore;

    struct Tree {
        store: InMemoryContentStore,
        home: ContentRecord,
        about: ContentRecord,
        team: ContentRecord,
    }

    fn new_content(
        content_type_id: ContentTypeId,
        parent_id: Option<ContentId>,
        name: &str,
        sort_order: i32,
    ) -> NewContent {
        let mut values = PropertyValues::new();
        values.insert("title".to_string(), json!(format!("{name} title")));
        NewContent {
            key: Uuid::new_v4(),
            kind: ContentKind::Document,
            content_type_id,
            parent_id,
            sort_order,
            name: name.to_string(),
            values,
            tags: BTreeSet::from(["news".to_string()]),
            author: "editor".to_string(),
            release_date: None,
            expire_date: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    /// Home > About > Team, with Home and About published.
    async fn tree() -> Tree {
        let store = InMemoryContentStore::new();
        let mut tx = store.begin().await.expect("begin");
        let page = tx
            .save_content_type(SaveContentType {
                id: None,
                alias: "page".to_string(),
                item_type: ItemType::Content,
                properties: vec![PropertyTypeRecord {
                    alias: "title".to_string(),
                    data_type_id: DataTypeId(1),
                    mandatory: false,
                }],
                updated_at: OffsetDateTime::UNIX_EPOCH,
            })
            .await
            .expect("type");
        let (mut home, _) = tx
            .insert_content(new_content(page.id, None, "Home", 0))
            .await
            .expect("home");
        let (mut about, _) = tx
            .insert_content(new_content(page.id, Some(home.id), "About Us", 0))
            .await
            .expect("about");
        let (team, _) = tx
            .insert_content(new_content(page.id, Some(about.id), "Team", 0))
            .await
            .expect("team");
        home.published_version_id = Some(home.newest_version_id);
        about.published_version_id = Some(about.newest_version_id);
        tx.update_content(&home).await.expect("publish home");
        tx.update_content(&about).await.expect("publish about");
        tx.save_domain(SaveDomain {
            id: None,
            host: "example.org".to_string(),
            root_content_id: home.id,
        })
        .await
        .expect("domain");
        tx.commit().await.expect("commit");

        Tree {
            store,
            home,
            about,
            team,
        }
    }

    async fn set_published(store: &InMemoryContentStore, record: &ContentRecord, published: bool) {
        let mut tx = store.begin().await.expect("begin");
        let mut record = tx
            .find_content(record.id)
            .await
            .expect("find")
            .expect("exists");
        record.published_version_id = published.then_some(record.newest_version_id);
        tx.update_content(&record).await.expect("update");
        tx.commit().await.expect("commit");
    }

    fn projection(tree: &Tree) -> ProjectionCache {
        ProjectionCache::new(Arc::new(tree.store.clone()))
    }

    #[tokio::test]
    async fn published_view_hides_unpublished_entities() {
        let tree = tree().await;
        let cache = projection(&tree);

        assert!(
            cache
                .get_by_id(Preview::Published, tree.team.id)
                .await
                .expect("read")
                .is_none()
        );
        let draft = cache
            .get_by_id(Preview::Draft, tree.team.id)
            .await
            .expect("read")
            .expect("visible in preview");
        assert_eq!(draft.name, "Team");
        assert_eq!(draft.level, 3);
        assert_eq!(draft.content_type_alias, "page");
    }

    #[tokio::test]
    async fn unpublished_ancestor_masks_descendants_until_branch_purge() {
        let tree = tree().await;
        let cache = projection(&tree);
        set_published(&tree.store, &tree.team, true).await;

        assert!(
            cache
                .get_by_id(Preview::Published, tree.team.id)
                .await
                .expect("read")
                .is_some()
        );

        set_published(&tree.store, &tree.about, false).await;
        assert!(
            cache
                .get_by_id(Preview::Published, tree.team.id)
                .await
                .expect("read")
                .is_some(),
            "stale until purged"
        );

        cache.purge_branch(Some(Preview::Published), tree.about.id);
        assert!(
            cache
                .get_by_id(Preview::Published, tree.team.id)
                .await
                .expect("read")
                .is_none()
        );

        set_published(&tree.store, &tree.about, true).await;
        cache.purge_branch(Some(Preview::Published), tree.about.id);
        assert!(
            cache
                .get_by_id(Preview::Published, tree.team.id)
                .await
                .expect("read")
                .is_some(),
            "hidden entries are dropped by branch purges too"
        );
    }

    #[tokio::test]
    async fn branch_purge_is_idempotent() {
        let tree = tree().await;
        let cache = projection(&tree);
        for preview in [Preview::Draft, Preview::Published] {
            cache.descendants(preview, tree.home.id).await.expect("warm");
        }
        let first = cache.purge_branch(None, tree.about.id);
        let second = cache.purge_branch(None, tree.about.id);
        assert_eq!(first, 4);
        assert_eq!(second, 0);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn routes_resolve_from_roots_and_hosts() {
        let tree = tree().await;
        let cache = projection(&tree);

        let root = cache
            .get_by_route(Preview::Published, "/")
            .await
            .expect("route")
            .expect("home");
        assert_eq!(root.id, tree.home.id);

        let about = cache
            .get_by_route(Preview::Published, "/home/about-us/")
            .await
            .expect("route")
            .expect("about");
        assert_eq!(about.id, tree.about.id);

        let team = cache
            .get_by_host_route(Preview::Draft, "EXAMPLE.org", "/about-us/team")
            .await
            .expect("route")
            .expect("team in preview");
        assert_eq!(team.id, tree.team.id);
        assert!(
            cache
                .get_by_host_route(Preview::Published, "example.org", "/about-us/team")
                .await
                .expect("route")
                .is_none()
        );
        assert!(
            cache
                .get_by_host_route(Preview::Published, "unknown.org", "/")
                .await
                .expect("route")
                .is_none()
        );
    }

    #[tokio::test]
    async fn queries_walk_the_visible_tree() {
        let tree = tree().await;
        let cache = projection(&tree);

        let all = cache.query(Preview::Draft, "//page").await.expect("query");
        assert_eq!(all.len(), 3);

        let published = cache
            .query(Preview::Published, "//page")
            .await
            .expect("query");
        assert_eq!(published.len(), 2);

        let about = cache
            .query(Preview::Draft, "/page/page[@name='About Us']")
            .await
            .expect("query");
        assert_eq!(about.len(), 1);
        assert_eq!(about[0].id, tree.about.id);

        let by_property = cache
            .query(Preview::Draft, "//*[title='Team title']")
            .await
            .expect("query");
        assert_eq!(by_property[0].id, tree.team.id);

        assert!(matches!(
            cache.query(Preview::Draft, "page").await,
            Err(ProjectionError::Query(QueryError::Relative))
        ));
    }

    #[tokio::test]
    async fn tagged_lists_published_documents_only() {
        let tree = tree().await;
        let cache = projection(&tree);
        let ids: Vec<ContentId> = cache
            .tagged("news")
            .await
            .expect("tagged")
            .iter()
            .map(|content| content.id)
            .collect();
        assert_eq!(ids, vec![tree.home.id, tree.about.id]);
    }

    #[tokio::test]
    async fn rebuilt_entries_are_cached_and_dropped_with_their_type() {
        let tree = tree().await;
        let cache = projection(&tree);

        let epoch = cache.epoch();
        cache.purge(Preview::Draft, tree.home.id);
        assert_ne!(cache.epoch(), epoch);

        cache
            .get_by_id(Preview::Draft, tree.home.id)
            .await
            .expect("read");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_content_type(ContentTypeId(1)), vec![tree.home.id]);
        assert!(cache.is_empty());
    }
}
