use std::collections::{HashMap, HashSet};

use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::application::repos::{NewContent, NewVersion};
use crate::application::unit_of_work::WriteScope;
use crate::cache::{ChangeKind, ChangeTypes, ContentChange, DomainChange};
use crate::domain::entities::{ContentRecord, ContentVersionRecord};
use crate::domain::error::DomainError;
use crate::domain::path::ContentPath;
use crate::domain::publish::{
    BranchPublishOutcome, PublishCandidate, PublishOutcome, PublishStatus, check_publishable,
};
use crate::domain::slug::unique_sibling_name;
use crate::domain::types::{ContentId, VersionId};

use super::service::ContentService;
use super::types::{
    ContentServiceError, SaveContentCommand, SaveTarget, ScheduledRun, ensure_same_kind,
};

impl ContentService {
    /// Create an entity or write a new draft of an existing one.
    #[instrument(skip(self, command), fields(kind = self.kind.as_str()))]
    pub async fn save(
        &self,
        actor: &str,
        command: SaveContentCommand,
    ) -> Result<ContentRecord, ContentServiceError> {
        let mut scope = self.begin().await?;
        let result = self.save_in(&mut scope, actor, command).await;
        self.finish(scope, result).await
    }

    /// Publish the draft of `id`. Guard failures come back as an outcome and
    /// leave the store untouched.
    #[instrument(skip(self), fields(kind = self.kind.as_str()))]
    pub async fn publish(
        &self,
        id: ContentId,
        force: bool,
    ) -> Result<PublishOutcome, ContentServiceError> {
        let mut scope = self.begin().await?;
        match self.publish_in(&mut scope, id, force).await {
            Ok(outcome) if !outcome.is_success() => {
                scope.abandon().await?;
                Ok(outcome)
            }
            result => self.finish(scope, result).await,
        }
    }

    /// Publish `id` and its descendants top-down in one write. Every node is
    /// judged on its own; successes commit even when some nodes are refused.
    #[instrument(skip(self), fields(kind = self.kind.as_str()))]
    pub async fn publish_with_children(
        &self,
        id: ContentId,
        force: bool,
    ) -> Result<BranchPublishOutcome, ContentServiceError> {
        let mut scope = self.begin().await?;
        let result = self.publish_branch_in(&mut scope, id, force).await;
        self.finish(scope, result).await
    }

    /// Returns `false` when `id` was not published.
    #[instrument(skip(self), fields(kind = self.kind.as_str()))]
    pub async fn unpublish(&self, id: ContentId) -> Result<bool, ContentServiceError> {
        let mut scope = self.begin().await?;
        let result: Result<bool, ContentServiceError> = async {
            let mut entity = self.load(&mut scope, id).await?;
            self.unpublish_in(&mut scope, &mut entity).await
        }
        .await;
        self.finish(scope, result).await
    }

    /// Trash `id` with its subtree. Returns `false` when it was already trashed.
    #[instrument(skip(self), fields(kind = self.kind.as_str()))]
    pub async fn move_to_recycle_bin(&self, id: ContentId) -> Result<bool, ContentServiceError> {
        let mut scope = self.begin().await?;
        let result = self.trash_in(&mut scope, id).await;
        self.finish(scope, result).await
    }

    /// Remove `id`, its subtree and every version. Returns how many entities went.
    #[instrument(skip(self), fields(kind = self.kind.as_str()))]
    pub async fn delete(&self, id: ContentId) -> Result<usize, ContentServiceError> {
        let mut scope = self.begin().await?;
        let result = self.delete_in(&mut scope, id).await;
        self.finish(scope, result).await
    }

    /// Copy an old version's values into a new draft version.
    #[instrument(skip(self), fields(kind = self.kind.as_str()))]
    pub async fn rollback(
        &self,
        actor: &str,
        id: ContentId,
        version: VersionId,
    ) -> Result<ContentVersionRecord, ContentServiceError> {
        let mut scope = self.begin().await?;
        let result = self.rollback_in(&mut scope, actor, id, version).await;
        self.finish(scope, result).await
    }

    /// Copy `id` under `parent`, optionally with its descendants. Copies start
    /// as drafts.
    #[instrument(skip(self), fields(kind = self.kind.as_str()))]
    pub async fn copy(
        &self,
        actor: &str,
        id: ContentId,
        parent: Option<ContentId>,
        recursive: bool,
    ) -> Result<ContentRecord, ContentServiceError> {
        let mut scope = self.begin().await?;
        let result = self.copy_in(&mut scope, actor, id, parent, recursive).await;
        self.finish(scope, result).await
    }

    /// Reorder the children of `parent`; `ordered` must list each exactly once.
    /// Returns how many siblings moved.
    #[instrument(skip(self, ordered), fields(kind = self.kind.as_str()))]
    pub async fn sort(
        &self,
        parent: Option<ContentId>,
        ordered: &[ContentId],
    ) -> Result<usize, ContentServiceError> {
        let mut scope = self.begin().await?;
        let result = self.sort_in(&mut scope, parent, ordered).await;
        self.finish(scope, result).await
    }

    /// Re-parent `id`. Moving a trashed subtree under a live parent restores it.
    #[instrument(skip(self), fields(kind = self.kind.as_str()))]
    pub async fn move_to(
        &self,
        id: ContentId,
        parent: Option<ContentId>,
    ) -> Result<ContentRecord, ContentServiceError> {
        let mut scope = self.begin().await?;
        let result = self.move_in(&mut scope, id, parent).await;
        self.finish(scope, result).await
    }

    /// Publish what has reached its release date and unpublish what expired.
    #[instrument(skip(self), fields(kind = self.kind.as_str()))]
    pub async fn publish_scheduled(
        &self,
        now: OffsetDateTime,
    ) -> Result<ScheduledRun, ContentServiceError> {
        let releases = self.store.due_for_release(now).await?;
        let expiries = self.store.due_for_expiry(now).await?;
        if releases.is_empty() && expiries.is_empty() {
            return Ok(ScheduledRun::default());
        }

        let mut scope = self.begin().await?.at(now);
        let result = self
            .schedule_in(&mut scope, &releases, &expiries)
            .await;
        self.finish(scope, result).await
    }

    /// Delete historical versions of `id`, keeping the newest, the published
    /// and the `keep_recent` most recent. Returns how many were deleted.
    #[instrument(skip(self), fields(kind = self.kind.as_str()))]
    pub async fn cleanup_versions(
        &self,
        id: ContentId,
        keep_recent: usize,
    ) -> Result<u64, ContentServiceError> {
        let mut scope = self.begin().await?;
        let result: Result<u64, ContentServiceError> = async {
            let entity = self.load(&mut scope, id).await?;
            let doomed: Vec<VersionId> = scope
                .tx()
                .list_versions(id)
                .await?
                .into_iter()
                .skip(keep_recent)
                .map(|version| version.version_id)
                .filter(|version| {
                    *version != entity.newest_version_id
                        && Some(*version) != entity.published_version_id
                })
                .collect();
            if doomed.is_empty() {
                return Ok(0);
            }
            Ok(scope.tx().delete_versions(id, &doomed).await?)
        }
        .await;
        self.finish(scope, result).await
    }

    /// Permanently delete everything in the recycle bin. Returns how many
    /// entities went.
    #[instrument(skip(self), fields(kind = self.kind.as_str()))]
    pub async fn empty_recycle_bin(&self) -> Result<usize, ContentServiceError> {
        let roots = self.store.trashed_roots(self.kind).await?;
        if roots.is_empty() {
            return Ok(0);
        }

        let mut scope = self.begin().await?;
        let result: Result<usize, ContentServiceError> = async {
            let mut deleted = 0;
            for root in roots {
                if let Some(current) = scope.tx().find_content(root.id).await?
                    && current.trashed
                {
                    deleted += self.delete_in(&mut scope, root.id).await?;
                }
            }
            Ok(deleted)
        }
        .await;
        self.finish(scope, result).await
    }

    pub(crate) async fn save_in(
        &self,
        scope: &mut WriteScope,
        actor: &str,
        command: SaveContentCommand,
    ) -> Result<ContentRecord, ContentServiceError> {
        let name = command.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("name must not be empty").into());
        }
        let now = scope.now();

        match command.target {
            SaveTarget::New {
                parent_id,
                content_type_id,
            } => {
                let content_type = scope
                    .tx()
                    .find_content_type(content_type_id)
                    .await?
                    .ok_or_else(|| DomainError::not_found("content type", content_type_id))?;
                if content_type.item_type.content_kind() != Some(self.kind) {
                    return Err(DomainError::validation(format!(
                        "content type `{}` cannot create {}",
                        content_type.alias,
                        self.kind.as_str()
                    ))
                    .into());
                }
                if let Some(parent_id) = parent_id {
                    let parent = self.find(scope, parent_id).await?;
                    if parent.kind != self.kind {
                        return Err(DomainError::validation(format!(
                            "{} cannot be created under {} {parent_id}",
                            self.kind.as_str(),
                            parent.kind.as_str()
                        ))
                        .into());
                    }
                    if parent.trashed {
                        return Err(DomainError::validation(format!(
                            "parent {parent_id} is in the recycle bin"
                        ))
                        .into());
                    }
                }

                let siblings = scope.tx().children(parent_id, self.kind).await?;
                let name = unique_sibling_name(&name, |candidate| {
                    siblings
                        .iter()
                        .any(|sibling| sibling.name.eq_ignore_ascii_case(candidate))
                })?;
                let sort_order = next_sort_order(&siblings);

                let (record, _) = scope
                    .tx()
                    .insert_content(NewContent {
                        key: Uuid::new_v4(),
                        kind: self.kind,
                        content_type_id,
                        parent_id,
                        sort_order,
                        name,
                        values: command.values,
                        tags: command.tags,
                        author: actor.to_string(),
                        release_date: command.release_date,
                        expire_date: command.expire_date,
                        created_at: now,
                    })
                    .await?;
                self.emit(scope, record.id, ChangeKind::NodeChanged);
                info!(id = %record.id, name = %record.name, "Content created");
                Ok(record)
            }
            SaveTarget::Existing(id) => {
                let mut entity = self.load(scope, id).await?;
                if entity.has_no_pending_changes() {
                    // The published version is immutable; edits start a new draft.
                    let version = scope
                        .tx()
                        .insert_version(NewVersion {
                            content_id: id,
                            name: name.clone(),
                            values: command.values,
                            tags: command.tags,
                            author: actor.to_string(),
                            created_at: now,
                        })
                        .await?;
                    entity.newest_version_id = version.version_id;
                } else {
                    let mut draft = self.version(scope, &entity, entity.newest_version_id).await?;
                    draft.name = name.clone();
                    draft.values = command.values;
                    draft.tags = command.tags;
                    draft.author = actor.to_string();
                    draft.created_at = now;
                    scope.tx().replace_version(&draft).await?;
                }

                entity.name = name;
                entity.release_date = command.release_date;
                entity.expire_date = command.expire_date;
                entity.updated_at = now;
                scope.tx().update_content(&entity).await?;
                self.emit(scope, id, ChangeKind::NodeChanged);
                debug!(%id, version = %entity.newest_version_id, "Draft saved");
                Ok(entity)
            }
        }
    }

    pub(crate) async fn publish_in(
        &self,
        scope: &mut WriteScope,
        id: ContentId,
        force: bool,
    ) -> Result<PublishOutcome, ContentServiceError> {
        let mut entity = self.load(scope, id).await?;
        let draft = self.version(scope, &entity, entity.newest_version_id).await?;
        let content_type = scope
            .tx()
            .find_content_type(entity.content_type_id)
            .await?
            .ok_or_else(|| DomainError::not_found("content type", entity.content_type_id))?;
        let ancestors = self.ancestors(scope, &entity).await?;

        let candidate = PublishCandidate {
            entity: &entity,
            draft: &draft,
            content_type: &content_type,
            ancestors: &ancestors,
            now: scope.now(),
        };
        if let Err(failure) = check_publishable(&candidate) {
            debug!(%id, code = failure.code(), "Publish refused");
            return Ok(PublishOutcome::failure(id, failure));
        }

        if entity.has_no_pending_changes() {
            if !force {
                return Ok(PublishOutcome::success(id, PublishStatus::AlreadyPublished));
            }
            self.emit(scope, id, ChangeKind::PublishedChanged);
            return Ok(PublishOutcome::success(id, PublishStatus::Republished));
        }

        let previous_tags = self.published_tags(scope, &entity).await?;
        entity.published_version_id = Some(entity.newest_version_id);
        entity.updated_at = scope.now();
        scope.tx().update_content(&entity).await?;

        self.emit(
            scope,
            id,
            ChangeKind::NodeChanged | ChangeKind::PublishedChanged,
        );
        if previous_tags != draft.tags {
            scope
                .changes()
                .tags(ContentChange::new(id, ChangeKind::NodeChanged));
        }
        info!(%id, version = %entity.newest_version_id, "Content published");
        Ok(PublishOutcome::success(id, PublishStatus::Published))
    }

    pub(crate) async fn publish_branch_in(
        &self,
        scope: &mut WriteScope,
        id: ContentId,
        force: bool,
    ) -> Result<BranchPublishOutcome, ContentServiceError> {
        let root = self.load(scope, id).await?;
        let mut ids = vec![root.id];
        ids.extend(
            scope
                .tx()
                .descendants(id)
                .await?
                .into_iter()
                .map(|record| record.id),
        );

        let mut outcomes = Vec::with_capacity(ids.len());
        for node in ids {
            outcomes.push(self.publish_in(scope, node, force).await?);
        }
        let branch = BranchPublishOutcome { outcomes };
        info!(
            %id,
            published = branch.published_ids().len(),
            nodes = branch.outcomes.len(),
            "Branch publish finished"
        );
        Ok(branch)
    }

    pub(crate) async fn unpublish_in(
        &self,
        scope: &mut WriteScope,
        entity: &mut ContentRecord,
    ) -> Result<bool, ContentServiceError> {
        if !entity.is_published() {
            return Ok(false);
        }
        let tags = self.published_tags(scope, entity).await?;
        entity.published_version_id = None;
        entity.updated_at = scope.now();
        scope.tx().update_content(entity).await?;

        self.emit(scope, entity.id, ChangeKind::NodeChanged | ChangeKind::Removed);
        if !tags.is_empty() {
            scope
                .changes()
                .tags(ContentChange::new(entity.id, ChangeKind::Removed));
        }
        info!(id = %entity.id, "Content unpublished");
        Ok(true)
    }

    pub(crate) async fn trash_in(
        &self,
        scope: &mut WriteScope,
        id: ContentId,
    ) -> Result<bool, ContentServiceError> {
        let root = self.load(scope, id).await?;
        if root.trashed {
            return Ok(false);
        }
        let mut nodes = vec![root];
        nodes.extend(scope.tx().descendants(id).await?);
        let now = scope.now();

        for (index, mut node) in nodes.into_iter().enumerate() {
            let was_published = node.is_published();
            let tags = self.published_tags(scope, &node).await?;
            node.trashed = true;
            node.published_version_id = None;
            node.updated_at = now;
            scope.tx().update_content(&node).await?;

            let mut changes = ChangeTypes::from(ChangeKind::NodeChanged);
            if was_published {
                changes = changes | ChangeKind::Removed;
            }
            if index == 0 {
                changes = changes | ChangeKind::BranchChanged;
            }
            self.emit(scope, node.id, changes);
            if !tags.is_empty() {
                scope
                    .changes()
                    .tags(ContentChange::new(node.id, ChangeKind::Removed));
            }
        }
        info!(%id, "Moved to recycle bin");
        Ok(true)
    }

    pub(crate) async fn delete_in(
        &self,
        scope: &mut WriteScope,
        id: ContentId,
    ) -> Result<usize, ContentServiceError> {
        let root = self.load(scope, id).await?;
        let mut nodes = vec![root];
        nodes.extend(scope.tx().descendants(id).await?);
        let doomed: HashSet<ContentId> = nodes.iter().map(|node| node.id).collect();
        let domains: Vec<_> = scope
            .tx()
            .list_domains()
            .await?
            .into_iter()
            .filter(|domain| doomed.contains(&domain.root_content_id))
            .collect();

        // Children before parents.
        for node in nodes.iter().rev() {
            let tags = self.published_tags(scope, node).await?;
            scope.tx().delete_content(node.id).await?;
            self.emit(scope, node.id, ChangeKind::Removed);
            if !tags.is_empty() {
                scope
                    .changes()
                    .tags(ContentChange::new(node.id, ChangeKind::Removed));
            }
        }
        for domain in domains {
            scope
                .changes()
                .domain(DomainChange::new(domain.id, ChangeKind::Removed));
        }
        info!(%id, deleted = nodes.len(), "Content deleted");
        Ok(nodes.len())
    }

    async fn rollback_in(
        &self,
        scope: &mut WriteScope,
        actor: &str,
        id: ContentId,
        target: VersionId,
    ) -> Result<ContentVersionRecord, ContentServiceError> {
        let mut entity = self.load(scope, id).await?;
        let source = scope
            .tx()
            .find_version(id, target)
            .await?
            .ok_or_else(|| DomainError::not_found("version", target))?;

        let now = scope.now();
        let version = scope
            .tx()
            .insert_version(NewVersion {
                content_id: id,
                name: source.name,
                values: source.values,
                tags: source.tags,
                author: actor.to_string(),
                created_at: now,
            })
            .await?;
        entity.newest_version_id = version.version_id;
        entity.name = version.name.clone();
        entity.updated_at = now;
        scope.tx().update_content(&entity).await?;

        self.emit(scope, id, ChangeKind::NodeChanged);
        info!(%id, from = %target, version = %version.version_id, "Rolled back");
        Ok(version)
    }

    async fn copy_in(
        &self,
        scope: &mut WriteScope,
        actor: &str,
        id: ContentId,
        parent: Option<ContentId>,
        recursive: bool,
    ) -> Result<ContentRecord, ContentServiceError> {
        let source = self.load(scope, id).await?;
        if let Some(parent_id) = parent {
            let parent = self.find(scope, parent_id).await?;
            ensure_same_kind(&parent, &source)?;
            if parent.trashed {
                return Err(DomainError::validation(format!(
                    "parent {parent_id} is in the recycle bin"
                ))
                .into());
            }
        }
        // Taken before inserting so a copy into its own subtree is not copied again.
        let descendants = if recursive {
            scope.tx().descendants(id).await?
        } else {
            Vec::new()
        };

        let siblings = scope.tx().children(parent, self.kind).await?;
        let name = unique_sibling_name(&source.name, |candidate| {
            siblings
                .iter()
                .any(|sibling| sibling.name.eq_ignore_ascii_case(candidate))
        })?;
        let copy = self
            .copy_node(scope, actor, &source, parent, name, next_sort_order(&siblings))
            .await?;

        let mut copies = HashMap::from([(source.id, copy.id)]);
        for node in descendants {
            let new_parent = node
                .parent_id
                .and_then(|old| copies.get(&old).copied())
                .ok_or_else(|| {
                    DomainError::invariant(format!("parent of {} was not copied", node.id))
                })?;
            let name = node.name.clone();
            let sort_order = node.sort_order;
            let copied = self
                .copy_node(scope, actor, &node, Some(new_parent), name, sort_order)
                .await?;
            copies.insert(node.id, copied.id);
        }

        info!(source = %id, copy = %copy.id, nodes = copies.len(), "Content copied");
        Ok(copy)
    }

    async fn copy_node(
        &self,
        scope: &mut WriteScope,
        actor: &str,
        source: &ContentRecord,
        parent: Option<ContentId>,
        name: String,
        sort_order: i32,
    ) -> Result<ContentRecord, ContentServiceError> {
        let draft = self.version(scope, source, source.newest_version_id).await?;
        let now = scope.now();
        let (record, _) = scope
            .tx()
            .insert_content(NewContent {
                key: Uuid::new_v4(),
                kind: source.kind,
                content_type_id: source.content_type_id,
                parent_id: parent,
                sort_order,
                name,
                values: draft.values,
                tags: draft.tags,
                author: actor.to_string(),
                release_date: None,
                expire_date: None,
                created_at: now,
            })
            .await?;
        self.emit(scope, record.id, ChangeKind::NodeChanged);
        Ok(record)
    }

    async fn sort_in(
        &self,
        scope: &mut WriteScope,
        parent: Option<ContentId>,
        ordered: &[ContentId],
    ) -> Result<usize, ContentServiceError> {
        let children = scope.tx().children(parent, self.kind).await?;
        let listed: HashSet<ContentId> = ordered.iter().copied().collect();
        if listed.len() != ordered.len()
            || listed.len() != children.len()
            || children.iter().any(|child| !listed.contains(&child.id))
        {
            return Err(DomainError::validation(
                "sort order must list every sibling exactly once",
            )
            .into());
        }

        let now = scope.now();
        let mut moved = 0;
        for (position, id) in ordered.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| DomainError::validation("too many siblings to sort"))?;
            let Some(mut child) = children.iter().find(|child| child.id == *id).cloned() else {
                continue;
            };
            if child.sort_order == position {
                continue;
            }
            child.sort_order = position;
            child.updated_at = now;
            scope.tx().update_content(&child).await?;
            self.emit(scope, child.id, position_change(&child));
            moved += 1;
        }
        debug!(parent = ?parent, moved, "Siblings sorted");
        Ok(moved)
    }

    pub(crate) async fn move_in(
        &self,
        scope: &mut WriteScope,
        id: ContentId,
        parent: Option<ContentId>,
    ) -> Result<ContentRecord, ContentServiceError> {
        let mut entity = self.load(scope, id).await?;
        let restoring = entity.trashed;
        if entity.parent_id == parent && !restoring {
            return Ok(entity);
        }

        let new_path = match parent {
            Some(parent_id) => {
                let target = self.find(scope, parent_id).await?;
                ensure_same_kind(&target, &entity)?;
                if target.path.contains(id) {
                    return Err(DomainError::validation(format!(
                        "{id} cannot move under itself or its descendant {parent_id}"
                    ))
                    .into());
                }
                if target.trashed {
                    return Err(DomainError::validation(format!(
                        "parent {parent_id} is in the recycle bin"
                    ))
                    .into());
                }
                target.path.child(id)
            }
            None => ContentPath::root(id),
        };

        let descendants = scope.tx().descendants(id).await?;
        let siblings: Vec<ContentRecord> = scope
            .tx()
            .children(parent, self.kind)
            .await?
            .into_iter()
            .filter(|sibling| sibling.id != id)
            .collect();
        let old_path = entity.path.clone();
        let now = scope.now();

        entity.parent_id = parent;
        entity.path = new_path.clone();
        entity.sort_order = next_sort_order(&siblings);
        entity.trashed = false;
        entity.updated_at = now;
        scope.tx().update_content(&entity).await?;
        self.emit(
            scope,
            id,
            position_change(&entity) | ChangeKind::BranchChanged,
        );

        for mut node in descendants {
            node.path = node.path.rebase(&old_path, &new_path).ok_or_else(|| {
                DomainError::invariant(format!("{} is not below {old_path}", node.id))
            })?;
            node.trashed = false;
            node.updated_at = now;
            scope.tx().update_content(&node).await?;
            self.emit(scope, node.id, position_change(&node));
        }

        info!(%id, parent = ?parent, restored = restoring, "Content moved");
        Ok(entity)
    }

    async fn schedule_in(
        &self,
        scope: &mut WriteScope,
        releases: &[ContentId],
        expiries: &[ContentId],
    ) -> Result<ScheduledRun, ContentServiceError> {
        let mut run = ScheduledRun::default();

        for id in releases {
            let outcome = self.publish_in(scope, *id, false).await?;
            if outcome.is_success() {
                let mut entity = self.load(scope, *id).await?;
                entity.release_date = None;
                scope.tx().update_content(&entity).await?;
                run.published.push(*id);
            } else {
                run.refused.push(outcome);
            }
        }

        for id in expiries {
            let mut entity = self.load(scope, *id).await?;
            if self.unpublish_in(scope, &mut entity).await? {
                run.unpublished.push(*id);
            }
        }

        info!(
            published = run.published.len(),
            unpublished = run.unpublished.len(),
            refused = run.refused.len(),
            "Scheduled publishing ran"
        );
        Ok(run)
    }
}

fn next_sort_order(siblings: &[ContentRecord]) -> i32 {
    siblings
        .iter()
        .map(|sibling| sibling.sort_order.saturating_add(1))
        .max()
        .unwrap_or(0)
}

/// Change types for a node whose position in the tree changed.
fn position_change(node: &ContentRecord) -> ChangeTypes {
    if node.is_published() {
        ChangeKind::NodeChanged | ChangeKind::PublishedChanged
    } else {
        ChangeTypes::from(ChangeKind::NodeChanged)
    }
}
