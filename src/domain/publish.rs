//! Publish guards and outcomes.
//!
//! Guards are pure: callers load the entity, its draft version, its content
//! type and its ancestors inside the write transaction and hand them here.

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::entities::{ContentRecord, ContentTypeRecord, ContentVersionRecord};
use crate::domain::types::ContentId;

/// Why a publish attempt was refused. These are business outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum PublishFailure {
    #[error("mandatory properties are missing: {}", missing.join(", "))]
    InvalidContent { missing: Vec<String> },
    #[error("content has expired")]
    Expired,
    #[error("content is awaiting its release date")]
    AwaitingRelease,
    #[error("an ancestor is not published")]
    ParentNotPublished,
    #[error("an ancestor is in the recycle bin")]
    ParentTrashed,
    #[error("content is in the recycle bin")]
    Trashed,
}

impl PublishFailure {
    pub fn code(&self) -> &'static str {
        match self {
            PublishFailure::InvalidContent { .. } => "invalid_content",
            PublishFailure::Expired => "expired",
            PublishFailure::AwaitingRelease => "awaiting_release",
            PublishFailure::ParentNotPublished => "parent_not_published",
            PublishFailure::ParentTrashed => "parent_trashed",
            PublishFailure::Trashed => "trashed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Published,
    /// Nothing to publish; no descriptors were emitted.
    AlreadyPublished,
    /// Forced publish of unchanged content; only the published projection was refreshed.
    Republished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub id: ContentId,
    pub result: Result<PublishStatus, PublishFailure>,
}

impl PublishOutcome {
    pub fn success(id: ContentId, status: PublishStatus) -> Self {
        Self {
            id,
            result: Ok(status),
        }
    }

    pub fn failure(id: ContentId, failure: PublishFailure) -> Self {
        Self {
            id,
            result: Err(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure_reason(&self) -> Option<&PublishFailure> {
        self.result.as_ref().err()
    }
}

/// Per-node results of a branch publish, in top-down order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchPublishOutcome {
    pub outcomes: Vec<PublishOutcome>,
}

impl BranchPublishOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(PublishOutcome::is_success)
    }

    pub fn published_ids(&self) -> Vec<ContentId> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.result, Ok(PublishStatus::Published)))
            .map(|outcome| outcome.id)
            .collect()
    }

    pub fn outcome_for(&self, id: ContentId) -> Option<&PublishOutcome> {
        self.outcomes.iter().find(|outcome| outcome.id == id)
    }
}

/// Everything the guards look at.
pub struct PublishCandidate<'a> {
    pub entity: &'a ContentRecord,
    pub draft: &'a ContentVersionRecord,
    pub content_type: &'a ContentTypeRecord,
    /// Every ancestor on the entity's path, root first.
    pub ancestors: &'a [ContentRecord],
    pub now: OffsetDateTime,
}

pub fn check_publishable(candidate: &PublishCandidate<'_>) -> Result<(), PublishFailure> {
    let entity = candidate.entity;

    if entity.trashed {
        return Err(PublishFailure::Trashed);
    }
    if candidate.ancestors.iter().any(|ancestor| ancestor.trashed) {
        return Err(PublishFailure::ParentTrashed);
    }
    if candidate
        .ancestors
        .iter()
        .any(|ancestor| !ancestor.is_published())
    {
        return Err(PublishFailure::ParentNotPublished);
    }
    if let Some(expire) = entity.expire_date
        && expire <= candidate.now
    {
        return Err(PublishFailure::Expired);
    }
    if let Some(release) = entity.release_date
        && release > candidate.now
    {
        return Err(PublishFailure::AwaitingRelease);
    }

    let missing = candidate
        .content_type
        .missing_mandatory(&candidate.draft.values);
    if !missing.is_empty() {
        return Err(PublishFailure::InvalidContent { missing });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;
    use time::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::domain::entities::{PropertyTypeRecord, PropertyValues};
    use crate::domain::path::ContentPath;
    use crate::domain::types::{ContentKind, ContentTypeId, DataTypeId, ItemType, VersionId};

    fn now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::days(10_000)
    }

    fn entity(id: i32, path: &[i32], published: bool) -> ContentRecord {
        ContentRecord {
            id: ContentId(id),
            key: Uuid::new_v4(),
            kind: ContentKind::Document,
            content_type_id: ContentTypeId(1),
            parent_id: path.len().checked_sub(2).map(|i| ContentId(path[i])),
            path: ContentPath::from_raw(path),
            sort_order: 0,
            name: format!("node {id}"),
            newest_version_id: VersionId(id.into()),
            published_version_id: published.then_some(VersionId(id.into())),
            trashed: false,
            release_date: None,
            expire_date: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn draft(values: PropertyValues) -> ContentVersionRecord {
        ContentVersionRecord {
            content_id: ContentId(3),
            version_id: VersionId(3),
            name: "node 3".to_string(),
            values,
            tags: BTreeSet::new(),
            author: "editor".to_string(),
            created_at: now(),
        }
    }

    fn content_type() -> ContentTypeRecord {
        ContentTypeRecord {
            id: ContentTypeId(1),
            alias: "page".to_string(),
            item_type: ItemType::Content,
            properties: vec![PropertyTypeRecord {
                alias: "title".to_string(),
                data_type_id: DataTypeId(1),
                mandatory: true,
            }],
            updated_at: now(),
        }
    }

    fn valid_values() -> PropertyValues {
        PropertyValues::from([("title".to_string(), json!("Hello"))])
    }

    fn check(
        entity: &ContentRecord,
        values: PropertyValues,
        ancestors: &[ContentRecord],
    ) -> Result<(), PublishFailure> {
        let draft = draft(values);
        let content_type = content_type();
        check_publishable(&PublishCandidate {
            entity,
            draft: &draft,
            content_type: &content_type,
            ancestors,
            now: now(),
        })
    }

    #[test]
    fn valid_node_under_published_parents_passes() {
        let parents = [entity(1, &[1], true), entity(2, &[1, 2], true)];
        let node = entity(3, &[1, 2, 3], false);
        assert_eq!(check(&node, valid_values(), &parents), Ok(()));
    }

    #[test]
    fn unpublished_ancestor_blocks_publish() {
        let parents = [entity(1, &[1], true), entity(2, &[1, 2], false)];
        let node = entity(3, &[1, 2, 3], false);
        assert_eq!(
            check(&node, valid_values(), &parents),
            Err(PublishFailure::ParentNotPublished)
        );
    }

    #[test]
    fn trashed_ancestor_wins_over_unpublished_ancestor() {
        let mut parent = entity(2, &[2], false);
        parent.trashed = true;
        let node = entity(3, &[2, 3], false);
        assert_eq!(
            check(&node, valid_values(), &[parent]),
            Err(PublishFailure::ParentTrashed)
        );
    }

    #[test]
    fn trashed_node_is_refused() {
        let mut node = entity(3, &[3], false);
        node.trashed = true;
        let failure = check(&node, valid_values(), &[]).expect_err("trashed");
        assert_eq!(failure.code(), "trashed");
    }

    #[test]
    fn schedule_dates_are_enforced() {
        let mut expired = entity(3, &[3], false);
        expired.expire_date = Some(now() - Duration::hours(1));
        assert_eq!(
            check(&expired, valid_values(), &[]),
            Err(PublishFailure::Expired)
        );

        let mut pending = entity(3, &[3], false);
        pending.release_date = Some(now() + Duration::hours(1));
        assert_eq!(
            check(&pending, valid_values(), &[]),
            Err(PublishFailure::AwaitingRelease)
        );

        let mut released = entity(3, &[3], false);
        released.release_date = Some(now() - Duration::hours(1));
        assert_eq!(check(&released, valid_values(), &[]), Ok(()));
    }

    #[test]
    fn missing_mandatory_property_is_reported() {
        let node = entity(3, &[3], false);
        assert_eq!(
            check(&node, PropertyValues::new(), &[]),
            Err(PublishFailure::InvalidContent {
                missing: vec!["title".to_string()]
            })
        );
    }

    #[test]
    fn branch_outcome_summaries() {
        let outcome = BranchPublishOutcome {
            outcomes: vec![
                PublishOutcome::success(ContentId(1), PublishStatus::Published),
                PublishOutcome::success(ContentId(2), PublishStatus::AlreadyPublished),
                PublishOutcome::failure(ContentId(3), PublishFailure::Expired),
            ],
        };
        assert!(!outcome.all_succeeded());
        assert_eq!(outcome.published_ids(), vec![ContentId(1)]);
        assert_eq!(
            outcome
                .outcome_for(ContentId(3))
                .and_then(PublishOutcome::failure_reason),
            Some(&PublishFailure::Expired)
        );
    }
}
