use std::collections::BTreeSet;

use thiserror::Error;
use time::OffsetDateTime;

use crate::application::repos::RepoError;
use crate::application::unit_of_work::CommitError;
use crate::cache::ChannelError;
use crate::domain::entities::{ContentRecord, PropertyValues};
use crate::domain::error::DomainError;
use crate::domain::publish::PublishOutcome;
use crate::domain::slug::SlugError;
use crate::domain::types::{ContentId, ContentTypeId};

#[derive(Debug, Error)]
pub enum ContentServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl From<CommitError> for ContentServiceError {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::Repo(err) => Self::Repo(err),
            CommitError::Flush(err) => Self::Channel(err),
        }
    }
}

/// Where a save lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTarget {
    New {
        parent_id: Option<ContentId>,
        content_type_id: ContentTypeId,
    },
    Existing(ContentId),
}

#[derive(Debug, Clone)]
pub struct SaveContentCommand {
    pub target: SaveTarget,
    pub name: String,
    pub values: PropertyValues,
    pub tags: BTreeSet<String>,
    pub release_date: Option<OffsetDateTime>,
    pub expire_date: Option<OffsetDateTime>,
}

impl SaveContentCommand {
    pub fn create(
        parent_id: Option<ContentId>,
        content_type_id: ContentTypeId,
        name: impl Into<String>,
    ) -> Self {
        Self {
            target: SaveTarget::New {
                parent_id,
                content_type_id,
            },
            name: name.into(),
            values: PropertyValues::new(),
            tags: BTreeSet::new(),
            release_date: None,
            expire_date: None,
        }
    }

    pub fn update(id: ContentId, name: impl Into<String>) -> Self {
        Self {
            target: SaveTarget::Existing(id),
            name: name.into(),
            values: PropertyValues::new(),
            tags: BTreeSet::new(),
            release_date: None,
            expire_date: None,
        }
    }

    pub fn with_value(mut self, alias: impl Into<String>, value: serde_json::Value) -> Self {
        self.values.insert(alias.into(), value);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Result of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduledRun {
    pub published: Vec<ContentId>,
    pub unpublished: Vec<ContentId>,
    /// Releases refused by a publish guard; retried on the next pass.
    pub refused: Vec<PublishOutcome>,
}

impl ScheduledRun {
    pub fn is_empty(&self) -> bool {
        self.published.is_empty() && self.unpublished.is_empty() && self.refused.is_empty()
    }
}

pub(crate) fn ensure_same_kind(
    parent: &ContentRecord,
    child: &ContentRecord,
) -> Result<(), DomainError> {
    if parent.kind != child.kind {
        return Err(DomainError::validation(format!(
            "{} {} cannot live under {} {}",
            child.kind.as_str(),
            child.id,
            parent.kind.as_str(),
            parent.id
        )));
    }
    Ok(())
}
