//! Domain records mirrored from persistent storage.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{
    path::ContentPath,
    types::{
        ContentId, ContentKind, ContentState, ContentTypeId, DataTypeId, DomainId, ItemType,
        VersionId,
    },
};

/// Property values keyed by property alias.
pub type PropertyValues = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentRecord {
    pub id: ContentId,
    pub key: Uuid,
    pub kind: ContentKind,
    pub content_type_id: ContentTypeId,
    pub parent_id: Option<ContentId>,
    pub path: ContentPath,
    pub sort_order: i32,
    pub name: String,
    pub newest_version_id: VersionId,
    pub published_version_id: Option<VersionId>,
    pub trashed: bool,
    pub release_date: Option<OffsetDateTime>,
    pub expire_date: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ContentRecord {
    pub fn state(&self) -> ContentState {
        if self.trashed {
            return ContentState::Trashed;
        }
        match self.published_version_id {
            None => ContentState::Draft,
            Some(published) if published == self.newest_version_id => ContentState::Published,
            Some(_) => ContentState::PublishedWithChanges,
        }
    }

    pub fn is_published(&self) -> bool {
        self.published_version_id.is_some()
    }

    /// True when the newest version is also the published one.
    pub fn has_no_pending_changes(&self) -> bool {
        self.published_version_id == Some(self.newest_version_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentVersionRecord {
    pub content_id: ContentId,
    pub version_id: VersionId,
    pub name: String,
    pub values: PropertyValues,
    pub tags: BTreeSet<String>,
    pub author: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct PropertyTypeRecord {
    pub alias: String,
    pub data_type_id: DataTypeId,
    pub mandatory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentTypeRecord {
    pub id: ContentTypeId,
    pub alias: String,
    pub item_type: ItemType,
    pub properties: Vec<PropertyTypeRecord>,
    pub updated_at: OffsetDateTime,
}

impl ContentTypeRecord {
    /// Mandatory property aliases that have no usable value in `values`.
    pub fn missing_mandatory(&self, values: &PropertyValues) -> Vec<String> {
        self.properties
            .iter()
            .filter(|property| property.mandatory)
            .filter(|property| !has_value(values.get(&property.alias)))
            .map(|property| property.alias.clone())
            .collect()
    }

    pub fn uses_data_type(&self, data_type_id: DataTypeId) -> bool {
        self.properties
            .iter()
            .any(|property| property.data_type_id == data_type_id)
    }
}

fn has_value(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::String(text)) => !text.trim().is_empty(),
        Some(serde_json::Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataTypeRecord {
    pub id: DataTypeId,
    pub key: Uuid,
    pub name: String,
    pub editor_alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainRecord {
    pub id: DomainId,
    pub host: String,
    pub root_content_id: ContentId,
}
