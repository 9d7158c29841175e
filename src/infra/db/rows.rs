use std::collections::BTreeSet;

use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{
    ContentRecord, ContentTypeRecord, ContentVersionRecord, DataTypeRecord, DomainRecord,
    PropertyTypeRecord, PropertyValues,
};
use crate::domain::path::ContentPath;
use crate::domain::types::{
    ContentId, ContentKind, ContentTypeId, DataTypeId, DomainId, ItemType, VersionId,
};

/// Column list matching [`ContentRow`], qualified with the `c` alias.
macro_rules! content_columns {
    () => {
        "c.id, c.key, c.kind, c.content_type_id, c.parent_id, c.path, c.sort_order, c.name, \
         c.newest_version_id, c.published_version_id, c.trashed, c.release_date, c.expire_date, \
         c.created_at, c.updated_at"
    };
}

macro_rules! version_columns {
    () => {
        "v.version_id, v.content_id, v.name, v.property_values, v.tags, v.author, v.created_at"
    };
}

pub(super) use content_columns;
pub(super) use version_columns;

#[derive(sqlx::FromRow)]
pub(super) struct ContentRow {
    id: i32,
    key: Uuid,
    kind: ContentKind,
    content_type_id: i32,
    parent_id: Option<i32>,
    path: Vec<i32>,
    sort_order: i32,
    name: String,
    newest_version_id: i64,
    published_version_id: Option<i64>,
    trashed: bool,
    release_date: Option<OffsetDateTime>,
    expire_date: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ContentRow> for ContentRecord {
    fn from(row: ContentRow) -> Self {
        Self {
            id: ContentId(row.id),
            key: row.key,
            kind: row.kind,
            content_type_id: ContentTypeId(row.content_type_id),
            parent_id: row.parent_id.map(ContentId),
            path: ContentPath::from_raw(&row.path),
            sort_order: row.sort_order,
            name: row.name,
            newest_version_id: VersionId(row.newest_version_id),
            published_version_id: row.published_version_id.map(VersionId),
            trashed: row.trashed,
            release_date: row.release_date,
            expire_date: row.expire_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct VersionRow {
    version_id: i64,
    content_id: i32,
    name: String,
    property_values: Json<PropertyValues>,
    tags: Vec<String>,
    author: String,
    created_at: OffsetDateTime,
}

impl From<VersionRow> for ContentVersionRecord {
    fn from(row: VersionRow) -> Self {
        Self {
            content_id: ContentId(row.content_id),
            version_id: VersionId(row.version_id),
            name: row.name,
            values: row.property_values.0,
            tags: row.tags.into_iter().collect::<BTreeSet<_>>(),
            author: row.author,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct ContentTypeRow {
    id: i32,
    alias: String,
    item_type: ItemType,
    properties: Json<Vec<PropertyTypeRecord>>,
    updated_at: OffsetDateTime,
}

impl From<ContentTypeRow> for ContentTypeRecord {
    fn from(row: ContentTypeRow) -> Self {
        Self {
            id: ContentTypeId(row.id),
            alias: row.alias,
            item_type: row.item_type,
            properties: row.properties.0,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct DataTypeRow {
    id: i32,
    key: Uuid,
    name: String,
    editor_alias: String,
}

impl From<DataTypeRow> for DataTypeRecord {
    fn from(row: DataTypeRow) -> Self {
        Self {
            id: DataTypeId(row.id),
            key: row.key,
            name: row.name,
            editor_alias: row.editor_alias,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct DomainRow {
    id: i32,
    host: String,
    root_content_id: i32,
}

impl From<DomainRow> for DomainRecord {
    fn from(row: DomainRow) -> Self {
        Self {
            id: DomainId(row.id),
            host: row.host,
            root_content_id: ContentId(row.root_content_id),
        }
    }
}
