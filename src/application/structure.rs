//! Content types, data types and domains.
//!
//! Structure writes go through the same write scope as content writes, so the
//! matching channel is only told after the transaction commits.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::application::content::ContentServiceError;
use crate::application::repos::{ContentStore, SaveContentType, SaveDataType, SaveDomain};
use crate::application::unit_of_work::WriteScope;
use crate::cache::{ChangeKind, ContentTypeChange, DataTypeChange, DomainChange};
use crate::cluster::ClusterMessenger;
use crate::domain::entities::{
    ContentTypeRecord, DataTypeRecord, DomainRecord, PropertyTypeRecord,
};
use crate::domain::error::DomainError;
use crate::domain::types::{
    ContentId, ContentKind, ContentTypeId, DataTypeId, DomainId, ItemType,
};

#[derive(Debug, Clone)]
pub struct ContentTypeCommand {
    pub id: Option<ContentTypeId>,
    pub alias: String,
    pub item_type: ItemType,
    pub properties: Vec<PropertyTypeRecord>,
}

impl ContentTypeCommand {
    pub fn new(alias: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            id: None,
            alias: alias.into(),
            item_type,
            properties: Vec::new(),
        }
    }

    pub fn with_property(
        mut self,
        alias: impl Into<String>,
        data_type_id: DataTypeId,
        mandatory: bool,
    ) -> Self {
        self.properties.push(PropertyTypeRecord {
            alias: alias.into(),
            data_type_id,
            mandatory,
        });
        self
    }
}

#[derive(Clone)]
pub struct StructureService {
    store: Arc<dyn ContentStore>,
    messenger: Arc<ClusterMessenger>,
}

impl StructureService {
    pub fn new(store: Arc<dyn ContentStore>, messenger: Arc<ClusterMessenger>) -> Self {
        Self { store, messenger }
    }

    #[instrument(skip(self, command), fields(alias = %command.alias))]
    pub async fn save_content_type(
        &self,
        command: ContentTypeCommand,
    ) -> Result<ContentTypeRecord, ContentServiceError> {
        let mut scope = self.begin().await?;
        let result: Result<ContentTypeRecord, ContentServiceError> = async {
            let alias = command.alias.trim();
            if alias.is_empty() {
                return Err(DomainError::validation("content type alias is required").into());
            }
            let previous = match command.id {
                Some(id) => Some(
                    scope
                        .tx()
                        .find_content_type(id)
                        .await?
                        .ok_or_else(|| DomainError::not_found("content type", id))?,
                ),
                None => None,
            };
            for property in &command.properties {
                if scope.tx().find_data_type(property.data_type_id).await?.is_none() {
                    return Err(DomainError::validation(format!(
                        "property `{}` uses unknown data type {}",
                        property.alias, property.data_type_id
                    ))
                    .into());
                }
            }

            let now = scope.now();
            let saved = scope
                .tx()
                .save_content_type(SaveContentType {
                    id: command.id,
                    alias: alias.to_string(),
                    item_type: command.item_type,
                    properties: command.properties,
                    updated_at: now,
                })
                .await?;

            if let Some(previous) = previous
                && previous.item_type != saved.item_type
            {
                scope.changes().content_type(ContentTypeChange::new(
                    previous.item_type,
                    saved.id,
                    ChangeKind::NodeChanged,
                ));
            }
            scope.changes().content_type(ContentTypeChange::new(
                saved.item_type,
                saved.id,
                ChangeKind::NodeChanged,
            ));
            Ok(saved)
        }
        .await;
        self.finish(scope, result).await
    }

    /// Refused while any content still uses the type.
    #[instrument(skip(self))]
    pub async fn delete_content_type(&self, id: ContentTypeId) -> Result<(), ContentServiceError> {
        let mut scope = self.begin().await?;
        let result: Result<(), ContentServiceError> = async {
            let record = scope
                .tx()
                .find_content_type(id)
                .await?
                .ok_or_else(|| DomainError::not_found("content type", id))?;
            let users = scope.tx().content_of_type(id).await?;
            if !users.is_empty() {
                return Err(DomainError::validation(format!(
                    "content type `{}` is used by {} item(s)",
                    record.alias,
                    users.len()
                ))
                .into());
            }
            scope.tx().delete_content_type(id).await?;
            scope.changes().content_type(ContentTypeChange::new(
                record.item_type,
                id,
                ChangeKind::Removed,
            ));
            Ok(())
        }
        .await;
        self.finish(scope, result).await
    }

    #[instrument(skip(self, name, editor_alias))]
    pub async fn save_data_type(
        &self,
        id: Option<DataTypeId>,
        key: Option<Uuid>,
        name: impl Into<String>,
        editor_alias: impl Into<String>,
    ) -> Result<DataTypeRecord, ContentServiceError> {
        let name = name.into();
        let editor_alias = editor_alias.into();
        let mut scope = self.begin().await?;
        let result: Result<DataTypeRecord, ContentServiceError> = async {
            if name.trim().is_empty() {
                return Err(DomainError::validation("data type name is required").into());
            }
            let key = match (id, key) {
                (_, Some(key)) => key,
                (Some(id), None) => {
                    scope
                        .tx()
                        .find_data_type(id)
                        .await?
                        .ok_or_else(|| DomainError::not_found("data type", id))?
                        .key
                }
                (None, None) => Uuid::new_v4(),
            };
            let saved = scope
                .tx()
                .save_data_type(SaveDataType {
                    id,
                    key,
                    name: name.trim().to_string(),
                    editor_alias,
                })
                .await?;
            scope.changes().data_type(DataTypeChange {
                id: saved.id,
                key: saved.key,
                removed: false,
            });
            Ok(saved)
        }
        .await;
        self.finish(scope, result).await
    }

    /// Refused while any content type has a property of this data type.
    #[instrument(skip(self))]
    pub async fn delete_data_type(&self, id: DataTypeId) -> Result<(), ContentServiceError> {
        let mut scope = self.begin().await?;
        let result: Result<(), ContentServiceError> = async {
            let record = scope
                .tx()
                .find_data_type(id)
                .await?
                .ok_or_else(|| DomainError::not_found("data type", id))?;
            let users = scope.tx().content_types_using(id).await?;
            if let Some(first) = users.first() {
                return Err(DomainError::validation(format!(
                    "data type `{}` is used by content type `{}`",
                    record.name, first.alias
                ))
                .into());
            }
            scope.tx().delete_data_type(id).await?;
            scope.changes().data_type(DataTypeChange {
                id,
                key: record.key,
                removed: true,
            });
            Ok(())
        }
        .await;
        self.finish(scope, result).await
    }

    /// Assign `host` to a root document. Host names are stored lowercased.
    #[instrument(skip(self))]
    pub async fn save_domain(
        &self,
        id: Option<DomainId>,
        host: &str,
        root_content_id: ContentId,
    ) -> Result<DomainRecord, ContentServiceError> {
        let mut scope = self.begin().await?;
        let result: Result<DomainRecord, ContentServiceError> = async {
            let host = host.trim().to_ascii_lowercase();
            if host.is_empty() || host.contains('/') {
                return Err(DomainError::validation(format!("`{host}` is not a host name")).into());
            }
            let root = scope
                .tx()
                .find_content(root_content_id)
                .await?
                .ok_or_else(|| DomainError::not_found("content", root_content_id))?;
            if root.kind != ContentKind::Document {
                return Err(DomainError::validation(format!(
                    "domain root {root_content_id} must be a document"
                ))
                .into());
            }
            let saved = scope
                .tx()
                .save_domain(SaveDomain {
                    id,
                    host,
                    root_content_id,
                })
                .await?;
            scope
                .changes()
                .domain(DomainChange::new(saved.id, ChangeKind::NodeChanged));
            Ok(saved)
        }
        .await;
        self.finish(scope, result).await
    }

    #[instrument(skip(self))]
    pub async fn delete_domain(&self, id: DomainId) -> Result<(), ContentServiceError> {
        let mut scope = self.begin().await?;
        let result: Result<(), ContentServiceError> = async {
            if scope.tx().find_domain(id).await?.is_none() {
                return Err(DomainError::not_found("domain", id).into());
            }
            scope.tx().delete_domain(id).await?;
            scope
                .changes()
                .domain(DomainChange::new(id, ChangeKind::Removed));
            Ok(())
        }
        .await;
        self.finish(scope, result).await
    }

    async fn begin(&self) -> Result<WriteScope, ContentServiceError> {
        Ok(WriteScope::begin(self.store.as_ref())
            .await?
            .at(OffsetDateTime::now_utc()))
    }

    async fn finish<T>(
        &self,
        scope: WriteScope,
        result: Result<T, ContentServiceError>,
    ) -> Result<T, ContentServiceError> {
        scope.complete(&self.messenger, result).await
    }
}
