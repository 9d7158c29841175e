//! Content type, data type and domain channels.

use std::sync::Arc;

use crate::cache::changes::DomainChange;
use crate::cache::channel::{
    AppliedScope, ChannelError, ChannelId, ChannelMessage, ChannelPayload, InvalidationChannel,
    PayloadKind, expect_payload, payload_mismatch,
};
use crate::cache::dependencies::Dependency;
use crate::cache::fragments::FragmentCache;
use crate::cache::projection::ProjectionCache;
use crate::domain::types::ContentId;

fn drop_fragments(fragments: &FragmentCache, ids: &[ContentId]) -> usize {
    ids.iter()
        .map(|id| fragments.invalidate(&Dependency::Content(*id)))
        .sum()
}

pub struct ContentTypeChannel {
    projection: Arc<ProjectionCache>,
    fragments: Arc<FragmentCache>,
}

impl ContentTypeChannel {
    pub fn new(projection: Arc<ProjectionCache>, fragments: Arc<FragmentCache>) -> Self {
        Self {
            projection,
            fragments,
        }
    }
}

impl InvalidationChannel for ContentTypeChannel {
    fn id(&self) -> ChannelId {
        ChannelId::CONTENT_TYPE
    }

    fn name(&self) -> &'static str {
        "content_type"
    }

    fn payload_kind(&self) -> PayloadKind {
        PayloadKind::ContentType
    }

    fn apply(&self, message: ChannelMessage) -> Result<AppliedScope, ChannelError> {
        let changes = match expect_payload(self, message)? {
            ChannelPayload::ContentType(changes) => changes,
            other => return Err(payload_mismatch(self, &other)),
        };

        let mut scope = AppliedScope::default();
        for change in &changes {
            if change.is_refresh_all() {
                let purged = self.projection.clear_all() + self.fragments.clear();
                return Ok(AppliedScope::everything(purged));
            }
            let ids = self.projection.purge_content_type(change.id);
            scope.purged += ids.len() + drop_fragments(&self.fragments, &ids);
            scope.nodes.extend(ids.iter().map(|id| id.get()));
        }
        scope.purged += self.projection.clear_routes();
        Ok(scope)
    }
}

pub struct DataTypeChannel {
    projection: Arc<ProjectionCache>,
    fragments: Arc<FragmentCache>,
}

impl DataTypeChannel {
    pub fn new(projection: Arc<ProjectionCache>, fragments: Arc<FragmentCache>) -> Self {
        Self {
            projection,
            fragments,
        }
    }
}

impl InvalidationChannel for DataTypeChannel {
    fn id(&self) -> ChannelId {
        ChannelId::DATA_TYPE
    }

    fn name(&self) -> &'static str {
        "data_type"
    }

    fn payload_kind(&self) -> PayloadKind {
        PayloadKind::DataType
    }

    fn apply(&self, message: ChannelMessage) -> Result<AppliedScope, ChannelError> {
        let changes = match expect_payload(self, message)? {
            ChannelPayload::DataType(changes) => changes,
            other => return Err(payload_mismatch(self, &other)),
        };

        let mut scope = AppliedScope::default();
        for change in &changes {
            if change.is_refresh_all() {
                let purged = self.projection.clear_all() + self.fragments.clear();
                return Ok(AppliedScope::everything(purged));
            }
            let ids = self.projection.purge_data_type(change.id);
            scope.purged += ids.len() + drop_fragments(&self.fragments, &ids);
            scope.nodes.extend(ids.iter().map(|id| id.get()));
        }
        Ok(scope)
    }
}

pub struct DomainChannel {
    projection: Arc<ProjectionCache>,
}

impl DomainChannel {
    pub fn new(projection: Arc<ProjectionCache>) -> Self {
        Self { projection }
    }
}

impl InvalidationChannel for DomainChannel {
    fn id(&self) -> ChannelId {
        ChannelId::DOMAIN
    }

    fn name(&self) -> &'static str {
        "domain"
    }

    fn payload_kind(&self) -> PayloadKind {
        PayloadKind::Domain
    }

    fn apply(&self, message: ChannelMessage) -> Result<AppliedScope, ChannelError> {
        let changes = match expect_payload(self, message)? {
            ChannelPayload::Domain(changes) => changes,
            other => return Err(payload_mismatch(self, &other)),
        };
        // The domain list is small and loaded as a whole.
        Ok(AppliedScope {
            refreshed_all: changes.iter().any(DomainChange::is_refresh_all),
            nodes: changes
                .iter()
                .filter(|change| !change.is_refresh_all())
                .map(|change| change.id.get())
                .collect(),
            purged: self.projection.clear_domains(),
            ..AppliedScope::default()
        })
    }
}
