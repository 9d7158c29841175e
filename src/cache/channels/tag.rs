//! Published tag index channel.

use std::sync::Arc;

use crate::cache::changes::ChangeKind;
use crate::cache::channel::{
    AppliedScope, ChannelError, ChannelId, ChannelMessage, ChannelPayload, InvalidationChannel,
    PayloadKind, expect_payload, payload_mismatch,
};
use crate::cache::projection::ProjectionCache;

pub struct TagChannel {
    projection: Arc<ProjectionCache>,
}

impl TagChannel {
    pub fn new(projection: Arc<ProjectionCache>) -> Self {
        Self { projection }
    }
}

impl InvalidationChannel for TagChannel {
    fn id(&self) -> ChannelId {
        ChannelId::TAG
    }

    fn name(&self) -> &'static str {
        "tag"
    }

    fn payload_kind(&self) -> PayloadKind {
        PayloadKind::Content
    }

    fn apply(&self, message: ChannelMessage) -> Result<AppliedScope, ChannelError> {
        let changes = match expect_payload(self, message)? {
            ChannelPayload::Content(changes) => changes,
            other => return Err(payload_mismatch(self, &other)),
        };

        let mut scope = AppliedScope::default();
        for change in &changes {
            if change.is_refresh_all() {
                return Ok(AppliedScope::everything(self.projection.clear_tags()));
            }
            // A node that lost its published tags only leaves the lists it was
            // in; anything else may add it to lists not yet mentioning it.
            if change.changes.contains(ChangeKind::Removed) {
                scope.purged += self.projection.purge_tags_containing(change.id);
                scope.removed.insert(change.id.get());
            } else {
                scope.purged += self.projection.clear_tags();
                scope.nodes.insert(change.id.get());
            }
        }
        Ok(scope)
    }
}
