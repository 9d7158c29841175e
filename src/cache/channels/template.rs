//! Template channel. Local only: every node compiles from its own disk.

use std::sync::Arc;

use crate::cache::changes::ChangeKind;
use crate::cache::channel::{
    AppliedScope, ChannelError, ChannelId, ChannelMessage, ChannelPayload, InvalidationChannel,
    MessageShape, PayloadKind, payload_mismatch,
};
use crate::cache::dependencies::Dependency;
use crate::cache::fragments::FragmentCache;
use crate::cache::templates::TemplateCache;

pub struct TemplateChannel {
    templates: Arc<TemplateCache>,
    fragments: Arc<FragmentCache>,
}

impl TemplateChannel {
    pub fn new(templates: Arc<TemplateCache>, fragments: Arc<FragmentCache>) -> Self {
        Self {
            templates,
            fragments,
        }
    }

    fn clear(&self) -> AppliedScope {
        AppliedScope::everything(self.templates.clear() + self.fragments.clear())
    }
}

impl InvalidationChannel for TemplateChannel {
    fn id(&self) -> ChannelId {
        ChannelId::TEMPLATE
    }

    fn name(&self) -> &'static str {
        "template"
    }

    fn payload_kind(&self) -> PayloadKind {
        PayloadKind::Template
    }

    fn accepted_shapes(&self) -> &'static [MessageShape] {
        &[MessageShape::Payload, MessageShape::RefreshAll]
    }

    fn local_only(&self) -> bool {
        true
    }

    fn apply(&self, message: ChannelMessage) -> Result<AppliedScope, ChannelError> {
        let changes = match message {
            ChannelMessage::RefreshAll => return Ok(self.clear()),
            ChannelMessage::Payload(ChannelPayload::Template(changes)) => changes,
            ChannelMessage::Payload(other) => return Err(payload_mismatch(self, &other)),
            other => {
                return Err(ChannelError::UnsupportedShape {
                    channel: self.name(),
                    shape: other.shape(),
                });
            }
        };

        let mut scope = AppliedScope::default();
        for change in &changes {
            let alias = match &change.alias {
                Some(alias) if !change.changes.contains(ChangeKind::AllInvalidated) => alias,
                _ => return Ok(self.clear()),
            };
            scope.purged += usize::from(self.templates.invalidate(alias));
            scope.purged += self
                .fragments
                .invalidate(&Dependency::Template(alias.clone()));
        }
        Ok(scope)
    }
}
