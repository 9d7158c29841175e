//! Channel registry.
//!
//! Built once while the node starts and read-only afterwards, so lookups need
//! no locking.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::error;

use super::channel::{
    AppliedScope, ChannelError, ChannelId, ChannelMessage, InvalidationChannel, MessageShape,
    PayloadKind,
};

#[derive(Clone)]
pub struct ChannelRegistration {
    pub id: ChannelId,
    pub name: &'static str,
    pub payload_kind: PayloadKind,
    pub shapes: &'static [MessageShape],
    pub local_only: bool,
    handler: Arc<dyn InvalidationChannel>,
}

impl ChannelRegistration {
    fn new(handler: Arc<dyn InvalidationChannel>) -> Self {
        Self {
            id: handler.id(),
            name: handler.name(),
            payload_kind: handler.payload_kind(),
            shapes: handler.accepted_shapes(),
            local_only: handler.local_only(),
            handler,
        }
    }

    pub fn accepts(&self, shape: MessageShape) -> bool {
        self.shapes.contains(&shape)
    }

    /// Hand a message to the handler after checking its shape.
    pub fn apply(&self, message: ChannelMessage) -> Result<AppliedScope, ChannelError> {
        let shape = message.shape();
        if !self.accepts(shape) {
            error!(
                channel = self.name,
                channel_id = %self.id,
                ?shape,
                "Channel received a message shape it does not accept"
            );
            return Err(ChannelError::UnsupportedShape {
                channel: self.name,
                shape,
            });
        }
        self.handler.apply(message)
    }
}

#[derive(Default)]
pub struct ChannelRegistryBuilder {
    channels: BTreeMap<ChannelId, ChannelRegistration>,
}

impl ChannelRegistryBuilder {
    pub fn register(mut self, handler: Arc<dyn InvalidationChannel>) -> Result<Self, ChannelError> {
        let registration = ChannelRegistration::new(handler);
        if self.channels.contains_key(&registration.id) {
            return Err(ChannelError::DuplicateChannel(registration.id));
        }
        self.channels.insert(registration.id, registration);
        Ok(self)
    }

    pub fn build(self) -> ChannelRegistry {
        ChannelRegistry {
            channels: self.channels,
        }
    }
}

pub struct ChannelRegistry {
    channels: BTreeMap<ChannelId, ChannelRegistration>,
}

impl ChannelRegistry {
    pub fn builder() -> ChannelRegistryBuilder {
        ChannelRegistryBuilder::default()
    }

    pub fn get(&self, id: ChannelId) -> Result<&ChannelRegistration, ChannelError> {
        self.channels
            .get(&id)
            .ok_or(ChannelError::UnknownChannel(id))
    }

    /// Look a channel up by display name, as typed on the command line.
    pub fn find_by_name(&self, name: &str) -> Option<&ChannelRegistration> {
        self.channels
            .values()
            .find(|registration| registration.name.eq_ignore_ascii_case(name))
    }

    pub fn registrations(&self) -> impl Iterator<Item = &ChannelRegistration> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
