//! Applies envelopes received from peers.
//!
//! Sequence numbers are tracked per `(origin, channel)`. A repeated or older
//! sequence is a duplicate; a jump means envelopes were lost, and the channel
//! is refreshed wholesale instead of applying the partial payload.

use axum::http::StatusCode;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use vellum_wire::{NotificationEnvelope, WireError};

use crate::cache::{
    AppliedScope, CacheInvalidator, ChannelError, ChannelId, ChannelMessage, ChannelPayload,
    RefreshOrigin,
};

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("channel {0} is local to each node")]
    LocalOnly(ChannelId),
}

impl ReceiveError {
    pub fn status(&self) -> StatusCode {
        match self {
            ReceiveError::Wire(WireError::UnsupportedVersion { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Applied(AppliedScope),
    /// Missed envelopes were detected; the channel was refreshed entirely.
    Resynced(AppliedScope),
    Duplicate,
    SelfOrigin,
}

impl ReceiveOutcome {
    pub fn was_applied(&self) -> bool {
        matches!(self, ReceiveOutcome::Applied(_) | ReceiveOutcome::Resynced(_))
    }
}

pub struct NotificationReceiver {
    node_id: Uuid,
    invalidator: CacheInvalidator,
    last_seen: DashMap<(Uuid, ChannelId), u64>,
}

impl NotificationReceiver {
    pub fn new(node_id: Uuid, invalidator: CacheInvalidator) -> Self {
        Self {
            node_id,
            invalidator,
            last_seen: DashMap::new(),
        }
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn last_sequence(&self, origin: Uuid, channel: ChannelId) -> Option<u64> {
        self.last_seen.get(&(origin, channel)).map(|seq| *seq)
    }

    pub fn receive(&self, envelope: NotificationEnvelope) -> Result<ReceiveOutcome, ReceiveError> {
        envelope.check_version()?;
        if envelope.origin == self.node_id {
            return Ok(ReceiveOutcome::SelfOrigin);
        }

        let channel = ChannelId::from_uuid(envelope.channel);
        let registration = self.invalidator.registry().get(channel)?;
        if registration.local_only {
            return Err(ReceiveError::LocalOnly(channel));
        }
        let payload_kind = registration.payload_kind;
        let payload = ChannelPayload::from_json(payload_kind, envelope.payload)?;

        let origin = RefreshOrigin::Remote {
            node: envelope.origin,
            sequence: envelope.sequence,
        };

        // The entry guard serialises envelopes from one origin on one channel.
        let slot = self.last_seen.entry((envelope.origin, channel));
        let last = match &slot {
            Entry::Occupied(seen) => Some(*seen.get()),
            Entry::Vacant(_) => None,
        };

        if let Some(last) = last
            && envelope.sequence <= last
        {
            debug!(
                origin = %envelope.origin,
                channel = registration.name,
                sequence = envelope.sequence,
                last,
                "Duplicate notification ignored"
            );
            return Ok(ReceiveOutcome::Duplicate);
        }

        let outcome = match last {
            Some(last) if envelope.sequence > last + 1 => {
                warn!(
                    origin = %envelope.origin,
                    channel = registration.name,
                    expected = last + 1,
                    found = envelope.sequence,
                    "Notifications lost; refreshing channel"
                );
                let message = ChannelMessage::Payload(ChannelPayload::refresh_all(payload_kind));
                ReceiveOutcome::Resynced(self.invalidator.apply(channel, message, origin)?)
            }
            _ => ReceiveOutcome::Applied(self.invalidator.apply(
                channel,
                ChannelMessage::Payload(payload),
                origin,
            )?),
        };

        slot.insert(envelope.sequence);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::{
        CacheConfig, CacheLayer, ChangeKind, ContentChange, ObserverRegistry, RecordingObserver,
    };
    use crate::domain::types::ContentId;
    use crate::infra::memory::InMemoryContentStore;

    fn receiver() -> (NotificationReceiver, Arc<RecordingObserver>) {
        let layer = CacheLayer::new(
            Arc::new(InMemoryContentStore::new()),
            &CacheConfig::default(),
            "templates",
        );
        let observer = Arc::new(RecordingObserver::new());
        let invalidator = CacheInvalidator::new(
            Arc::new(layer.channel_registry().expect("registry")),
            Arc::new(ObserverRegistry::new(vec![observer.clone()])),
        );
        (NotificationReceiver::new(Uuid::new_v4(), invalidator), observer)
    }

    fn envelope(origin: Uuid, channel: ChannelId, sequence: u64) -> NotificationEnvelope {
        let payload = ChannelPayload::Content(vec![ContentChange::new(
            ContentId(7),
            ChangeKind::NodeChanged,
        )]);
        NotificationEnvelope {
            version: vellum_wire::ENVELOPE_VERSION,
            origin,
            channel: channel.as_uuid(),
            sequence,
            payload: payload.to_json().expect("encode"),
        }
    }

    #[test]
    fn duplicates_are_ignored_after_the_first_delivery() {
        let (receiver, observer) = receiver();
        let origin = Uuid::new_v4();

        let first = receiver
            .receive(envelope(origin, ChannelId::CONTENT, 1))
            .expect("apply");
        assert!(matches!(first, ReceiveOutcome::Applied(ref scope) if scope.nodes.contains(&7)));
        assert_eq!(
            receiver
                .receive(envelope(origin, ChannelId::CONTENT, 1))
                .expect("duplicate"),
            ReceiveOutcome::Duplicate
        );
        assert_eq!(observer.count_for(ChannelId::CONTENT), 1);
        assert_eq!(receiver.last_sequence(origin, ChannelId::CONTENT), Some(1));
    }

    #[test]
    fn sequence_gap_refreshes_the_whole_channel() {
        let (receiver, observer) = receiver();
        let origin = Uuid::new_v4();
        receiver
            .receive(envelope(origin, ChannelId::CONTENT, 1))
            .expect("apply");

        let outcome = receiver
            .receive(envelope(origin, ChannelId::CONTENT, 4))
            .expect("resync");
        assert!(matches!(outcome, ReceiveOutcome::Resynced(ref scope) if scope.refreshed_all));
        assert_eq!(receiver.last_sequence(origin, ChannelId::CONTENT), Some(4));

        let events = observer.events();
        assert!(events.last().is_some_and(|event| event.scope.refreshed_all));
    }

    #[test]
    fn sequences_are_tracked_per_origin_and_channel() {
        let (receiver, _) = receiver();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        receiver.receive(envelope(a, ChannelId::CONTENT, 1)).expect("a");
        receiver.receive(envelope(b, ChannelId::CONTENT, 1)).expect("b");
        receiver.receive(envelope(a, ChannelId::MEDIA, 1)).expect("media");
        assert_eq!(receiver.last_sequence(a, ChannelId::CONTENT), Some(1));
        assert_eq!(receiver.last_sequence(b, ChannelId::CONTENT), Some(1));
        assert_eq!(receiver.last_sequence(a, ChannelId::MEDIA), Some(1));
    }

    #[test]
    fn own_envelopes_and_bad_channels_are_not_applied() {
        let (receiver, observer) = receiver();
        assert_eq!(
            receiver
                .receive(envelope(receiver.node_id(), ChannelId::CONTENT, 1))
                .expect("self"),
            ReceiveOutcome::SelfOrigin
        );

        let origin = Uuid::new_v4();
        let local = receiver
            .receive(envelope(origin, ChannelId::TEMPLATE, 1))
            .expect_err("local only");
        assert!(matches!(local, ReceiveError::LocalOnly(ChannelId::TEMPLATE)));

        let unknown = receiver
            .receive(envelope(origin, ChannelId::from_uuid(Uuid::nil()), 1))
            .expect_err("unknown");
        assert!(matches!(
            unknown,
            ReceiveError::Channel(ChannelError::UnknownChannel(_))
        ));
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
        assert!(observer.events().is_empty());
    }

    #[test]
    fn undecodable_payload_does_not_advance_the_sequence() {
        let (receiver, _) = receiver();
        let origin = Uuid::new_v4();
        let mut bad = envelope(origin, ChannelId::CONTENT, 1);
        bad.payload = serde_json::json!([{ "id": 1, "changeTypes": 128 }]);

        assert!(matches!(
            receiver.receive(bad),
            Err(ReceiveError::Wire(WireError::UnknownBits { bits: 128 }))
        ));
        assert_eq!(receiver.last_sequence(origin, ChannelId::CONTENT), None);
    }
}
