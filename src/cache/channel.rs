//! Invalidation channel protocol.
//!
//! A channel owns one kind of cache and knows how to purge it from a batch of
//! change descriptors. Channels are addressed by a stable UUID so that every
//! node in the cluster agrees on where a payload goes.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;
use vellum_wire::{
    ContentTypeChangeEntry, DataTypeChangeEntry, IdChangeEntry, TemplateChangeEntry, WireError,
};

use super::changes::{ContentChange, ContentTypeChange, DataTypeChange, DomainChange, TemplateChange};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub const CONTENT: ChannelId =
        ChannelId(Uuid::from_u128(0x5569_8352_dfc5_4dbe_96bd_a4a0_f6f7_7145));
    pub const MEDIA: ChannelId =
        ChannelId(Uuid::from_u128(0xb29f_e2d1_b7f4_44d1_9e05_8b0b_6a4f_c2d3));
    pub const TAG: ChannelId =
        ChannelId(Uuid::from_u128(0x7b37_7c1f_2c35_4e0b_a5d6_2a7b_8c0d_e1f2));
    pub const CONTENT_TYPE: ChannelId =
        ChannelId(Uuid::from_u128(0x6902_e22c_9c10_483c_91f3_66b7_cae9_e2f5));
    pub const DATA_TYPE: ChannelId =
        ChannelId(Uuid::from_u128(0x35b1_6c25_a17e_45d7_bc8f_edab_1dcc_28d2));
    pub const DOMAIN: ChannelId =
        ChannelId(Uuid::from_u128(0x1129_0a79_4b57_4c99_ad72_7748_a369_1e4b));
    pub const TEMPLATE: ChannelId =
        ChannelId(Uuid::from_u128(0xdd12_b6a0_14b9_46e8_8800_c154_f74e_c4b0));

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which entry shape a channel's payload uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Content,
    ContentType,
    DataType,
    Domain,
    Template,
}

/// A decoded channel payload. Each channel accepts exactly one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelPayload {
    Content(Vec<ContentChange>),
    ContentType(Vec<ContentTypeChange>),
    DataType(Vec<DataTypeChange>),
    Domain(Vec<DomainChange>),
    Template(Vec<TemplateChange>),
}

impl ChannelPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            ChannelPayload::Content(_) => PayloadKind::Content,
            ChannelPayload::ContentType(_) => PayloadKind::ContentType,
            ChannelPayload::DataType(_) => PayloadKind::DataType,
            ChannelPayload::Domain(_) => PayloadKind::Domain,
            ChannelPayload::Template(_) => PayloadKind::Template,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ChannelPayload::Content(items) => items.len(),
            ChannelPayload::ContentType(items) => items.len(),
            ChannelPayload::DataType(items) => items.len(),
            ChannelPayload::Domain(items) => items.len(),
            ChannelPayload::Template(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single-entry sentinel payload that drops the whole cache.
    pub fn refresh_all(kind: PayloadKind) -> Self {
        match kind {
            PayloadKind::Content => ChannelPayload::Content(vec![ContentChange::refresh_all()]),
            PayloadKind::ContentType => {
                ChannelPayload::ContentType(vec![ContentTypeChange::refresh_all()])
            }
            PayloadKind::DataType => ChannelPayload::DataType(vec![DataTypeChange::refresh_all()]),
            PayloadKind::Domain => ChannelPayload::Domain(vec![DomainChange::refresh_all()]),
            PayloadKind::Template => ChannelPayload::Template(vec![TemplateChange::refresh_all()]),
        }
    }

    pub fn to_json(&self) -> Result<Value, WireError> {
        let value = match self {
            ChannelPayload::Content(items) => {
                serde_json::to_value(items.iter().map(|c| c.to_wire()).collect::<Vec<_>>())?
            }
            ChannelPayload::ContentType(items) => {
                serde_json::to_value(items.iter().map(|c| c.to_wire()).collect::<Vec<_>>())?
            }
            ChannelPayload::DataType(items) => {
                serde_json::to_value(items.iter().map(|c| c.to_wire()).collect::<Vec<_>>())?
            }
            ChannelPayload::Domain(items) => {
                serde_json::to_value(items.iter().map(|c| c.to_wire()).collect::<Vec<_>>())?
            }
            ChannelPayload::Template(items) => {
                serde_json::to_value(items.iter().map(|c| c.to_wire()).collect::<Vec<_>>())?
            }
        };
        Ok(value)
    }

    pub fn from_json(kind: PayloadKind, value: Value) -> Result<Self, WireError> {
        let payload = match kind {
            PayloadKind::Content => {
                let entries: Vec<IdChangeEntry> = serde_json::from_value(value)?;
                ChannelPayload::Content(
                    entries
                        .into_iter()
                        .map(ContentChange::from_wire)
                        .collect::<Result<_, _>>()?,
                )
            }
            PayloadKind::ContentType => {
                let entries: Vec<ContentTypeChangeEntry> = serde_json::from_value(value)?;
                ChannelPayload::ContentType(
                    entries
                        .into_iter()
                        .map(ContentTypeChange::from_wire)
                        .collect::<Result<_, _>>()?,
                )
            }
            PayloadKind::DataType => {
                let entries: Vec<DataTypeChangeEntry> = serde_json::from_value(value)?;
                ChannelPayload::DataType(entries.into_iter().map(DataTypeChange::from_wire).collect())
            }
            PayloadKind::Domain => {
                let entries: Vec<IdChangeEntry> = serde_json::from_value(value)?;
                ChannelPayload::Domain(
                    entries
                        .into_iter()
                        .map(DomainChange::from_wire)
                        .collect::<Result<_, _>>()?,
                )
            }
            PayloadKind::Template => {
                let entries: Vec<TemplateChangeEntry> = serde_json::from_value(value)?;
                ChannelPayload::Template(
                    entries
                        .into_iter()
                        .map(TemplateChange::from_wire)
                        .collect::<Result<_, _>>()?,
                )
            }
        };
        Ok(payload)
    }
}

/// Message shapes a channel may declare support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageShape {
    Payload,
    RefreshAll,
    RefreshById,
    RemoveById,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Payload(ChannelPayload),
    RefreshAll,
    RefreshById(i32),
    RemoveById(i32),
}

impl ChannelMessage {
    pub fn shape(&self) -> MessageShape {
        match self {
            ChannelMessage::Payload(_) => MessageShape::Payload,
            ChannelMessage::RefreshAll => MessageShape::RefreshAll,
            ChannelMessage::RefreshById(_) => MessageShape::RefreshById,
            ChannelMessage::RemoveById(_) => MessageShape::RemoveById,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel `{channel}` does not accept {shape:?} messages")]
    UnsupportedShape {
        channel: &'static str,
        shape: MessageShape,
    },
    #[error("channel `{channel}` expects {expected:?} payloads but received {found:?}")]
    PayloadMismatch {
        channel: &'static str,
        expected: PayloadKind,
        found: PayloadKind,
    },
    #[error("no channel registered under {0}")]
    UnknownChannel(ChannelId),
    #[error("channel {0} is registered twice")]
    DuplicateChannel(ChannelId),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// What a channel purged while applying one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedScope {
    pub refreshed_all: bool,
    pub nodes: BTreeSet<i32>,
    pub branches: BTreeSet<i32>,
    pub removed: BTreeSet<i32>,
    /// Number of cache entries dropped.
    pub purged: usize,
}

impl AppliedScope {
    pub fn everything(purged: usize) -> Self {
        Self {
            refreshed_all: true,
            purged,
            ..Self::default()
        }
    }
}

/// Handler for one cache kind.
pub trait InvalidationChannel: Send + Sync {
    fn id(&self) -> ChannelId;

    fn name(&self) -> &'static str;

    fn payload_kind(&self) -> PayloadKind;

    fn accepted_shapes(&self) -> &'static [MessageShape] {
        &[MessageShape::Payload]
    }

    /// Local-only channels are never sent to peers.
    fn local_only(&self) -> bool {
        false
    }

    fn apply(&self, message: ChannelMessage) -> Result<AppliedScope, ChannelError>;
}

/// Unwrap the payload a structured channel expects, rejecting every other shape.
pub(crate) fn expect_payload<C: InvalidationChannel + ?Sized>(
    channel: &C,
    message: ChannelMessage,
) -> Result<ChannelPayload, ChannelError> {
    match message {
        ChannelMessage::Payload(payload) if payload.kind() == channel.payload_kind() => Ok(payload),
        ChannelMessage::Payload(payload) => Err(payload_mismatch(channel, &payload)),
        other => Err(ChannelError::UnsupportedShape {
            channel: channel.name(),
            shape: other.shape(),
        }),
    }
}

pub(crate) fn payload_mismatch<C: InvalidationChannel + ?Sized>(
    channel: &C,
    payload: &ChannelPayload,
) -> ChannelError {
    ChannelError::PayloadMismatch {
        channel: channel.name(),
        expected: channel.payload_kind(),
        found: payload.kind(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::cache::changes::ChangeKind;
    use crate::domain::types::{ContentId, ContentTypeId, DataTypeId, ItemType};

    fn sorted(mut items: Vec<ContentChange>) -> Vec<(i32, u8)> {
        items.sort_by_key(|change| change.id);
        items
            .into_iter()
            .map(|change| (change.id.0, change.changes.bits()))
            .collect()
    }

    #[test]
    fn content_payload_survives_json() {
        let payload = ChannelPayload::Content(vec![
            ContentChange::new(ContentId(4), ChangeKind::NodeChanged | ChangeKind::PublishedChanged),
            ContentChange::new(ContentId(2), ChangeKind::Removed),
        ]);
        let decoded = ChannelPayload::from_json(
            PayloadKind::Content,
            payload.to_json().expect("encode"),
        )
        .expect("decode");

        let (ChannelPayload::Content(original), ChannelPayload::Content(decoded)) =
            (payload, decoded)
        else {
            panic!("content payloads expected");
        };
        assert_eq!(sorted(original), sorted(decoded));
    }

    #[test]
    fn structure_payloads_survive_json() {
        let payloads = [
            ChannelPayload::ContentType(vec![ContentTypeChange::new(
                ItemType::Media,
                ContentTypeId(3),
                ChangeKind::Removed,
            )]),
            ChannelPayload::DataType(vec![DataTypeChange {
                id: DataTypeId(8),
                key: Uuid::new_v4(),
                removed: true,
            }]),
            ChannelPayload::refresh_all(PayloadKind::Domain),
            ChannelPayload::Template(vec![TemplateChange::refreshed("article")]),
        ];

        for payload in payloads {
            let decoded =
                ChannelPayload::from_json(payload.kind(), payload.to_json().expect("encode"))
                    .expect("decode");
            assert_eq!(decoded, payload);
        }
    }

    #[test]
    fn content_wire_shape_is_id_and_bits() {
        let payload = ChannelPayload::Content(vec![ContentChange::new(
            ContentId(12),
            ChangeKind::NodeChanged | ChangeKind::Removed,
        )]);
        assert_eq!(
            payload.to_json().expect("encode"),
            json!([{ "id": 12, "changeTypes": 10 }])
        );
    }

    #[test]
    fn decoding_with_the_wrong_kind_fails() {
        let payload = ChannelPayload::DataType(vec![DataTypeChange::refresh_all()]);
        let value = payload.to_json().expect("encode");
        assert!(ChannelPayload::from_json(PayloadKind::Content, value).is_err());
    }
}
