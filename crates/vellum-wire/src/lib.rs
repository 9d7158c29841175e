//! Wire payloads exchanged between vellum nodes.
//!
//! Every invalidation channel serializes its batch as a JSON array of entries.
//! The array travels inside a [`NotificationEnvelope`] that names the origin
//! node, the channel and a per-channel sequence number.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

/// Bit values used by the `changeTypes` field.
pub mod change_bits {
    pub const REFRESH_ALL: u8 = 1;
    pub const REFRESH_NODE: u8 = 2;
    pub const REFRESH_BRANCH: u8 = 4;
    pub const REMOVE: u8 = 8;
    pub const REFRESH_PUBLISHED: u8 = 16;

    pub const ALL: u8 = REFRESH_ALL | REFRESH_NODE | REFRESH_BRANCH | REMOVE | REFRESH_PUBLISHED;
}

/// Id carried by the single entry of a refresh-all payload.
pub const REFRESH_ALL_SENTINEL_ID: i32 = 0;

/// Highest envelope format this build understands.
pub const ENVELOPE_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u16, supported: u16 },
    #[error("unknown change bits {bits:#04x}")]
    UnknownBits { bits: u8 },
}

/// `{ "id": 12, "changeTypes": 18 }`, used by content, media, tag and domain channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdChangeEntry {
    pub id: i32,
    pub change_types: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemTypeEntry {
    Content,
    Media,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTypeChangeEntry {
    pub item_type: ItemTypeEntry,
    pub id: i32,
    pub change_types: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTypeChangeEntry {
    pub id: i32,
    pub unique_id: Uuid,
    pub removed: bool,
}

impl DataTypeChangeEntry {
    /// Data-type payloads carry no flag field, so the sentinel is the zero id with a nil key.
    pub fn is_refresh_all(&self) -> bool {
        self.id == REFRESH_ALL_SENTINEL_ID && self.unique_id.is_nil() && !self.removed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateChangeEntry {
    pub alias: Option<String>,
    pub change_types: u8,
}

/// Validate a `changeTypes` value received from a peer.
pub fn check_bits(bits: u8) -> Result<u8, WireError> {
    if bits & !change_bits::ALL != 0 {
        return Err(WireError::UnknownBits { bits });
    }
    Ok(bits)
}

/// Envelope posted to `/cluster/notifications` on every peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub version: u16,
    pub origin: Uuid,
    pub channel: Uuid,
    pub sequence: u64,
    pub payload: serde_json::Value,
}

impl NotificationEnvelope {
    pub fn new<T: Serialize>(
        origin: Uuid,
        channel: Uuid,
        sequence: u64,
        entries: &[T],
    ) -> Result<Self, WireError> {
        Ok(Self {
            version: ENVELOPE_VERSION,
            origin,
            channel,
            sequence,
            payload: serde_json::to_value(entries)?,
        })
    }

    pub fn entries<T: DeserializeOwned>(&self) -> Result<Vec<T>, WireError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let envelope: Self = serde_json::from_slice(bytes)?;
        envelope.check_version()?;
        Ok(envelope)
    }

    pub fn check_version(&self) -> Result<(), WireError> {
        if self.version > ENVELOPE_VERSION {
            return Err(WireError::UnsupportedVersion {
                found: self.version,
                supported: ENVELOPE_VERSION,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_change_uses_camel_case_field() {
        let json = serde_json::to_string(&IdChangeEntry {
            id: 42,
            change_types: change_bits::REFRESH_NODE | change_bits::REFRESH_PUBLISHED,
        })
        .expect("serialize entry");
        assert_eq!(json, r#"{"id":42,"changeTypes":18}"#);
    }

    #[test]
    fn content_type_entry_lowercases_item_type() {
        let json = serde_json::to_string(&ContentTypeChangeEntry {
            item_type: ItemTypeEntry::Media,
            id: 3,
            change_types: change_bits::REMOVE,
        })
        .expect("serialize entry");
        assert_eq!(json, r#"{"itemType":"media","id":3,"changeTypes":8}"#);
    }

    #[test]
    fn envelope_payload_keeps_entry_field_order() {
        let envelope = NotificationEnvelope::new(
            Uuid::nil(),
            Uuid::nil(),
            3,
            &[ContentTypeChangeEntry {
                item_type: ItemTypeEntry::Content,
                id: 11,
                change_types: change_bits::REFRESH_NODE,
            }],
        )
        .expect("build envelope");
        let json = serde_json::to_string(&envelope.payload).expect("serialize payload");
        assert_eq!(json, r#"[{"itemType":"content","id":11,"changeTypes":2}]"#);
    }

    #[test]
    fn data_type_sentinel_is_detected() {
        let sentinel = DataTypeChangeEntry {
            id: REFRESH_ALL_SENTINEL_ID,
            unique_id: Uuid::nil(),
            removed: false,
        };
        assert!(sentinel.is_refresh_all());

        let regular = DataTypeChangeEntry {
            id: 7,
            unique_id: Uuid::new_v4(),
            removed: false,
        };
        assert!(!regular.is_refresh_all());
    }

    #[test]
    fn unknown_bits_are_rejected() {
        assert!(check_bits(change_bits::ALL).is_ok());
        assert!(matches!(
            check_bits(64),
            Err(WireError::UnknownBits { bits: 64 })
        ));
    }

    #[test]
    fn envelope_from_newer_version_is_rejected() {
        let mut envelope = NotificationEnvelope::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1,
            &[IdChangeEntry {
                id: 1,
                change_types: change_bits::REFRESH_NODE,
            }],
        )
        .expect("build envelope");
        envelope.version = ENVELOPE_VERSION + 1;
        let bytes = serde_json::to_vec(&envelope).expect("encode");

        assert!(matches!(
            NotificationEnvelope::from_bytes(&bytes),
            Err(WireError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn envelope_bytes_round_trip() {
        let envelope = NotificationEnvelope::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            9,
            &[DataTypeChangeEntry {
                id: 5,
                unique_id: Uuid::new_v4(),
                removed: true,
            }],
        )
        .expect("build envelope");

        let decoded =
            NotificationEnvelope::from_bytes(&envelope.to_bytes().expect("encode")).expect("decode");
        assert_eq!(decoded, envelope);
        let entries: Vec<DataTypeChangeEntry> = decoded.entries().expect("entries");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].removed);
    }
}
