//! Change descriptors.
//!
//! A descriptor names one entity and the set of ways it changed. Sets are
//! built from [`ChangeKind`] values, so only the five known kinds can ever be
//! combined; the bitmask exists only at the wire boundary.

use std::fmt;
use std::ops::BitOr;

use uuid::Uuid;
use vellum_wire::{
    ContentTypeChangeEntry, DataTypeChangeEntry, IdChangeEntry, ItemTypeEntry,
    REFRESH_ALL_SENTINEL_ID, TemplateChangeEntry, WireError, change_bits, check_bits,
};

use crate::domain::types::{ContentId, ContentTypeId, DataTypeId, DomainId, ItemType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Drop everything this channel caches.
    AllInvalidated,
    /// The newest (draft) state of the entity changed.
    NodeChanged,
    /// The entity and every descendant changed.
    BranchChanged,
    /// The entity is gone; combined with `NodeChanged` only the published state is gone.
    Removed,
    /// The published state of the entity changed.
    PublishedChanged,
}

impl ChangeKind {
    const ALL: [ChangeKind; 5] = [
        ChangeKind::AllInvalidated,
        ChangeKind::NodeChanged,
        ChangeKind::BranchChanged,
        ChangeKind::Removed,
        ChangeKind::PublishedChanged,
    ];

    const fn bit(self) -> u8 {
        match self {
            ChangeKind::AllInvalidated => change_bits::REFRESH_ALL,
            ChangeKind::NodeChanged => change_bits::REFRESH_NODE,
            ChangeKind::BranchChanged => change_bits::REFRESH_BRANCH,
            ChangeKind::Removed => change_bits::REMOVE,
            ChangeKind::PublishedChanged => change_bits::REFRESH_PUBLISHED,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChangeTypes(u8);

impl ChangeTypes {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn of(kind: ChangeKind) -> Self {
        Self(kind.bit())
    }

    pub const fn with(self, kind: ChangeKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn contains(self, kind: ChangeKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn kinds(self) -> impl Iterator<Item = ChangeKind> {
        ChangeKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Result<Self, WireError> {
        check_bits(bits).map(Self)
    }
}

impl From<ChangeKind> for ChangeTypes {
    fn from(kind: ChangeKind) -> Self {
        Self::of(kind)
    }
}

impl BitOr for ChangeKind {
    type Output = ChangeTypes;

    fn bitor(self, rhs: ChangeKind) -> ChangeTypes {
        ChangeTypes::of(self).with(rhs)
    }
}

impl BitOr<ChangeKind> for ChangeTypes {
    type Output = ChangeTypes;

    fn bitor(self, rhs: ChangeKind) -> ChangeTypes {
        self.with(rhs)
    }
}

impl fmt::Debug for ChangeTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.kinds()).finish()
    }
}

/// `{ id, change types }` for documents, media and tag caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentChange {
    pub id: ContentId,
    pub changes: ChangeTypes,
}

impl ContentChange {
    pub fn new(id: ContentId, changes: impl Into<ChangeTypes>) -> Self {
        Self {
            id,
            changes: changes.into(),
        }
    }

    pub fn refresh_all() -> Self {
        Self::new(
            ContentId(REFRESH_ALL_SENTINEL_ID),
            ChangeKind::AllInvalidated,
        )
    }

    pub fn is_refresh_all(&self) -> bool {
        self.changes.contains(ChangeKind::AllInvalidated)
    }

    pub fn to_wire(self) -> IdChangeEntry {
        IdChangeEntry {
            id: self.id.0,
            change_types: self.changes.bits(),
        }
    }

    pub fn from_wire(entry: IdChangeEntry) -> Result<Self, WireError> {
        Ok(Self {
            id: ContentId(entry.id),
            changes: ChangeTypes::from_bits(entry.change_types)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentTypeChange {
    pub item_type: ItemType,
    pub id: ContentTypeId,
    pub changes: ChangeTypes,
}

impl ContentTypeChange {
    pub fn new(item_type: ItemType, id: ContentTypeId, changes: impl Into<ChangeTypes>) -> Self {
        Self {
            item_type,
            id,
            changes: changes.into(),
        }
    }

    pub fn refresh_all() -> Self {
        Self::new(
            ItemType::Content,
            ContentTypeId(REFRESH_ALL_SENTINEL_ID),
            ChangeKind::AllInvalidated,
        )
    }

    pub fn is_refresh_all(&self) -> bool {
        self.changes.contains(ChangeKind::AllInvalidated)
    }

    pub fn to_wire(self) -> ContentTypeChangeEntry {
        ContentTypeChangeEntry {
            item_type: match self.item_type {
                ItemType::Content => ItemTypeEntry::Content,
                ItemType::Media => ItemTypeEntry::Media,
                ItemType::Member => ItemTypeEntry::Member,
            },
            id: self.id.0,
            change_types: self.changes.bits(),
        }
    }

    pub fn from_wire(entry: ContentTypeChangeEntry) -> Result<Self, WireError> {
        let item_type = match entry.item_type {
            ItemTypeEntry::Content => ItemType::Content,
            ItemTypeEntry::Media => ItemType::Media,
            ItemTypeEntry::Member => ItemType::Member,
        };
        Ok(Self {
            item_type,
            id: ContentTypeId(entry.id),
            changes: ChangeTypes::from_bits(entry.change_types)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataTypeChange {
    pub id: DataTypeId,
    pub key: Uuid,
    pub removed: bool,
}

impl DataTypeChange {
    pub fn refresh_all() -> Self {
        Self {
            id: DataTypeId(REFRESH_ALL_SENTINEL_ID),
            key: Uuid::nil(),
            removed: false,
        }
    }

    pub fn is_refresh_all(&self) -> bool {
        self.to_wire().is_refresh_all()
    }

    pub fn to_wire(self) -> DataTypeChangeEntry {
        DataTypeChangeEntry {
            id: self.id.0,
            unique_id: self.key,
            removed: self.removed,
        }
    }

    pub fn from_wire(entry: DataTypeChangeEntry) -> Self {
        Self {
            id: DataTypeId(entry.id),
            key: entry.unique_id,
            removed: entry.removed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainChange {
    pub id: DomainId,
    pub changes: ChangeTypes,
}

impl DomainChange {
    pub fn new(id: DomainId, changes: impl Into<ChangeTypes>) -> Self {
        Self {
            id,
            changes: changes.into(),
        }
    }

    pub fn refresh_all() -> Self {
        Self::new(DomainId(REFRESH_ALL_SENTINEL_ID), ChangeKind::AllInvalidated)
    }

    pub fn is_refresh_all(&self) -> bool {
        self.changes.contains(ChangeKind::AllInvalidated)
    }

    pub fn to_wire(self) -> IdChangeEntry {
        IdChangeEntry {
            id: self.id.0,
            change_types: self.changes.bits(),
        }
    }

    pub fn from_wire(entry: IdChangeEntry) -> Result<Self, WireError> {
        Ok(Self {
            id: DomainId(entry.id),
            changes: ChangeTypes::from_bits(entry.change_types)?,
        })
    }
}

/// Template source changes; `alias: None` means every template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateChange {
    pub alias: Option<String>,
    pub changes: ChangeTypes,
}

impl TemplateChange {
    pub fn refreshed(alias: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            changes: ChangeTypes::of(ChangeKind::NodeChanged),
        }
    }

    pub fn removed(alias: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            changes: ChangeTypes::of(ChangeKind::Removed),
        }
    }

    pub fn refresh_all() -> Self {
        Self {
            alias: None,
            changes: ChangeTypes::of(ChangeKind::AllInvalidated),
        }
    }

    pub fn to_wire(&self) -> TemplateChangeEntry {
        TemplateChangeEntry {
            alias: self.alias.clone(),
            change_types: self.changes.bits(),
        }
    }

    pub fn from_wire(entry: TemplateChangeEntry) -> Result<Self, WireError> {
        Ok(Self {
            alias: entry.alias,
            changes: ChangeTypes::from_bits(entry.change_types)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_combine_into_sets() {
        let changes = ChangeKind::NodeChanged | ChangeKind::PublishedChanged;
        assert!(changes.contains(ChangeKind::NodeChanged));
        assert!(changes.contains(ChangeKind::PublishedChanged));
        assert!(!changes.contains(ChangeKind::Removed));
        assert_eq!(changes.bits(), 18);
        assert_eq!(
            changes.kinds().collect::<Vec<_>>(),
            vec![ChangeKind::NodeChanged, ChangeKind::PublishedChanged]
        );
    }

    #[test]
    fn from_bits_rejects_unknown_flags() {
        assert!(ChangeTypes::from_bits(0b1_0000).is_ok());
        assert!(ChangeTypes::from_bits(0b10_0000).is_err());
    }

    #[test]
    fn sentinels_carry_refresh_all() {
        assert!(ContentChange::refresh_all().is_refresh_all());
        assert_eq!(ContentChange::refresh_all().to_wire().id, 0);
        assert!(ContentTypeChange::refresh_all().is_refresh_all());
        assert!(DataTypeChange::refresh_all().is_refresh_all());
    }

    #[test]
    fn debug_lists_kinds() {
        let changes = ChangeKind::NodeChanged | ChangeKind::Removed;
        assert_eq!(format!("{changes:?}"), "{NodeChanged, Removed}");
    }
}
