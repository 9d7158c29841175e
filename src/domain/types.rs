//! Identifiers and enumerations shared by the content model.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
            sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            pub fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }
    };
}

integer_id!(
    /// Integer identity of a document or media item.
    ContentId(i32)
);
integer_id!(VersionId(i64));
integer_id!(ContentTypeId(i32));
integer_id!(DataTypeId(i32));
integer_id!(DomainId(i32));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "content_kind", rename_all = "snake_case")]
pub enum ContentKind {
    Document,
    Media,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Document => "document",
            ContentKind::Media => "media",
        }
    }
}

/// What a content type describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "item_type", rename_all = "snake_case")]
pub enum ItemType {
    Content,
    Media,
    Member,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Content => "content",
            ItemType::Media => "media",
            ItemType::Member => "member",
        }
    }

    /// Kind of stored item this type produces; members live outside the content tree.
    pub fn content_kind(self) -> Option<ContentKind> {
        match self {
            ItemType::Content => Some(ContentKind::Document),
            ItemType::Media => Some(ContentKind::Media),
            ItemType::Member => None,
        }
    }
}

/// Derived publish state of a content entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentState {
    Draft,
    Published,
    PublishedWithChanges,
    Trashed,
}

impl ContentState {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentState::Draft => "draft",
            ContentState::Published => "published",
            ContentState::PublishedWithChanges => "published_with_changes",
            ContentState::Trashed => "trashed",
        }
    }
}

/// Which projection of content a read targets: newest versions or published versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Preview {
    Published,
    Draft,
}

impl Preview {
    /// Resolve an optional per-call flag against the ambient request default.
    pub fn from_context(flag: Option<bool>, context_default: Preview) -> Preview {
        match flag {
            Some(true) => Preview::Draft,
            Some(false) => Preview::Published,
            None => context_default,
        }
    }

    pub fn is_draft(self) -> bool {
        matches!(self, Preview::Draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flag_overrides_context_default() {
        assert_eq!(
            Preview::from_context(Some(true), Preview::Published),
            Preview::Draft
        );
        assert_eq!(
            Preview::from_context(Some(false), Preview::Draft),
            Preview::Published
        );
        assert_eq!(Preview::from_context(None, Preview::Draft), Preview::Draft);
    }

    #[test]
    fn member_types_have_no_content_kind() {
        assert_eq!(ItemType::Member.content_kind(), None);
        assert_eq!(ItemType::Media.content_kind(), Some(ContentKind::Media));
    }
}
