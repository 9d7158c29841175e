//! Per-write accumulation of change descriptors.
//!
//! One logical write fills one batch. Descriptors are appended in emission
//! order without dedup; on flush each non-empty channel becomes exactly one
//! payload, however many entities the write touched.

use super::changes::{
    ContentChange, ContentTypeChange, DataTypeChange, DomainChange, TemplateChange,
};
use super::channel::{ChannelId, ChannelPayload};

#[derive(Debug, Default)]
pub struct ChangeBatch {
    content_types: Vec<ContentTypeChange>,
    data_types: Vec<DataTypeChange>,
    content: Vec<ContentChange>,
    media: Vec<ContentChange>,
    tags: Vec<ContentChange>,
    domains: Vec<DomainChange>,
    templates: Vec<TemplateChange>,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&mut self, change: ContentChange) {
        self.content.push(change);
    }

    pub fn media(&mut self, change: ContentChange) {
        self.media.push(change);
    }

    pub fn tags(&mut self, change: ContentChange) {
        self.tags.push(change);
    }

    pub fn content_type(&mut self, change: ContentTypeChange) {
        self.content_types.push(change);
    }

    pub fn data_type(&mut self, change: DataTypeChange) {
        self.data_types.push(change);
    }

    pub fn domain(&mut self, change: DomainChange) {
        self.domains.push(change);
    }

    pub fn template(&mut self, change: TemplateChange) {
        self.templates.push(change);
    }

    /// Total descriptors across all channels.
    pub fn len(&self) -> usize {
        self.content_types.len()
            + self.data_types.len()
            + self.content.len()
            + self.media.len()
            + self.tags.len()
            + self.domains.len()
            + self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One payload per channel with pending descriptors. Structure channels come
    /// first so type caches are purged before the content that depends on them.
    pub fn into_payloads(self) -> Vec<(ChannelId, ChannelPayload)> {
        let ChangeBatch {
            content_types,
            data_types,
            content,
            media,
            tags,
            domains,
            templates,
        } = self;

        let mut payloads = Vec::new();
        if !data_types.is_empty() {
            payloads.push((ChannelId::DATA_TYPE, ChannelPayload::DataType(data_types)));
        }
        if !content_types.is_empty() {
            payloads.push((
                ChannelId::CONTENT_TYPE,
                ChannelPayload::ContentType(content_types),
            ));
        }
        if !content.is_empty() {
            payloads.push((ChannelId::CONTENT, ChannelPayload::Content(content)));
        }
        if !media.is_empty() {
            payloads.push((ChannelId::MEDIA, ChannelPayload::Content(media)));
        }
        if !tags.is_empty() {
            payloads.push((ChannelId::TAG, ChannelPayload::Content(tags)));
        }
        if !domains.is_empty() {
            payloads.push((ChannelId::DOMAIN, ChannelPayload::Domain(domains)));
        }
        if !templates.is_empty() {
            payloads.push((ChannelId::TEMPLATE, ChannelPayload::Template(templates)));
        }
        payloads
    }
}
