//! Node-local caches and the invalidation protocol that keeps them current.
//!
//! A write fills a [`ChangeBatch`]; each channel turns its payload into purges
//! of the [`ProjectionCache`] and its secondary caches, and the
//! [`CacheInvalidator`] reports each applied payload to observers.

mod batch;
mod changes;
mod channel;
pub mod channels;
mod config;
mod dependencies;
mod events;
mod fragments;
mod invalidator;
mod layer;
mod projection;
mod query;
mod registry;
mod templates;

pub use batch::ChangeBatch;
pub use changes::{
    ChangeKind, ChangeTypes, ContentChange, ContentTypeChange, DataTypeChange, DomainChange,
    TemplateChange,
};
pub use channel::{
    AppliedScope, ChannelError, ChannelId, ChannelMessage, ChannelPayload, InvalidationChannel,
    MessageShape, PayloadKind,
};
pub use config::CacheConfig;
pub use dependencies::{Dependency, DependencyIndex};
pub use events::{
    CacheObserver, CacheRefreshed, Epoch, ObserverRegistry, RecordingObserver, RefreshOrigin,
};
pub use fragments::{FragmentCache, FragmentKey};
pub use invalidator::CacheInvalidator;
pub use layer::CacheLayer;
pub use projection::{ProjectedContent, ProjectionCache, ProjectionError};
pub use query::{Axis, NodeTest, Predicate, Query, QueryError, Step};
pub use registry::{ChannelRegistration, ChannelRegistry, ChannelRegistryBuilder};
pub use templates::{CompiledTemplate, TemplateCache, TemplateError};
