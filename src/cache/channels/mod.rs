//! Channel handlers, one per cache kind.

mod content;
mod structure;
mod tag;
mod template;

pub use content::{ContentChannel, MediaChannel};
pub use structure::{ContentTypeChannel, DataTypeChannel, DomainChannel};
pub use tag::TagChannel;
pub use template::TemplateChannel;
