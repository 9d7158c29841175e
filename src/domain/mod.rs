//! Domain layer: content records, tree paths and publish rules.

pub mod entities;
pub mod error;
pub mod path;
pub mod publish;
pub mod slug;
pub mod types;
