//! Application services: writes through scopes, reads through the caches.

pub mod content;
pub mod context;
pub mod error;
pub mod media;
pub mod render;
pub mod repos;
pub mod scheduler;
pub mod structure;
pub mod unit_of_work;
