//! Document and media writes.
//!
//! Every operation runs in one [`WriteScope`](crate::application::unit_of_work::WriteScope):
//! store writes and the change descriptors they produce commit together.

mod commands;
mod service;
mod types;


pub use service::ContentService;
pub use types::{ContentServiceError, SaveContentCommand, SaveTarget, ScheduledRun};
