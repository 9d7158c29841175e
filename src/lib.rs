//! Versioned content store with a draft/published model and cluster-wide
//! cache invalidation.

pub mod application;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
