//! HTTP surface of a node: the peer notification endpoint and a health probe.

mod cluster;
mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::repos::ContentStore;
use crate::cluster::NotificationReceiver;

pub use middleware::{DeliveryTrace, REQUEST_ID_HEADER, RequestContext};

#[derive(Clone)]
pub struct HttpState {
    pub receiver: Arc<NotificationReceiver>,
    pub store: Arc<dyn ContentStore>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/cluster/notifications", post(cluster::receive_notification))
        .route("/health", get(cluster::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::trace_requests))
}
