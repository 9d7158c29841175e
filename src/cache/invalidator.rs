//! Applies channel messages and reports what was refreshed.
//!
//! Used by both the messenger (local flush) and the receiver (remote
//! envelopes), so a payload has the same effect wherever it is applied.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{debug, info};

use super::channel::{AppliedScope, ChannelError, ChannelId, ChannelMessage};
use super::events::{ObserverRegistry, RefreshOrigin};
use super::registry::ChannelRegistry;

const METRIC_CACHE_APPLY_MS: &str = "vellum_cache_apply_ms";

#[derive(Clone)]
pub struct CacheInvalidator {
    registry: Arc<ChannelRegistry>,
    observers: Arc<ObserverRegistry>,
}

impl CacheInvalidator {
    pub fn new(registry: Arc<ChannelRegistry>, observers: Arc<ObserverRegistry>) -> Self {
        Self {
            registry,
            observers,
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Apply one message to its channel and notify observers once.
    pub fn apply(
        &self,
        channel: ChannelId,
        message: ChannelMessage,
        origin: RefreshOrigin,
    ) -> Result<AppliedScope, ChannelError> {
        let started_at = Instant::now();
        let registration = self.registry.get(channel)?;
        let entries = match &message {
            ChannelMessage::Payload(payload) => payload.len(),
            _ => 1,
        };

        let scope = registration.apply(message)?;

        debug!(
            channel = registration.name,
            nodes = ?scope.nodes,
            branches = ?scope.branches,
            removed = ?scope.removed,
            "Cache scope purged"
        );
        info!(
            channel = registration.name,
            entries,
            purged = scope.purged,
            refreshed_all = scope.refreshed_all,
            ?origin,
            "Cache payload applied"
        );
        histogram!(METRIC_CACHE_APPLY_MS, "channel" => registration.name)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        self.observers
            .notify(channel, registration.name, origin, scope.clone());
        Ok(scope)
    }
}
