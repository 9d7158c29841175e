//! Local application and outbound queueing of flushed batches.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use metrics::histogram;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;
use vellum_wire::{ENVELOPE_VERSION, NotificationEnvelope};

use crate::cache::{
    AppliedScope, CacheInvalidator, ChangeBatch, ChannelError, ChannelId, ChannelMessage,
    ChannelPayload, RefreshOrigin,
};
use crate::util::lock::mutex_lock;

const SOURCE: &str = "cluster::messenger";
const METRIC_FLUSH_MS: &str = "vellum_flush_ms";

/// What one flush did on this node.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Scope applied per channel, in flush order.
    pub applied: Vec<(ChannelId, AppliedScope)>,
    /// Envelopes queued for peers.
    pub enqueued: usize,
    /// Channels whose payload was rejected and which were refreshed whole
    /// instead.
    pub fallbacks: Vec<ChannelId>,
}

impl FlushReport {
    fn record(&mut self, channel: ChannelId, scope: AppliedScope, queued: bool) {
        if queued {
            self.enqueued += 1;
        }
        self.applied.push((channel, scope));
    }

    pub fn scope(&self, channel: ChannelId) -> Option<&AppliedScope> {
        self.applied
            .iter()
            .find(|(id, _)| *id == channel)
            .map(|(_, scope)| scope)
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.applied.iter().map(|(id, _)| *id).collect()
    }
}

pub struct ClusterMessenger {
    node_id: Uuid,
    invalidator: CacheInvalidator,
    sequences: Mutex<HashMap<ChannelId, u64>>,
    outbox: mpsc::UnboundedSender<NotificationEnvelope>,
}

impl ClusterMessenger {
    /// Messenger plus the receiving end of its outbox, to be drained by a
    /// [`DispatchWorker`](super::DispatchWorker).
    pub fn new(
        node_id: Uuid,
        invalidator: CacheInvalidator,
    ) -> (Self, mpsc::UnboundedReceiver<NotificationEnvelope>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let messenger = Self {
            node_id,
            invalidator,
            sequences: Mutex::new(HashMap::new()),
            outbox,
        };
        (messenger, rx)
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn invalidator(&self) -> &CacheInvalidator {
        &self.invalidator
    }

    /// Apply every payload of `batch` here, then queue one envelope per
    /// broadcast channel for the peers.
    ///
    /// A channel that rejects its payload is refreshed whole instead, and the
    /// remaining channels are still flushed. The first error is returned only
    /// when that refresh fails too.
    pub fn flush(&self, batch: ChangeBatch) -> Result<FlushReport, ChannelError> {
        let started_at = Instant::now();
        let descriptors = batch.len();
        let mut report = FlushReport::default();
        let mut first_error = None;

        for (channel, payload) in batch.into_payloads() {
            let err = match self.publish(channel, payload) {
                Ok((scope, queued)) => {
                    report.record(channel, scope, queued);
                    continue;
                }
                Err(err) => err,
            };
            warn!(%channel, error = %err, "Channel rejected flushed payload; refreshing it whole");
            match self.publish_refresh_all(channel) {
                Ok((scope, queued)) => {
                    report.fallbacks.push(channel);
                    report.record(channel, scope, queued);
                }
                Err(fallback) => {
                    error!(%channel, error = %fallback, "Whole-channel refresh failed after rejected flush");
                    first_error.get_or_insert(err);
                }
            }
        }

        histogram!(METRIC_FLUSH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        if !report.applied.is_empty() {
            info!(
                descriptors,
                channels = report.applied.len(),
                enqueued = report.enqueued,
                fallbacks = report.fallbacks.len(),
                "Change batch flushed"
            );
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Apply a payload on this node only.
    pub fn deliver_local(
        &self,
        channel: ChannelId,
        payload: ChannelPayload,
    ) -> Result<AppliedScope, ChannelError> {
        self.invalidator
            .apply(channel, ChannelMessage::Payload(payload), RefreshOrigin::Local)
    }

    /// Drop everything `channel` caches here and on every peer.
    pub fn refresh_all(&self, channel: ChannelId) -> Result<AppliedScope, ChannelError> {
        let (scope, _) = self.publish_refresh_all(channel)?;
        Ok(scope)
    }

    fn publish_refresh_all(&self, channel: ChannelId) -> Result<(AppliedScope, bool), ChannelError> {
        let kind = self.invalidator.registry().get(channel)?.payload_kind;
        self.publish(channel, ChannelPayload::refresh_all(kind))
    }

    /// Returns the applied scope and whether an envelope was queued.
    fn publish(
        &self,
        channel: ChannelId,
        payload: ChannelPayload,
    ) -> Result<(AppliedScope, bool), ChannelError> {
        let registration = self.invalidator.registry().get(channel)?;
        let wire = if registration.local_only {
            None
        } else {
            Some(payload.to_json()?)
        };

        let scope = self.invalidator.apply(
            channel,
            ChannelMessage::Payload(payload),
            RefreshOrigin::Local,
        )?;

        let queued = match wire {
            Some(value) => self.enqueue(channel, value),
            None => false,
        };
        Ok((scope, queued))
    }

    fn enqueue(&self, channel: ChannelId, payload: serde_json::Value) -> bool {
        // Held across the send so sequence order matches queue order.
        let mut sequences = mutex_lock(&self.sequences, SOURCE, "enqueue");
        let sequence = sequences.entry(channel).or_insert(0);
        *sequence += 1;

        let envelope = NotificationEnvelope {
            version: ENVELOPE_VERSION,
            origin: self.node_id,
            channel: channel.as_uuid(),
            sequence: *sequence,
            payload,
        };
        match self.outbox.send(envelope) {
            Ok(()) => true,
            Err(_) => {
                warn!(%channel, "Dispatch worker stopped; envelope dropped");
                false
            }
        }
    }
}
