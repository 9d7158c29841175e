//! Background delivery of queued envelopes.
//!
//! One worker drains the messenger's outbox in order. Peers are resolved for
//! every envelope; a failed send is logged and counted, never retried.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;
use vellum_wire::NotificationEnvelope;

use super::peers::PeerDirectory;
use super::transport::PeerTransport;

const METRIC_DELIVERED: &str = "vellum_cluster_delivered_total";
const METRIC_DELIVERY_FAILED: &str = "vellum_cluster_delivery_failed_total";

/// Per-envelope delivery counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

pub struct DispatchWorker {
    node_id: Uuid,
    advertised: Option<Url>,
    rx: mpsc::UnboundedReceiver<NotificationEnvelope>,
    peers: Arc<dyn PeerDirectory>,
    transport: Arc<dyn PeerTransport>,
}

impl DispatchWorker {
    pub fn new(
        node_id: Uuid,
        advertised: Option<Url>,
        rx: mpsc::UnboundedReceiver<NotificationEnvelope>,
        peers: Arc<dyn PeerDirectory>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            node_id,
            advertised,
            rx,
            peers,
            transport,
        }
    }

    /// Deliver until every messenger handle is dropped.
    pub async fn run(mut self) {
        info!(node_id = %self.node_id, "Cluster dispatch started");
        while let Some(envelope) = self.rx.recv().await {
            self.dispatch(&envelope).await;
        }
        info!(node_id = %self.node_id, "Cluster dispatch stopped");
    }

    /// Deliver whatever is queued right now; returns the totals.
    pub async fn drain_pending(&mut self) -> DispatchSummary {
        let mut total = DispatchSummary::default();
        while let Ok(envelope) = self.rx.try_recv() {
            let summary = self.dispatch(&envelope).await;
            total.delivered += summary.delivered;
            total.failed += summary.failed;
        }
        total
    }

    async fn dispatch(&self, envelope: &NotificationEnvelope) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        for peer in self.peers.peers() {
            if peer.is_local(self.node_id, self.advertised.as_ref()) {
                continue;
            }
            match self.transport.send(&peer, envelope).await {
                Ok(()) => {
                    summary.delivered += 1;
                    counter!(METRIC_DELIVERED).increment(1);
                    debug!(
                        peer = %peer.endpoint,
                        channel = %envelope.channel,
                        sequence = envelope.sequence,
                        "Notification delivered"
                    );
                }
                Err(err) => {
                    summary.failed += 1;
                    counter!(METRIC_DELIVERY_FAILED).increment(1);
                    warn!(
                        peer = %peer.endpoint,
                        channel = %envelope.channel,
                        sequence = envelope.sequence,
                        error = %err,
                        "Notification delivery failed"
                    );
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::cluster::peers::{PeerAddress, StaticPeerDirectory};
    use crate::cluster::transport::TransportError;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(Url, u64)>>,
    }

    #[async_trait]
    impl PeerTransport for Recording {
        async fn send(
            &self,
            peer: &PeerAddress,
            envelope: &NotificationEnvelope,
        ) -> Result<(), TransportError> {
            if peer.endpoint.host_str() == Some("down") {
                return Err(TransportError::Unreachable(peer.endpoint.clone()));
            }
            self.sent
                .lock()
                .expect("lock")
                .push((peer.endpoint.clone(), envelope.sequence));
            Ok(())
        }
    }

    fn url(text: &str) -> Url {
        Url::parse(text).expect("url")
    }

    fn envelope(sequence: u64) -> NotificationEnvelope {
        NotificationEnvelope::new::<u8>(Uuid::nil(), Uuid::nil(), sequence, &[]).expect("envelope")
    }

    #[tokio::test]
    async fn skips_self_and_keeps_going_after_failures() {
        let node = Uuid::new_v4();
        let peers = StaticPeerDirectory::new(vec![
            PeerAddress::new(url("http://me:1")),
            PeerAddress::new(url("http://down:1")),
            PeerAddress::new(url("http://peer:1")),
        ]);
        let transport = Arc::new(Recording::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut worker = DispatchWorker::new(
            node,
            Some(url("http://me:1")),
            rx,
            Arc::new(peers),
            transport.clone(),
        );

        tx.send(envelope(1)).expect("send");
        tx.send(envelope(2)).expect("send");
        let summary = worker.drain_pending().await;

        assert_eq!(summary, DispatchSummary { delivered: 2, failed: 2 });
        assert_eq!(
            *transport.sent.lock().expect("lock"),
            vec![(url("http://peer:1"), 1), (url("http://peer:1"), 2)]
        );
    }

    #[tokio::test]
    async fn run_finishes_when_senders_are_gone() {
        let transport = Arc::new(Recording::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = DispatchWorker::new(
            Uuid::new_v4(),
            None,
            rx,
            Arc::new(StaticPeerDirectory::new(vec![PeerAddress::new(url("http://peer:1"))])),
            transport.clone(),
        );
        tx.send(envelope(1)).expect("send");
        drop(tx);

        worker.run().await;
        assert_eq!(transport.sent.lock().expect("lock").len(), 1);
    }
}
