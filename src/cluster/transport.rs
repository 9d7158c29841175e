//! Delivery of envelopes to one peer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use url::Url;
use vellum_wire::{NotificationEnvelope, WireError};

use super::peers::PeerAddress;
use super::receiver::NotificationReceiver;
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "cluster::transport";
const NOTIFICATIONS_PATH: &str = "cluster/notifications";
const USER_AGENT: &str = concat!("vellum/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error("peer {endpoint} answered {status}")]
    Rejected { endpoint: Url, status: u16 },
    #[error("peer {0} is unreachable")]
    Unreachable(Url),
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(
        &self,
        peer: &PeerAddress,
        envelope: &NotificationEnvelope,
    ) -> Result<(), TransportError>;
}

/// Posts envelopes as JSON to `{endpoint}/cluster/notifications`.
#[derive(Clone)]
pub struct HttpPeerTransport {
    client: Client,
}

impl HttpPeerTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    fn notifications_url(endpoint: &Url) -> Result<Url, url::ParseError> {
        let mut base = endpoint.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(NOTIFICATIONS_PATH)
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn send(
        &self,
        peer: &PeerAddress,
        envelope: &NotificationEnvelope,
    ) -> Result<(), TransportError> {
        let url = Self::notifications_url(&peer.endpoint)?;
        let response = self.client.post(url).json(envelope).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(TransportError::Rejected {
            endpoint: peer.endpoint.clone(),
            status: status.as_u16(),
        })
    }
}

/// In-process transport: envelopes are encoded, decoded and handed straight
/// to the receiver registered for the peer's endpoint.
#[derive(Default)]
pub struct LoopbackTransport {
    receivers: RwLock<HashMap<Url, Arc<NotificationReceiver>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, endpoint: Url, receiver: Arc<NotificationReceiver>) {
        rw_write(&self.receivers, SOURCE, "connect").insert(endpoint, receiver);
    }

    /// Subsequent sends to `endpoint` fail as unreachable.
    pub fn disconnect(&self, endpoint: &Url) {
        rw_write(&self.receivers, SOURCE, "disconnect").remove(endpoint);
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn send(
        &self,
        peer: &PeerAddress,
        envelope: &NotificationEnvelope,
    ) -> Result<(), TransportError> {
        let receiver = rw_read(&self.receivers, SOURCE, "send")
            .get(&peer.endpoint)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(peer.endpoint.clone()))?;

        let decoded = NotificationEnvelope::from_bytes(&envelope.to_bytes()?)?;
        receiver
            .receive(decoded)
            .map(|_| ())
            .map_err(|err| TransportError::Rejected {
                endpoint: peer.endpoint.clone(),
                status: err.status().as_u16(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_url_keeps_endpoint_prefix() {
        let plain = Url::parse("http://node-b:8080").expect("url");
        let nested = Url::parse("http://node-c:8080/cms").expect("url");
        assert_eq!(
            HttpPeerTransport::notifications_url(&plain)
                .expect("join")
                .as_str(),
            "http://node-b:8080/cluster/notifications"
        );
        assert_eq!(
            HttpPeerTransport::notifications_url(&nested)
                .expect("join")
                .as_str(),
            "http://node-c:8080/cms/cluster/notifications"
        );
    }

    #[tokio::test]
    async fn loopback_reports_unknown_endpoints() {
        let transport = LoopbackTransport::new();
        let peer = PeerAddress::new(Url::parse("http://nowhere:1").expect("url"));
        let envelope = NotificationEnvelope::new::<u8>(
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            1,
            &[],
        )
        .expect("envelope");
        assert!(matches!(
            transport.send(&peer, &envelope).await,
            Err(TransportError::Unreachable(_))
        ));
    }
}
