//! Cluster membership.
//!
//! The dispatcher asks the directory for peers on every envelope, so
//! membership changes take effect without restarting the messenger.

use std::sync::RwLock;

use url::Url;
use uuid::Uuid;

use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "cluster::peers";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    /// Known node id, when the peer was configured with one.
    pub node_id: Option<Uuid>,
    /// Base URL; notifications go to `{endpoint}/cluster/notifications`.
    pub endpoint: Url,
}

impl PeerAddress {
    pub fn new(endpoint: Url) -> Self {
        Self {
            node_id: None,
            endpoint,
        }
    }

    pub fn with_node_id(mut self, node_id: Uuid) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Whether this address names the local node.
    pub fn is_local(&self, node_id: Uuid, advertised: Option<&Url>) -> bool {
        self.node_id == Some(node_id) || advertised.is_some_and(|url| same_endpoint(url, &self.endpoint))
    }
}

fn same_endpoint(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
}

pub trait PeerDirectory: Send + Sync {
    fn peers(&self) -> Vec<PeerAddress>;
}

/// Fixed membership from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticPeerDirectory {
    peers: Vec<PeerAddress>,
}

impl StaticPeerDirectory {
    pub fn new(peers: Vec<PeerAddress>) -> Self {
        Self { peers }
    }
}

impl PeerDirectory for StaticPeerDirectory {
    fn peers(&self) -> Vec<PeerAddress> {
        self.peers.clone()
    }
}

/// Membership that can be replaced at runtime.
#[derive(Debug, Default)]
pub struct SharedPeerDirectory {
    peers: RwLock<Vec<PeerAddress>>,
}

impl SharedPeerDirectory {
    pub fn new(peers: Vec<PeerAddress>) -> Self {
        Self {
            peers: RwLock::new(peers),
        }
    }

    pub fn replace(&self, peers: Vec<PeerAddress>) {
        *rw_write(&self.peers, SOURCE, "replace") = peers;
    }

    pub fn add(&self, peer: PeerAddress) {
        let mut peers = rw_write(&self.peers, SOURCE, "add");
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }

    pub fn remove(&self, endpoint: &Url) {
        rw_write(&self.peers, SOURCE, "remove").retain(|peer| !same_endpoint(&peer.endpoint, endpoint));
    }
}

impl PeerDirectory for SharedPeerDirectory {
    fn peers(&self) -> Vec<PeerAddress> {
        rw_read(&self.peers, SOURCE, "peers").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(text: &str) -> Url {
        Url::parse(text).expect("url")
    }

    #[test]
    fn local_address_matches_by_id_or_endpoint() {
        let node = Uuid::new_v4();
        let advertised = url("http://10.0.0.1:8080/");

        assert!(PeerAddress::new(url("http://10.0.0.1:8080")).is_local(node, Some(&advertised)));
        assert!(
            PeerAddress::new(url("http://10.0.0.9:8080"))
                .with_node_id(node)
                .is_local(node, None)
        );
        assert!(!PeerAddress::new(url("http://10.0.0.2:8080")).is_local(node, Some(&advertised)));
    }

    #[test]
    fn shared_directory_reflects_replacements() {
        let directory = SharedPeerDirectory::new(vec![PeerAddress::new(url("http://a:1"))]);
        directory.add(PeerAddress::new(url("http://b:1")));
        directory.add(PeerAddress::new(url("http://b:1")));
        assert_eq!(directory.peers().len(), 2);

        directory.remove(&url("http://a:1/"));
        assert_eq!(directory.peers(), vec![PeerAddress::new(url("http://b:1"))]);

        directory.replace(Vec::new());
        assert!(directory.peers().is_empty());
    }
}
