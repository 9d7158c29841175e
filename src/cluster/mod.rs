//! Cluster-wide propagation of cache invalidations.
//!
//! The [`ClusterMessenger`] applies a flushed batch on this node and queues one
//! envelope per channel; the [`DispatchWorker`] posts them to every peer, and
//! each peer's [`NotificationReceiver`] applies them to its own caches.

mod dispatch;
mod messenger;
mod peers;
mod receiver;
mod transport;

pub use dispatch::{DispatchSummary, DispatchWorker};
pub use messenger::{ClusterMessenger, FlushReport};
pub use peers::{PeerAddress, PeerDirectory, SharedPeerDirectory, StaticPeerDirectory};
pub use receiver::{NotificationReceiver, ReceiveError, ReceiveOutcome};
pub use transport::{HttpPeerTransport, LoopbackTransport, PeerTransport, TransportError};
