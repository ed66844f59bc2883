//! Gossip layer - best-effort broadcast/unicast messaging between cluster members
//!
//! Architecture:
//! - Every message travels inside a [`GossipEnvelope`] tagged with a broadcast
//!   group and message type
//! - Senders talk to a [`GossipClient`]; the node picks the backing transport
//! - [`GossipServer`] + [`PeerLink`] form a WebSocket mesh between processes
//! - [`LocalGossipHub`] provides the same surface in-process for tests and
//!   single-machine simulation
//!
//! Delivery is best-effort: the consensus layer above tolerates loss via
//! timeouts and re-election, so the relay never retries a dropped message.

pub mod dispatch;
pub mod envelope;
pub mod hub;
pub mod net;

pub use dispatch::GossipDispatcher;
pub use envelope::{
    GossipEnvelope, GossipFrame, CONSENSUS_GROUP, MSG_NEW_PENDING_TRANSACTION, MSG_RAFT,
    TRANSACTION_POOL_GROUP,
};
pub use hub::{LocalGossipClient, LocalGossipHub};
pub use net::{GossipServer, PeerLink, WsGossipClient};

use tokio::sync::mpsc;

/// An inbound gossip message surfaced to the hosting node.
#[derive(Debug, Clone)]
pub struct InboundGossip {
    /// Name of the node that originated the message
    pub origin: String,
    pub envelope: GossipEnvelope,
}

/// Sending half of the inbound gossip queue.
pub type InboundSender = mpsc::UnboundedSender<InboundGossip>;
/// Receiving half of the inbound gossip queue.
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundGossip>;

/// Broadcast/unicast surface the pool and consensus layers send through.
///
/// Implementations must not block: messages are queued and shipped by
/// background tasks. Serialization failure is fatal to that single message
/// only.
pub trait GossipClient: Send + Sync {
    /// Send to every cluster member.
    fn broadcast_message(&self, envelope: GossipEnvelope);

    /// Send to the member named in `envelope.recipient`.
    fn unicast_message(&self, envelope: GossipEnvelope);
}
