//! Gossip transport adapter
//!
//! Bridges the broadcast/unicast gossip channel to the point-to-point
//! surface the consensus protocol expects. Connection lifecycle belongs to
//! the transport itself, so `connect`/`disconnect` are no-ops here.

use crate::types::RaftMessage;
use ledger_gossip::{GossipClient, GossipEnvelope};
use std::sync::Arc;
use tokio::sync::mpsc;

/// An inbound protocol frame with the node that sent it.
pub type InboundFrame = (String, RaftMessage);

/// Adapter between the gossip channel and the consensus node.
pub struct GossipTransport {
    node_name: String,
    gossip: Arc<dyn GossipClient>,
    inbound: mpsc::UnboundedSender<InboundFrame>,
}

impl GossipTransport {
    /// Create the adapter. The returned receiver feeds the consensus
    /// node's event loop.
    pub fn new(
        node_name: impl Into<String>,
        gossip: Arc<dyn GossipClient>,
    ) -> (Self, mpsc::UnboundedReceiver<InboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                node_name: node_name.into(),
                gossip,
                inbound: tx,
            },
            rx,
        )
    }

    /// Lifecycle no-op; the transport manages its own connections.
    pub fn connect(&self) {}

    /// Lifecycle no-op; the transport manages its own connections.
    pub fn disconnect(&self) {}

    /// Broadcast a protocol frame to all cluster members, marked for
    /// immediate delivery under the reserved consensus group.
    pub fn broadcast(&self, message: &RaftMessage) {
        self.gossip
            .broadcast_message(GossipEnvelope::raft_broadcast(message.to_bytes()));
    }

    /// Send a protocol frame to one cluster member.
    pub fn send(&self, node_id: &str, message: &RaftMessage) {
        self.gossip
            .unicast_message(GossipEnvelope::raft_unicast(node_id, message.to_bytes()));
    }

    /// Invoked by the gossip layer on inbound consensus envelopes.
    ///
    /// Surfaces the frame only if it is untargeted or addressed to this
    /// node; everything else is silently dropped.
    pub fn received(&self, origin_node_id: &str, envelope: &GossipEnvelope) {
        if let Some(recipient) = &envelope.recipient {
            if recipient != &self.node_name {
                return;
            }
        }
        match RaftMessage::from_bytes(&envelope.buffer) {
            Ok(message) => {
                let _ = self.inbound.send((origin_node_id.to_string(), message));
            }
            Err(e) => {
                tracing::warn!(origin = %origin_node_id, "Dropping undecodable raft frame: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_gossip::{LocalGossipHub, MSG_RAFT};

    #[tokio::test]
    async fn test_broadcast_wraps_in_consensus_envelope() {
        let hub = LocalGossipHub::new();
        let (client_a, _rx_a) = hub.join("a");
        let (_client_b, mut rx_b) = hub.join("b");

        let (transport, _inbound) = GossipTransport::new("a", Arc::new(client_a));
        transport.broadcast(&RaftMessage::RequestVote {
            term: 1,
            last_log_index: 0,
            last_log_term: 0,
        });

        let inbound = rx_b.recv().await.unwrap();
        assert_eq!(inbound.envelope.broadcast_group, "consensus");
        assert_eq!(inbound.envelope.message_type, MSG_RAFT);
        assert!(inbound.envelope.immediate);
        assert!(inbound.envelope.recipient.is_none());
    }

    #[tokio::test]
    async fn test_received_filters_frames_addressed_elsewhere() {
        let hub = LocalGossipHub::new();
        let (client, _rx) = hub.join("a");
        let (transport, mut inbound) = GossipTransport::new("a", Arc::new(client));

        let frame = RaftMessage::RequestVoteResponse {
            term: 1,
            vote_granted: true,
        };

        // Addressed to another node: dropped
        transport.received("b", &GossipEnvelope::raft_unicast("c", frame.to_bytes()));
        assert!(inbound.try_recv().is_err());

        // Addressed to us: surfaced
        transport.received("b", &GossipEnvelope::raft_unicast("a", frame.to_bytes()));
        let (origin, _) = inbound.try_recv().unwrap();
        assert_eq!(origin, "b");

        // Untargeted: surfaced
        transport.received("c", &GossipEnvelope::raft_broadcast(frame.to_bytes()));
        let (origin, _) = inbound.try_recv().unwrap();
        assert_eq!(origin, "c");
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_fatal_to_that_message_only() {
        let hub = LocalGossipHub::new();
        let (client, _rx) = hub.join("a");
        let (transport, mut inbound) = GossipTransport::new("a", Arc::new(client));

        transport.received("b", &GossipEnvelope::raft_broadcast(vec![0xFF, 0x01]));
        assert!(inbound.try_recv().is_err());

        let frame = RaftMessage::RequestVote {
            term: 1,
            last_log_index: 0,
            last_log_term: 0,
        };
        transport.received("b", &GossipEnvelope::raft_broadcast(frame.to_bytes()));
        assert!(inbound.try_recv().is_ok());
    }
}
