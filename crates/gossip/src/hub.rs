//! In-process gossip hub for tests and single-machine simulation
//!
//! Provides the same `GossipClient` surface as the WebSocket mesh, wired
//! through tokio channels. Supports isolating a member to simulate a
//! partition or a dead node.

use crate::{GossipClient, GossipEnvelope, InboundGossip, InboundReceiver, InboundSender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct HubInner {
    members: HashMap<String, InboundSender>,
    isolated: HashSet<String>,
}

/// Hub connecting every joined member; messages are delivered over unbounded
/// channels in send order.
#[derive(Clone, Default)]
pub struct LocalGossipHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LocalGossipHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the hub under `node_name`. Returns the client handle and the
    /// inbound queue to drain.
    pub fn join(&self, node_name: impl Into<String>) -> (LocalGossipClient, InboundReceiver) {
        let node_name = node_name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().members.insert(node_name.clone(), tx);
        (
            LocalGossipClient {
                node_name,
                inner: self.inner.clone(),
            },
            rx,
        )
    }

    /// Cut a member off in both directions, simulating a partition.
    pub fn isolate(&self, node_name: &str) {
        self.inner.lock().isolated.insert(node_name.to_string());
    }

    /// Reconnect an isolated member.
    pub fn heal(&self, node_name: &str) {
        self.inner.lock().isolated.remove(node_name);
    }
}

/// Client handle for one hub member.
#[derive(Clone)]
pub struct LocalGossipClient {
    node_name: String,
    inner: Arc<Mutex<HubInner>>,
}

impl LocalGossipClient {
    fn deliver(&self, envelope: GossipEnvelope, only_to: Option<&str>) {
        let inner = self.inner.lock();
        if inner.isolated.contains(&self.node_name) {
            return;
        }
        for (name, sender) in &inner.members {
            if name == &self.node_name || inner.isolated.contains(name) {
                continue;
            }
            if let Some(recipient) = only_to {
                if name != recipient {
                    continue;
                }
            }
            let _ = sender.send(InboundGossip {
                origin: self.node_name.clone(),
                envelope: envelope.clone(),
            });
        }
    }
}

impl GossipClient for LocalGossipClient {
    fn broadcast_message(&self, envelope: GossipEnvelope) {
        self.deliver(envelope, None);
    }

    fn unicast_message(&self, envelope: GossipEnvelope) {
        match envelope.recipient.clone() {
            Some(recipient) => self.deliver(envelope, Some(&recipient)),
            None => {
                tracing::warn!("Unicast envelope without recipient, dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all_other_members() {
        let hub = LocalGossipHub::new();
        let (a, _rx_a) = hub.join("a");
        let (_b, mut rx_b) = hub.join("b");
        let (_c, mut rx_c) = hub.join("c");

        a.broadcast_message(GossipEnvelope::raft_broadcast(vec![9]));

        let got_b = rx_b.recv().await.unwrap();
        let got_c = rx_c.recv().await.unwrap();
        assert_eq!(got_b.origin, "a");
        assert_eq!(got_b.envelope.buffer, vec![9]);
        assert_eq!(got_c.envelope.buffer, vec![9]);
    }

    #[tokio::test]
    async fn test_unicast_reaches_only_recipient() {
        let hub = LocalGossipHub::new();
        let (a, _rx_a) = hub.join("a");
        let (_b, mut rx_b) = hub.join("b");
        let (_c, mut rx_c) = hub.join("c");

        a.unicast_message(GossipEnvelope::raft_unicast("b", vec![1]));

        assert_eq!(rx_b.recv().await.unwrap().envelope.buffer, vec![1]);
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_isolated_member_is_cut_off() {
        let hub = LocalGossipHub::new();
        let (a, mut rx_a) = hub.join("a");
        let (b, mut rx_b) = hub.join("b");

        hub.isolate("a");
        a.broadcast_message(GossipEnvelope::raft_broadcast(vec![1]));
        b.broadcast_message(GossipEnvelope::raft_broadcast(vec![2]));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());

        hub.heal("a");
        b.broadcast_message(GossipEnvelope::raft_broadcast(vec![3]));
        assert_eq!(rx_a.recv().await.unwrap().envelope.buffer, vec![3]);
    }
}
