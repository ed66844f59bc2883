//! Inbound dispatch - routes received envelopes by message type

use crate::{InboundGossip, InboundReceiver};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

type Handler = Arc<dyn Fn(InboundGossip) + Send + Sync>;

/// Routes inbound gossip to the component registered for its message type.
///
/// One dispatcher per node. Handlers run on the pump task and must hand off
/// long work instead of blocking it.
#[derive(Default)]
pub struct GossipDispatcher {
    handlers: HashMap<String, Handler>,
}

impl GossipDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a message type. Last registration wins.
    pub fn register<F>(&mut self, message_type: impl Into<String>, handler: F)
    where
        F: Fn(InboundGossip) + Send + Sync + 'static,
    {
        self.handlers.insert(message_type.into(), Arc::new(handler));
    }

    /// Dispatch a single message. Unknown message types are dropped with a
    /// debug line; gossip is best-effort and peers may be a version ahead.
    pub fn dispatch(&self, inbound: InboundGossip) {
        match self.handlers.get(&inbound.envelope.message_type) {
            Some(handler) => handler(inbound),
            None => {
                tracing::debug!(
                    message_type = %inbound.envelope.message_type,
                    origin = %inbound.origin,
                    "Dropping gossip message with no registered handler"
                );
            }
        }
    }

    /// Spawn the pump task draining `receiver` into this dispatcher.
    pub fn spawn_pump(self, mut receiver: InboundReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(inbound) = receiver.recv().await {
                self.dispatch(inbound);
            }
            tracing::debug!("Gossip dispatch pump stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GossipEnvelope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_routes_by_message_type() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = GossipDispatcher::new();
        let counted = hits.clone();
        dispatcher.register("RaftMessage", move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(InboundGossip {
            origin: "node1".to_string(),
            envelope: GossipEnvelope::raft_broadcast(vec![]),
        });
        dispatcher.dispatch(InboundGossip {
            origin: "node1".to_string(),
            envelope: GossipEnvelope::new_pending_transaction(vec![]),
        });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
