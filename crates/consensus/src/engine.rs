//! Consensus engine - owns the raft node, transport adapter and block builder
//!
//! The engine pumps consensus events one at a time in arrival order:
//! commit N is fully applied before commit N+1 is looked at, and
//! leadership changes start or stop the block builder. Handlers may spawn
//! background work but the delivery path itself never blocks on gossip I/O.

use crate::block_builder::BlockBuilder;
use crate::raft::{ConsensusEvent, RaftHandle, RaftNode};
use crate::transport::GossipTransport;
use crate::types::{ConsensusConfig, ConsensusMessage, NodeRole};
use ledger_gossip::{GossipClient, GossipEnvelope};
use ledger_runtime::{BlockStore, StateStorage, VirtualMachine};
use ledger_txpool::{CommittedTransactionPool, PendingTransactionPool};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The consensus stack of one node.
pub struct ConsensusEngine {
    config: ConsensusConfig,
    raft: RaftHandle,
    transport: Arc<GossipTransport>,
    block_builder: Arc<BlockBuilder>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ConsensusEvent>>>,
    pump_task: Mutex<Option<JoinHandle<()>>>,
    raft_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConsensusEngine {
    /// Wire up the consensus stack. The raft node starts participating in
    /// elections immediately; committed entries queue up and are applied
    /// only after [`initialize`](Self::initialize) seeds the chain tip and
    /// starts the event pump.
    pub fn new(
        config: ConsensusConfig,
        gossip: Arc<dyn GossipClient>,
        pool: Arc<PendingTransactionPool>,
        committed_pool: Arc<CommittedTransactionPool>,
        vm: Arc<VirtualMachine>,
        state_storage: Arc<dyn StateStorage>,
        block_store: Arc<dyn BlockStore>,
    ) -> Arc<Self> {
        tracing::info!(
            node = %config.node_name,
            cluster_size = config.cluster_size,
            "Starting consensus with configuration: {:?}",
            config
        );

        let (transport, inbound) = GossipTransport::new(config.node_name.clone(), gossip);
        let transport = Arc::new(transport);
        let (raft, events, raft_task) = RaftNode::spawn(config.clone(), transport.clone(), inbound);

        let proposer = raft.clone();
        let block_builder = Arc::new(BlockBuilder::new(
            pool,
            committed_pool,
            vm,
            state_storage,
            block_store,
            Duration::from_millis(config.block_builder_poll_interval_ms),
            Box::new(move |block| {
                let height = block.height();
                if let Err(e) = proposer.append(ConsensusMessage { block }) {
                    tracing::debug!(height, "Dropping block proposal: {}", e);
                }
            }),
        ));

        Arc::new(Self {
            config,
            raft,
            transport,
            block_builder,
            events: Mutex::new(Some(events)),
            pump_task: Mutex::new(None),
            raft_task: Mutex::new(Some(raft_task)),
        })
    }

    /// Route an inbound gossip envelope into the transport adapter.
    pub fn handle_inbound(&self, origin: &str, envelope: &GossipEnvelope) {
        self.transport.received(origin, envelope);
    }

    /// Seed the chain tip and start applying commits. Must complete before
    /// the engine accepts commits; idempotent.
    pub fn initialize(self: &Arc<Self>) -> anyhow::Result<()> {
        self.block_builder.initialize()?;

        let mut pump_guard = self.pump_task.lock();
        if pump_guard.is_some() {
            return Ok(());
        }
        let events = self
            .events
            .lock()
            .take()
            .expect("event receiver present until first initialize");
        let engine = Arc::clone(self);
        *pump_guard = Some(tokio::spawn(async move {
            engine.run_event_pump(events).await;
        }));
        Ok(())
    }

    async fn run_event_pump(&self, mut events: mpsc::UnboundedReceiver<ConsensusEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ConsensusEvent::LeadershipChanged { role } => {
                    if role == NodeRole::Leader {
                        tracing::info!(node = %self.config.node_name, "Elected as a new leader");
                        self.block_builder.start();
                    } else {
                        self.block_builder.stop();
                    }
                }
                ConsensusEvent::Committed { index, message } => {
                    let height = message.block.header.height;
                    tracing::debug!(height, index, "Committed block delivered");
                    if let Err(e) = self.block_builder.commit_block(&message.block) {
                        // Not applied; operator intervention or resync is
                        // needed for this block, later commits keep coming.
                        tracing::error!(height, index, "Failed to commit block: {e:#}");
                    }
                    if self.raft.is_leader() {
                        self.block_builder.start();
                    }
                }
            }
        }
        tracing::debug!(node = %self.config.node_name, "Consensus event pump stopped");
    }

    /// Synchronous leadership query.
    pub fn is_leader(&self) -> bool {
        self.raft.is_leader()
    }

    /// Height of the last committed block on this node.
    pub fn last_committed_height(&self) -> u64 {
        self.block_builder.last_committed_height()
    }

    /// Graceful drain: stop proposing, let the in-flight commit finish,
    /// then release the consensus node.
    pub async fn shutdown(&self) {
        tracing::info!(node = %self.config.node_name, "Consensus engine shutting down");
        self.block_builder.shutdown();
        self.raft.shutdown();

        let pump = self.pump_task.lock().take();
        if let Some(pump) = pump {
            let _ = pump.await;
        }
        let raft_task = self.raft_task.lock().take();
        if let Some(raft_task) = raft_task {
            let _ = raft_task.await;
        }
    }
}
