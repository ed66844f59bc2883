//! Node wiring and lifecycle surface
//!
//! Builds the full stack (gossip mesh, pools, virtual machine, consensus
//! engine) from a [`NodeConfig`] and exposes the lifecycle the hosting
//! service drives: `initialize`, `shutdown`, `is_leader`.

use crate::config::NodeConfig;
use ledger_consensus::{ConsensusConfig, ConsensusEngine, ElectionTimeout};
use ledger_gossip::{
    GossipClient, GossipDispatcher, GossipServer, PeerLink, WsGossipClient,
    InboundReceiver, MSG_NEW_PENDING_TRANSACTION, MSG_RAFT,
};
use ledger_runtime::{
    BlockStore, CallContractInput, ContractError, ContractRegistry, MemoryBlockStore,
    MemoryStateStorage, SledStore, StateStorage, VirtualMachine,
};
use ledger_txpool::{CommittedTransactionPool, PendingTransactionPool, PoolConfig, TxPoolError};
use ledger_types::{Transaction, TransactionId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A fully wired cluster member. Construct inside a tokio runtime.
pub struct Node {
    config: NodeConfig,
    engine: Arc<ConsensusEngine>,
    pool: Arc<PendingTransactionPool>,
    vm: Arc<VirtualMachine>,
    gossip_server: GossipServer,
    inbound: Mutex<Option<InboundReceiver>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let gossip_server = GossipServer::new(inbound_tx);
        let links: Vec<PeerLink> = config
            .peers
            .iter()
            .map(|peer| PeerLink::connect(&peer.name, &peer.addr))
            .collect();
        let gossip: Arc<dyn GossipClient> =
            Arc::new(WsGossipClient::new(config.node_name.clone(), links));

        let committed_pool = Arc::new(CommittedTransactionPool::new());
        let pool = Arc::new(PendingTransactionPool::new(
            gossip.clone(),
            committed_pool.clone(),
            PoolConfig {
                transaction_expiration_ms: config.transaction_expiration_ms,
            },
        ));

        let (state_storage, block_store): (Arc<dyn StateStorage>, Arc<dyn BlockStore>) =
            match &config.data_dir {
                Some(dir) => {
                    std::fs::create_dir_all(dir)?;
                    let store = Arc::new(SledStore::open(dir)?);
                    (store.clone(), store)
                }
                None => (
                    Arc::new(MemoryStateStorage::new()),
                    Arc::new(MemoryBlockStore::new()),
                ),
            };

        let vm = Arc::new(VirtualMachine::new(
            ContractRegistry::with_builtins(),
            state_storage.clone(),
        ));

        let consensus_config = ConsensusConfig {
            node_name: config.node_name.clone(),
            cluster_size: config.cluster_size,
            election_timeout: ElectionTimeout {
                min_ms: config.election_timeout_min_ms,
                max_ms: config.election_timeout_max_ms,
            },
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            block_builder_poll_interval_ms: config.block_builder_poll_interval_ms,
        };
        let engine = ConsensusEngine::new(
            consensus_config,
            gossip,
            pool.clone(),
            committed_pool,
            vm.clone(),
            state_storage,
            block_store,
        );

        Ok(Self {
            config,
            engine,
            pool,
            vm,
            gossip_server,
            inbound: Mutex::new(Some(inbound_rx)),
            accept_task: Mutex::new(None),
            dispatch_task: Mutex::new(None),
            sweep_task: Mutex::new(None),
        })
    }

    /// Bring the node up: bind the gossip listener, seed the chain tip,
    /// start inbound dispatch and the expiry sweep. Completes before any
    /// commit is accepted. Idempotent.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        let Some(inbound) = self.inbound.lock().take() else {
            return Ok(());
        };

        let accept_task = self.gossip_server.start(&self.config.listen_addr).await?;
        *self.accept_task.lock() = Some(accept_task);

        self.engine.initialize()?;

        let mut dispatcher = GossipDispatcher::new();
        let engine = self.engine.clone();
        dispatcher.register(MSG_RAFT, move |inbound| {
            engine.handle_inbound(&inbound.origin, &inbound.envelope);
        });
        let pool = self.pool.clone();
        dispatcher.register(MSG_NEW_PENDING_TRANSACTION, move |inbound| {
            match Transaction::from_bytes(&inbound.envelope.buffer) {
                Ok(tx) => pool.on_gossiped_transaction(tx),
                Err(e) => {
                    tracing::warn!(origin = %inbound.origin, "Undecodable gossiped transaction: {}", e);
                }
            }
        });
        *self.dispatch_task.lock() = Some(dispatcher.spawn_pump(inbound));

        // Expired-transaction sweep runs on its own schedule, independent
        // of block building.
        let pool = self.pool.clone();
        let sweep_interval = Duration::from_millis(self.config.expiry_sweep_interval_ms);
        *self.sweep_task.lock() = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                pool.clear_expired_transactions();
            }
        }));

        tracing::info!(node = %self.config.node_name, "Node initialized");
        Ok(())
    }

    /// Graceful drain: stop proposing, finish the in-flight commit, then
    /// release consensus and gossip resources.
    pub async fn shutdown(&self) {
        if let Some(task) = self.sweep_task.lock().take() {
            task.abort();
            let _ = task.await;
        }

        self.engine.shutdown().await;

        if let Some(task) = self.dispatch_task.lock().take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
            let _ = task.await;
        }
        tracing::info!(node = %self.config.node_name, "Node stopped");
    }

    /// Synchronous leadership query.
    pub fn is_leader(&self) -> bool {
        self.engine.is_leader()
    }

    /// Submit a transaction to this node's pending pool.
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<TransactionId, TxPoolError> {
        self.pool.add_new_pending_transaction(transaction)
    }

    /// Read-only contract query against committed state.
    pub fn call_contract(&self, input: &CallContractInput) -> Result<Vec<u8>, ContractError> {
        self.vm.call_contract(input)
    }

    /// Height of the last committed block on this node.
    pub fn last_committed_height(&self) -> u64 {
        self.engine.last_committed_height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_runtime::contracts::token::{self, TokenCommand};
    use ledger_types::{TransactionBody, TransactionHeader};
    use tokio::time::Instant;

    fn single_node_config(data_dir: Option<std::path::PathBuf>) -> NodeConfig {
        NodeConfig {
            node_name: "solo".to_string(),
            cluster_size: 1,
            listen_addr: "127.0.0.1:0".to_string(),
            peers: vec![],
            election_timeout_min_ms: 100,
            election_timeout_max_ms: 200,
            heartbeat_interval_ms: 30,
            block_builder_poll_interval_ms: 30,
            expiry_sweep_interval_ms: 1000,
            data_dir,
            ..NodeConfig::default()
        }
    }

    fn mint_transaction(account: &str, amount: u64) -> Transaction {
        Transaction {
            header: TransactionHeader {
                version: 0,
                sender: b"faucet".to_vec(),
                timestamp: chrono::Utc::now().timestamp_millis() as u64,
            },
            body: TransactionBody {
                contract_address: token::address(),
                payload: TokenCommand::Mint {
                    account: account.to_string(),
                    amount,
                }
                .to_bytes(),
            },
        }
    }

    async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_node_pipeline_end_to_end() {
        let node = Node::new(single_node_config(None)).unwrap();
        node.initialize().await.unwrap();

        assert!(wait_until(Duration::from_secs(5), || node.is_leader()).await);

        node.submit_transaction(mint_transaction("alice", 42)).unwrap();
        assert!(wait_until(Duration::from_secs(10), || node.last_committed_height() >= 1).await);

        let balance = node
            .call_contract(&CallContractInput {
                sender: b"anyone".to_vec(),
                contract_address: token::address(),
                payload: TokenCommand::Balance {
                    account: "alice".to_string(),
                }
                .to_bytes(),
            })
            .unwrap();
        assert_eq!(balance, 42u64.to_le_bytes().to_vec());

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_chain_tip_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        {
            let node = Node::new(single_node_config(Some(dir.path().to_path_buf()))).unwrap();
            node.initialize().await.unwrap();
            assert!(wait_until(Duration::from_secs(5), || node.is_leader()).await);
            node.submit_transaction(mint_transaction("alice", 7)).unwrap();
            assert!(wait_until(Duration::from_secs(10), || node.last_committed_height() >= 1).await);
            node.shutdown().await;
        }

        let node = Node::new(single_node_config(Some(dir.path().to_path_buf()))).unwrap();
        node.initialize().await.unwrap();
        assert!(node.last_committed_height() >= 1);

        // Committed state is readable before any new block
        let balance = node
            .call_contract(&CallContractInput {
                sender: b"anyone".to_vec(),
                contract_address: token::address(),
                payload: TokenCommand::Balance {
                    account: "alice".to_string(),
                }
                .to_bytes(),
            })
            .unwrap();
        assert_eq!(balance, 7u64.to_le_bytes().to_vec());

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_initialize_and_shutdown_are_idempotent() {
        let node = Node::new(single_node_config(None)).unwrap();
        node.initialize().await.unwrap();
        node.initialize().await.unwrap();
        node.shutdown().await;
        node.shutdown().await;
    }
}
