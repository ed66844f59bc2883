//! Block builder - decides when and what to propose, applies committed blocks
//!
//! Polling runs only while this node is leader and stops itself after each
//! proposal; the engine restarts it once the proposed block commits. Commit
//! application is defensively idempotent: consensus is treated as
//! at-least-once and duplicate deliveries are skipped on the height guard.

use ledger_runtime::{BlockStore, StateStorage, VirtualMachine};
use ledger_txpool::{CommittedTransactionPool, PendingTransactionPool};
use ledger_types::{Block, BlockBody, BlockHash, BlockHeader, Transaction, TransactionId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Height and hash of the last committed block.
#[derive(Debug, Clone, Copy)]
struct ChainTip {
    height: u64,
    hash: BlockHash,
}

type ProposeFn = Box<dyn Fn(Block) + Send + Sync>;

/// Builds block proposals from the pending pool and applies committed
/// blocks through the virtual machine.
pub struct BlockBuilder {
    pool: Arc<PendingTransactionPool>,
    committed_pool: Arc<CommittedTransactionPool>,
    vm: Arc<VirtualMachine>,
    state_storage: Arc<dyn StateStorage>,
    block_store: Arc<dyn BlockStore>,
    poll_interval: Duration,
    /// Hands a built block to the consensus engine's append
    propose: ProposeFn,
    last_committed: Mutex<ChainTip>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl BlockBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Arc<PendingTransactionPool>,
        committed_pool: Arc<CommittedTransactionPool>,
        vm: Arc<VirtualMachine>,
        state_storage: Arc<dyn StateStorage>,
        block_store: Arc<dyn BlockStore>,
        poll_interval: Duration,
        propose: ProposeFn,
    ) -> Self {
        Self {
            pool,
            committed_pool,
            vm,
            state_storage,
            block_store,
            poll_interval,
            propose,
            last_committed: Mutex::new(ChainTip {
                height: 0,
                hash: BlockHash::ZERO,
            }),
            poll_task: Mutex::new(None),
        }
    }

    /// Seed the chain tip from the block store. Must complete before the
    /// first commit is applied.
    pub fn initialize(&self) -> anyhow::Result<()> {
        if let Some(block) = self.block_store.last_block()? {
            let tip = ChainTip {
                height: block.height(),
                hash: block.hash(),
            };
            tracing::info!(height = tip.height, "Resuming chain from stored tip");
            *self.last_committed.lock() = tip;
        }
        Ok(())
    }

    /// Height of the last committed block (0 before genesis).
    pub fn last_committed_height(&self) -> u64 {
        self.last_committed.lock().height
    }

    /// Begin polling the pending pool. Idempotent: a second `start` while
    /// polling is a no-op. Must only run while this node is leader.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.poll_task.lock();
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        tracing::debug!("Block builder polling started");
        let builder = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(builder.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                // One outstanding proposal at a time: stop polling until
                // the engine restarts us after the commit.
                if builder.poll_once() {
                    break;
                }
            }
        }));
    }

    /// Cancel the poll timer. Idempotent across repeated elected/demoted
    /// cycles; leaves no dangling timer.
    pub fn stop(&self) {
        if let Some(handle) = self.poll_task.lock().take() {
            handle.abort();
            tracing::debug!("Block builder polling stopped");
        }
    }

    /// One poll pass. Returns true when a block was proposed.
    fn poll_once(&self) -> bool {
        let transactions: Vec<Transaction> = self
            .pool
            .get_all_pending_transactions()
            .into_iter()
            .filter(|tx| !self.committed_pool.has_transaction_with_id(&tx.id()))
            .collect();
        if transactions.is_empty() {
            // No empty blocks
            return false;
        }

        let tip = *self.last_committed.lock();
        let block = Block {
            header: BlockHeader {
                height: tip.height + 1,
                prev_block_hash: tip.hash,
                timestamp: chrono::Utc::now().timestamp_millis() as u64,
            },
            body: BlockBody { transactions },
        };
        tracing::info!(
            height = block.height(),
            tx_count = block.body.transactions.len(),
            "Proposing block"
        );
        (self.propose)(block);
        true
    }

    /// Apply one committed block, invoked strictly in commit order.
    ///
    /// Duplicate deliveries are skipped on the height guard. A rejected
    /// transaction inside the block is a normal outcome; an execution fault
    /// propagates and the block is not treated as applied.
    pub fn commit_block(&self, block: &Block) -> anyhow::Result<()> {
        let tip = *self.last_committed.lock();
        if block.header.height <= tip.height {
            tracing::info!(
                height = block.header.height,
                tip = tip.height,
                "Skipping duplicate commit delivery"
            );
            return Ok(());
        }
        if block.header.height != tip.height + 1 {
            anyhow::bail!(
                "commit height gap: got {}, expected {}",
                block.header.height,
                tip.height + 1
            );
        }
        if block.header.prev_block_hash != tip.hash {
            anyhow::bail!(
                "previous block hash mismatch at height {}: got {}, expected {}",
                block.header.height,
                block.header.prev_block_hash,
                tip.hash
            );
        }

        let output = self.vm.process_transaction_set(&block.body.transactions)?;
        self.state_storage.write_records(&output.state_diff)?;
        self.block_store.put_block(block)?;

        *self.last_committed.lock() = ChainTip {
            height: block.header.height,
            hash: block.hash(),
        };

        let ids: Vec<TransactionId> = block.body.transactions.iter().map(|tx| tx.id()).collect();
        self.pool.mark_committed(&ids);

        tracing::info!(
            height = block.header.height,
            processed = output.processed_transactions.len(),
            rejected = output.rejected_transactions.len(),
            "Block applied"
        );
        Ok(())
    }

    /// Stop proposing and release the poll timer. Commit draining is the
    /// engine's responsibility; by the time this returns no new proposals
    /// will be produced.
    pub fn shutdown(&self) {
        self.stop();
    }
}
