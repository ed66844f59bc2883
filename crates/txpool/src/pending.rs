//! Pending transaction pool

use crate::committed::CommittedTransactionPool;
use crate::error::TxPoolError;
use crate::now_ms;
use ledger_gossip::{GossipClient, GossipEnvelope};
use ledger_types::{Transaction, TransactionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Freshness window: a transaction whose header timestamp is at least
    /// this old is refused at admission and swept by the expiry pass.
    pub transaction_expiration_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            // 10 minutes
            transaction_expiration_ms: 10 * 60 * 1000,
        }
    }
}

/// Entry owned by the pool: the transaction plus arrival bookkeeping.
#[derive(Debug, Clone)]
struct PendingEntry {
    transaction: Transaction,
    /// Local arrival time (unix millis)
    #[allow(dead_code)]
    arrival: u64,
    /// Admission sequence; snapshots are ordered by it
    seq: u64,
}

#[derive(Default)]
struct PoolInner {
    entries: HashMap<TransactionId, PendingEntry>,
    next_seq: u64,
}

/// Transactions awaiting inclusion in a block, replicated best-effort via
/// gossip. A single guard serializes admission, snapshots and removal.
pub struct PendingTransactionPool {
    gossip: Arc<dyn GossipClient>,
    committed: Arc<CommittedTransactionPool>,
    config: PoolConfig,
    inner: Mutex<PoolInner>,
}

impl PendingTransactionPool {
    pub fn new(
        gossip: Arc<dyn GossipClient>,
        committed: Arc<CommittedTransactionPool>,
        config: PoolConfig,
    ) -> Self {
        Self {
            gossip,
            committed,
            config,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Admit a transaction submitted to this node and gossip it to peers.
    pub fn add_new_pending_transaction(
        &self,
        transaction: Transaction,
    ) -> Result<TransactionId, TxPoolError> {
        self.add_new_pending_transaction_at(transaction, now_ms())
    }

    /// Admission with an explicit clock, used by tests to drive time.
    pub fn add_new_pending_transaction_at(
        &self,
        transaction: Transaction,
        now: u64,
    ) -> Result<TransactionId, TxPoolError> {
        let id = self.admit(&transaction, now)?;

        tracing::debug!(tx_id = %id, "Transaction admitted to pending pool");
        self.gossip
            .broadcast_message(GossipEnvelope::new_pending_transaction(
                transaction.to_bytes(),
            ));
        Ok(id)
    }

    /// Absorb a transaction gossiped by a peer pool. Duplicates arriving
    /// from distinct peers are dropped without error, and nothing is
    /// re-broadcast.
    pub fn on_gossiped_transaction(&self, transaction: Transaction) {
        self.on_gossiped_transaction_at(transaction, now_ms());
    }

    /// Gossip absorption with an explicit clock.
    pub fn on_gossiped_transaction_at(&self, transaction: Transaction, now: u64) {
        match self.admit(&transaction, now) {
            Ok(id) => {
                tracing::debug!(tx_id = %id, "Gossiped transaction absorbed");
            }
            Err(e) => {
                tracing::debug!("Ignoring gossiped transaction: {}", e);
            }
        }
    }

    fn admit(&self, transaction: &Transaction, now: u64) -> Result<TransactionId, TxPoolError> {
        let id = transaction.id();
        let created_at = transaction.header.timestamp;
        let window_ms = self.config.transaction_expiration_ms;

        if now.saturating_sub(created_at) >= window_ms {
            return Err(TxPoolError::ExpiredTransaction {
                id,
                created_at,
                window_ms,
            });
        }

        if self.committed.has_transaction_with_id(&id) {
            return Err(TxPoolError::DuplicateTransaction(id));
        }

        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&id) {
            return Err(TxPoolError::DuplicateTransaction(id));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            id,
            PendingEntry {
                transaction: transaction.clone(),
                arrival: now,
                seq,
            },
        );
        Ok(id)
    }

    /// Consistent snapshot of pending transactions in insertion order.
    pub fn get_all_pending_transactions(&self) -> Vec<Transaction> {
        let inner = self.inner.lock();
        let mut entries: Vec<&PendingEntry> = inner.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.iter().map(|e| e.transaction.clone()).collect()
    }

    /// Sweep every entry whose transaction timestamp has aged past the
    /// freshness window. Returns the swept ids.
    pub fn clear_expired_transactions(&self) -> Vec<TransactionId> {
        self.clear_expired_transactions_at(now_ms())
    }

    /// Expiry sweep with an explicit clock.
    pub fn clear_expired_transactions_at(&self, now: u64) -> Vec<TransactionId> {
        let window_ms = self.config.transaction_expiration_ms;
        let mut inner = self.inner.lock();
        let expired: Vec<TransactionId> = inner
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_sub(e.transaction.header.timestamp) >= window_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            inner.entries.remove(id);
        }
        drop(inner);

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Cleared expired pending transactions");
        }
        expired
    }

    /// Mark transactions as finalized in a committed block: remove them
    /// from pending and fence re-admission through the committed pool.
    pub fn mark_committed(&self, ids: &[TransactionId]) {
        self.mark_committed_at(ids, now_ms());
    }

    /// Commit marking with an explicit clock.
    pub fn mark_committed_at(&self, ids: &[TransactionId], now: u64) {
        let mut inner = self.inner.lock();
        for id in ids {
            inner.entries.remove(id);
            self.committed.add_committed(*id, now);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_types::{ContractAddress, TransactionBody, TransactionHeader};
    use parking_lot::Mutex as PlMutex;

    /// Gossip client recording every broadcast envelope.
    #[derive(Default)]
    struct RecordingGossip {
        broadcasts: PlMutex<Vec<GossipEnvelope>>,
    }

    impl GossipClient for RecordingGossip {
        fn broadcast_message(&self, envelope: GossipEnvelope) {
            self.broadcasts.lock().push(envelope);
        }

        fn unicast_message(&self, _envelope: GossipEnvelope) {}
    }

    const NOW: u64 = 1_700_000_000_000;
    const TEN_MINUTES: u64 = 10 * 60 * 1000;

    fn transaction_created_at(timestamp: u64, payload: &[u8]) -> Transaction {
        Transaction {
            header: TransactionHeader {
                version: 0,
                sender: b"sender".to_vec(),
                timestamp,
            },
            body: TransactionBody {
                contract_address: ContractAddress::new("token"),
                payload: payload.to_vec(),
            },
        }
    }

    fn pool() -> (Arc<RecordingGossip>, Arc<CommittedTransactionPool>, PendingTransactionPool) {
        let gossip = Arc::new(RecordingGossip::default());
        let committed = Arc::new(CommittedTransactionPool::new());
        let pool = PendingTransactionPool::new(
            gossip.clone() as Arc<dyn GossipClient>,
            committed.clone(),
            PoolConfig::default(),
        );
        (gossip, committed, pool)
    }

    #[test]
    fn test_new_transaction_is_added_and_broadcast() {
        let (gossip, _, pool) = pool();
        let tx = transaction_created_at(NOW, b"a");

        pool.add_new_pending_transaction_at(tx.clone(), NOW).unwrap();

        let pending = pool.get_all_pending_transactions();
        assert_eq!(pending, vec![tx]);
        assert_eq!(gossip.broadcasts.lock().len(), 1);
    }

    #[test]
    fn test_identical_transactions_are_admitted_once() {
        let (_, _, pool) = pool();
        let tx = transaction_created_at(NOW, b"a");

        let id = pool.add_new_pending_transaction_at(tx.clone(), NOW).unwrap();
        let err = pool.add_new_pending_transaction_at(tx, NOW).unwrap_err();
        match err {
            TxPoolError::DuplicateTransaction(dup) => assert_eq!(dup, id),
            other => panic!("expected duplicate error, got {other}"),
        }
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_expired_transaction_is_refused() {
        let (gossip, _, pool) = pool();
        let tx = transaction_created_at(NOW - TEN_MINUTES, b"a");

        let err = pool.add_new_pending_transaction_at(tx, NOW).unwrap_err();
        assert!(matches!(err, TxPoolError::ExpiredTransaction { .. }));
        assert!(pool.is_empty());
        assert!(gossip.broadcasts.lock().is_empty());
    }

    #[test]
    fn test_expired_entries_are_swept_only_by_the_sweep() {
        // Freshness window walkthrough: admit T now, advance the clock ten
        // minutes, admit fresh T2, sweep - only T2 remains.
        let (_, _, pool) = pool();
        let t1 = transaction_created_at(NOW, b"t1");
        let t2 = transaction_created_at(NOW + TEN_MINUTES, b"t2");

        pool.add_new_pending_transaction_at(t1, NOW).unwrap();

        let later = NOW + TEN_MINUTES;
        pool.add_new_pending_transaction_at(t2.clone(), later).unwrap();

        // Aging alone removes nothing
        assert_eq!(pool.len(), 2);

        let swept = pool.clear_expired_transactions_at(later);
        assert_eq!(swept.len(), 1);
        assert_eq!(pool.get_all_pending_transactions(), vec![t2]);
    }

    #[test]
    fn test_committed_transaction_cannot_be_readmitted() {
        let (_, committed, pool) = pool();
        let tx = transaction_created_at(NOW, b"a");

        let id = pool.add_new_pending_transaction_at(tx.clone(), NOW).unwrap();
        pool.mark_committed_at(&[id], NOW);

        assert!(pool.is_empty());
        assert!(committed.has_transaction_with_id(&id));

        let err = pool.add_new_pending_transaction_at(tx, NOW + 1).unwrap_err();
        assert!(matches!(err, TxPoolError::DuplicateTransaction(_)));
    }

    #[test]
    fn test_gossiped_duplicates_are_absorbed_silently() {
        let (gossip, _, pool) = pool();
        let tx = transaction_created_at(NOW, b"a");

        // Same transaction arriving from two distinct peers
        pool.on_gossiped_transaction_at(tx.clone(), NOW);
        pool.on_gossiped_transaction_at(tx, NOW + 5);

        assert_eq!(pool.len(), 1);
        // Absorption never re-broadcasts
        assert!(gossip.broadcasts.lock().is_empty());
    }

    #[test]
    fn test_snapshot_preserves_insertion_order() {
        let (_, _, pool) = pool();
        let txs: Vec<Transaction> = (0u8..5)
            .map(|i| transaction_created_at(NOW + i as u64, &[i]))
            .collect();
        for tx in &txs {
            pool.add_new_pending_transaction_at(tx.clone(), NOW + 10).unwrap();
        }
        assert_eq!(pool.get_all_pending_transactions(), txs);
    }
}
