//! Committed transaction pool - membership oracle for finalized transactions

use ledger_types::TransactionId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Records transactions already finalized in some committed block, keyed by
/// derived id. Consulted on admission and by the block builder to prevent
/// re-inclusion.
#[derive(Default)]
pub struct CommittedTransactionPool {
    /// id -> commit time (unix millis)
    committed: Mutex<HashMap<TransactionId, u64>>,
}

impl CommittedTransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transaction as committed. Idempotent; the first commit time
    /// is kept on redelivery.
    pub fn add_committed(&self, id: TransactionId, committed_at: u64) {
        self.committed.lock().entry(id).or_insert(committed_at);
    }

    /// Membership check by derived transaction id.
    pub fn has_transaction_with_id(&self, id: &TransactionId) -> bool {
        self.committed.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.committed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.lock().is_empty()
    }
}
