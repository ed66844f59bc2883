//! Admission errors

use ledger_types::TransactionId;
use thiserror::Error;

/// Synchronous admission failure; pool state is unchanged.
#[derive(Debug, Error)]
pub enum TxPoolError {
    #[error("transaction with id {0} already exists in the transaction pool")]
    DuplicateTransaction(TransactionId),

    #[error(
        "transaction with id {id} expired: created at {created_at}, freshness window is {window_ms} ms"
    )]
    ExpiredTransaction {
        id: TransactionId,
        created_at: u64,
        window_ms: u64,
    },
}
