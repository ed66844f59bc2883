//! Shared data model for the permissioned ledger
//!
//! This crate is the common vocabulary of the node:
//! - Transactions and their content-derived ids
//! - Blocks and block hashes
//! - State coordinates and state diffs
//!
//! Everything that crosses the wire or a storage boundary is borsh-encoded;
//! the canonical borsh layout is what ids and hashes are computed over, so
//! every replica derives identical ids for identical content.

pub mod block;
pub mod state;
pub mod transaction;

pub use block::{Block, BlockBody, BlockHash, BlockHeader};
pub use state::{ContractAddress, StateDiff, StateKey, StateRecord};
pub use transaction::{Transaction, TransactionBody, TransactionHeader, TransactionId};

/// Error decoding a borsh-encoded type received from the wire or storage.
#[derive(Debug, thiserror::Error)]
#[error("failed to decode {what}: {source}")]
pub struct DecodeError {
    pub what: &'static str,
    #[source]
    pub source: borsh::io::Error,
}

impl DecodeError {
    pub fn new(what: &'static str, source: borsh::io::Error) -> Self {
        Self { what, source }
    }
}
