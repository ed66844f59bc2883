//! Transaction pools - admission control and lifecycle tracking
//!
//! - [`PendingTransactionPool`]: transactions not yet included in a
//!   committed block. Admission enforces id uniqueness and freshness;
//!   admitted transactions are gossiped so peer pools converge.
//! - [`CommittedTransactionPool`]: membership oracle over transactions
//!   already finalized in some committed block; fences re-admission.
//!
//! All pool state sits behind a single guard, so admission, snapshot reads
//! and commit-time removal never observe a torn intermediate set.

pub mod committed;
pub mod error;
pub mod pending;

pub use committed::CommittedTransactionPool;
pub use error::TxPoolError;
pub use pending::{PendingTransactionPool, PoolConfig};

/// Current wall-clock time in unix millis.
pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
