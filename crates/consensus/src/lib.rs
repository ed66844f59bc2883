//! Ledger consensus - leader-elected replicated block log
//!
//! Architecture:
//! - [`RaftNode`] maintains a totally ordered log across a fixed-size
//!   cluster: randomized election timeouts, periodic heartbeats, majority
//!   commit
//! - [`GossipTransport`] bridges the gossip channel to the point-to-point
//!   surface the protocol expects
//! - [`BlockBuilder`] decides when and what to propose, and applies
//!   committed blocks through the virtual machine
//! - [`ConsensusEngine`] owns all three and exposes the lifecycle surface
//!   to the hosting node
//!
//! Committed entries are delivered exactly once, in strictly increasing
//! index order, on every node; that total order is the correctness backbone
//! of the whole pipeline.

pub mod block_builder;
pub mod engine;
pub mod raft;
pub mod transport;
pub mod types;


pub use block_builder::BlockBuilder;
pub use engine::ConsensusEngine;
pub use raft::{ConsensusEvent, RaftHandle, RaftNode};
pub use transport::GossipTransport;
pub use types::{
    ConsensusConfig, ConsensusError, ConsensusMessage, ElectionTimeout, LogEntry, NodeRole,
    RaftMessage,
};
