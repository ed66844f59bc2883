//! Core types for the consensus protocol

use borsh::{BorshDeserialize, BorshSerialize};
use ledger_types::{Block, DecodeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounds for the randomized election timeout. A fresh timeout is drawn
/// uniformly from `[min_ms, max_ms]` on every reset so cluster members
/// rarely stand for election simultaneously.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ElectionTimeout {
    pub min_ms: u64,
    pub max_ms: u64,
}

/// Configuration for a consensus node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// This node's cluster-unique name
    pub node_name: String,
    /// Fixed number of cluster members for the process lifetime
    pub cluster_size: usize,
    /// How long to wait before declaring the leader dead
    pub election_timeout: ElectionTimeout,
    /// How often the leader sends heartbeats
    pub heartbeat_interval_ms: u64,
    /// How often the block builder polls the pending pool while leading
    pub block_builder_poll_interval_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            cluster_size: 1,
            election_timeout: ElectionTimeout {
                min_ms: 2000,
                max_ms: 4000,
            },
            heartbeat_interval_ms: 100,
            block_builder_poll_interval_ms: 500,
        }
    }
}

impl ConsensusConfig {
    /// Smallest member count that forms a quorum.
    pub fn majority(&self) -> usize {
        self.cluster_size / 2 + 1
    }
}

/// Role of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Follower => write!(f, "follower"),
            NodeRole::Candidate => write!(f, "candidate"),
            NodeRole::Leader => write!(f, "leader"),
        }
    }
}

/// Payload agreed on by the cluster: one block per log entry.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ConsensusMessage {
    pub block: Block,
}

/// One replicated log entry. The index is globally monotonic and defines
/// commit order.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub message: ConsensusMessage,
}

/// Protocol frame exchanged between cluster members. The originating node
/// id travels in the gossip envelope, not in the frame.
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub enum RaftMessage {
    RequestVote {
        term: u64,
        last_log_index: u64,
        last_log_term: u64,
    },
    RequestVoteResponse {
        term: u64,
        vote_granted: bool,
    },
    AppendEntries {
        term: u64,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    },
    AppendEntriesResponse {
        term: u64,
        success: bool,
        /// Highest log index known replicated on the sender when
        /// `success`; ignored otherwise
        match_index: u64,
    },
}

impl RaftMessage {
    /// Serialize for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("raft message serialization should not fail")
    }

    /// Deserialize from network
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        borsh::from_slice(data).map_err(|e| DecodeError::new("raft message", e))
    }
}

/// Errors surfaced by the consensus engine's command surface.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("not the leader")]
    NotLeader,

    #[error("consensus node is shutting down")]
    ShuttingDown,
}
