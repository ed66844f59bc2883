//! Gossip message envelope

use borsh::{BorshDeserialize, BorshSerialize};
use ledger_types::DecodeError;

/// Broadcast group reserved for consensus protocol frames.
pub const CONSENSUS_GROUP: &str = "consensus";
/// Broadcast group for transaction pool convergence.
pub const TRANSACTION_POOL_GROUP: &str = "transactionPool";

/// Message type carried by consensus envelopes.
pub const MSG_RAFT: &str = "RaftMessage";
/// Message type carried by pool envelopes.
pub const MSG_NEW_PENDING_TRANSACTION: &str = "NewPendingTransaction";

/// Envelope wrapping one gossiped payload.
///
/// `recipient: None` means broadcast; receivers drop envelopes addressed to
/// somebody else. `immediate` marks the message for immediate (non-batched)
/// delivery.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GossipEnvelope {
    pub broadcast_group: String,
    pub message_type: String,
    pub recipient: Option<String>,
    pub buffer: Vec<u8>,
    pub immediate: bool,
}

impl GossipEnvelope {
    /// Envelope for a consensus protocol frame, broadcast to all members.
    pub fn raft_broadcast(buffer: Vec<u8>) -> Self {
        Self {
            broadcast_group: CONSENSUS_GROUP.to_string(),
            message_type: MSG_RAFT.to_string(),
            recipient: None,
            buffer,
            immediate: true,
        }
    }

    /// Envelope for a consensus protocol frame, addressed to one member.
    pub fn raft_unicast(recipient: impl Into<String>, buffer: Vec<u8>) -> Self {
        Self {
            broadcast_group: CONSENSUS_GROUP.to_string(),
            message_type: MSG_RAFT.to_string(),
            recipient: Some(recipient.into()),
            buffer,
            immediate: true,
        }
    }

    /// Envelope carrying a newly admitted pending transaction.
    pub fn new_pending_transaction(buffer: Vec<u8>) -> Self {
        Self {
            broadcast_group: TRANSACTION_POOL_GROUP.to_string(),
            message_type: MSG_NEW_PENDING_TRANSACTION.to_string(),
            recipient: None,
            buffer,
            immediate: false,
        }
    }
}

/// Wire frame: envelope plus the name of the originating node.
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct GossipFrame {
    pub origin: String,
    pub envelope: GossipEnvelope,
}

impl GossipFrame {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("gossip frame serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        borsh::from_slice(data).map_err(|e| DecodeError::new("gossip frame", e))
    }
}
