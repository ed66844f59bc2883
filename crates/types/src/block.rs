//! Blocks: the unit of consensus agreement

use crate::transaction::Transaction;
use crate::DecodeError;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash of a block's canonical borsh encoding.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
    Serialize, Deserialize,
)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// The hash the genesis block links back to.
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self)
    }
}

/// Block header: position in the chain and linkage to the previous block.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height in the chain; strictly increases by 1 per committed block
    pub height: u64,
    /// Hash of the previous committed block (`BlockHash::ZERO` for height 1)
    pub prev_block_hash: BlockHash,
    /// Proposal time (unix millis)
    pub timestamp: u64,
}

/// Block body: the ordered transaction batch.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BlockBody {
    pub transactions: Vec<Transaction>,
}

/// An immutable block. Immutable once proposed; hashed over the canonical
/// borsh encoding of header and body.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    /// Compute the hash of this block.
    pub fn hash(&self) -> BlockHash {
        let encoded = borsh::to_vec(self).expect("block serialization should not fail");
        BlockHash(*blake3::hash(&encoded).as_bytes())
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Serialize for network transmission or storage
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("block serialization should not fail")
    }

    /// Deserialize from network or storage
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        borsh::from_slice(data).map_err(|e| DecodeError::new("block", e))
    }
}
