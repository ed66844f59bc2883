//! Transactions and content-derived transaction ids

use crate::state::ContractAddress;
use crate::DecodeError;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction header: who sent it and when.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct TransactionHeader {
    /// Protocol version of the transaction format
    pub version: u32,
    /// Opaque sender identity bytes
    pub sender: Vec<u8>,
    /// Client-side creation time (unix millis); admission freshness is
    /// judged against this
    pub timestamp: u64,
}

/// Transaction body: which contract to invoke and with what.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct TransactionBody {
    /// Address of the contract this transaction targets
    pub contract_address: ContractAddress,
    /// Opaque call payload, interpreted by the contract
    pub payload: Vec<u8>,
}

/// An immutable transaction. Identified by the blake3 hash of its canonical
/// borsh encoding, so id equality is content equality.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Transaction {
    pub header: TransactionHeader,
    pub body: TransactionBody,
}

impl Transaction {
    /// Derive the deterministic id of this transaction.
    pub fn id(&self) -> TransactionId {
        let encoded = borsh::to_vec(self).expect("transaction serialization should not fail");
        TransactionId(*blake3::hash(&encoded).as_bytes())
    }

    /// Serialize for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("transaction serialization should not fail")
    }

    /// Deserialize from network
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        borsh::from_slice(data).map_err(|e| DecodeError::new("transaction", e))
    }
}

/// Content-derived transaction id.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
    Serialize, Deserialize,
)]
pub struct TransactionId(pub [u8; 32]);

impl TransactionId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self)
    }
}
