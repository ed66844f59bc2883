//! State coordinates and state diffs
//!
//! `(contract address, key)` is the unique addressable unit of contract
//! state. Values are opaque bytes compared by exact equality.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a contract; resolves to executable logic via the registry.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
    Serialize, Deserialize,
)]
pub struct ContractAddress(pub String);

impl ContractAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully qualified state coordinate.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
    Serialize, Deserialize,
)]
pub struct StateKey {
    pub contract: ContractAddress,
    pub key: String,
}

impl StateKey {
    pub fn new(contract: ContractAddress, key: impl Into<String>) -> Self {
        Self {
            contract,
            key: key.into(),
        }
    }
}

/// One net mutation: the value now stored at a state coordinate.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct StateRecord {
    pub contract: ContractAddress,
    pub key: String,
    pub value: Vec<u8>,
}

impl StateRecord {
    pub fn state_key(&self) -> StateKey {
        StateKey::new(self.contract.clone(), self.key.clone())
    }
}

/// Net mutation of a block, in mutation order. Later writes to the same key
/// shadow earlier ones.
pub type StateDiff = Vec<StateRecord>;
