//! Contract surface: the trait contracts implement, the execution context
//! they see, and the registry resolving addresses to logic

pub mod token;

use crate::state_cache::StateCacheFork;
use ledger_types::{ContractAddress, StateKey};
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome classification for one contract invocation.
///
/// `Rejected` is a normal business outcome scoped to the transaction; the
/// block proceeds. `Fault` is a correctness threat and aborts the whole
/// block application.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("contract fault: {0}")]
    Fault(#[from] anyhow::Error),
}

impl ContractError {
    /// Convenience constructor for business-rule rejections.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Execution context handed to a contract invocation.
///
/// State access is scoped to the executing contract's address: a contract
/// can only read and write its own keys. Writes land in the transaction's
/// fork and become visible to later transactions only after a successful
/// merge.
pub struct ContractContext<'a, 'b> {
    contract_address: &'a ContractAddress,
    sender: &'a [u8],
    payload: &'a [u8],
    state: &'a mut StateCacheFork<'b>,
}

impl<'a, 'b> ContractContext<'a, 'b> {
    pub fn new(
        contract_address: &'a ContractAddress,
        sender: &'a [u8],
        payload: &'a [u8],
        state: &'a mut StateCacheFork<'b>,
    ) -> Self {
        Self {
            contract_address,
            sender,
            payload,
            state,
        }
    }

    pub fn sender(&self) -> &[u8] {
        self.sender
    }

    pub fn payload(&self) -> &[u8] {
        self.payload
    }

    /// Read one of this contract's state keys. Storage failures surface as
    /// faults, never as rejections.
    pub fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, ContractError> {
        self.state
            .get(&StateKey::new(self.contract_address.clone(), key))
            .map_err(ContractError::Fault)
    }

    /// Write one of this contract's state keys.
    pub fn put_state(&mut self, key: &str, value: Vec<u8>) {
        self.state
            .put(StateKey::new(self.contract_address.clone(), key), value);
    }
}

/// Executable contract logic.
pub trait SmartContract: Send + Sync {
    /// Apply one transaction's payload to contract state.
    fn process(&self, ctx: &mut ContractContext<'_, '_>) -> Result<(), ContractError>;

    /// Answer a read-only query. Writes made through the context are
    /// discarded by the caller.
    fn call(&self, ctx: &mut ContractContext<'_, '_>) -> Result<Vec<u8>, ContractError>;
}

/// Resolves contract addresses to executable logic. Opaque lookup: the
/// executor neither knows nor cares how contracts got registered.
#[derive(Default)]
pub struct ContractRegistry {
    contracts: HashMap<ContractAddress, Arc<dyn SmartContract>>,
}

impl ContractRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in contracts.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(token::address(), Arc::new(token::TokenContract));
        registry
    }

    pub fn register(&mut self, address: ContractAddress, contract: Arc<dyn SmartContract>) {
        self.contracts.insert(address, contract);
    }

    pub fn resolve(&self, address: &ContractAddress) -> Option<Arc<dyn SmartContract>> {
        self.contracts.get(address).cloned()
    }
}
