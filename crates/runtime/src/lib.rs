//! Ledger runtime - deterministic contract execution engine
//!
//! This crate provides the execution half of the node:
//! - [`VirtualMachine`]: applies an ordered transaction batch to contract
//!   state with per-transaction isolation
//! - [`StateCache`]: layered state overlay with fork/merge semantics
//! - [`ContractRegistry`]: resolves contract addresses to executable logic
//! - State storage backends: in-memory and sled-backed
//!
//! Determinism is the contract: identical ordered input over identical
//! starting state yields identical results on every replica, so execution
//! never consults wall clocks, randomness or iteration order of unordered
//! maps.

pub mod contracts;
pub mod executor;
pub mod persistence;
pub mod state_cache;
pub mod storage;

pub use contracts::{ContractContext, ContractError, ContractRegistry, SmartContract};
pub use executor::{
    CallContractInput, ExecutionError, ProcessedTransactionSet, RejectedTransaction,
    VirtualMachine,
};
pub use persistence::SledStore;
pub use state_cache::{StateCache, StateCacheFork};
pub use storage::{BlockStore, MemoryBlockStore, MemoryStateStorage, StateStorage};
