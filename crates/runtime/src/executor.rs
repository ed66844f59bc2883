//! Virtual machine executor
//!
//! Applies an ordered transaction batch to contract state with
//! per-transaction isolation: each transaction runs in a fork of the
//! block-level cache, and only successful transactions merge back.

use crate::contracts::{ContractContext, ContractError, ContractRegistry};
use crate::state_cache::StateCache;
use crate::storage::StateStorage;
use ledger_types::{ContractAddress, StateDiff, Transaction};
use std::sync::Arc;

/// Failure that aborts an entire `process_transaction_set` call. Business
/// rejections never surface here; they are part of the normal output.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("unknown contract address {0}")]
    UnknownContract(ContractAddress),

    #[error("contract {contract} faulted: {source}")]
    Fault {
        contract: ContractAddress,
        #[source]
        source: anyhow::Error,
    },
}

/// A transaction recorded as rejected, with the business reason.
#[derive(Debug, Clone)]
pub struct RejectedTransaction {
    pub transaction: Transaction,
    pub reason: String,
}

/// Result of applying one ordered transaction batch.
#[derive(Debug, Clone, Default)]
pub struct ProcessedTransactionSet {
    /// Net state mutation of the processed transactions, in mutation order
    pub state_diff: StateDiff,
    pub processed_transactions: Vec<Transaction>,
    pub rejected_transactions: Vec<RejectedTransaction>,
}

/// Read-only contract query.
#[derive(Debug, Clone)]
pub struct CallContractInput {
    pub sender: Vec<u8>,
    pub contract_address: ContractAddress,
    pub payload: Vec<u8>,
}

/// Deterministic contract executor over a committed-state backend.
pub struct VirtualMachine {
    registry: ContractRegistry,
    storage: Arc<dyn StateStorage>,
}

impl VirtualMachine {
    pub fn new(registry: ContractRegistry, storage: Arc<dyn StateStorage>) -> Self {
        Self { registry, storage }
    }

    /// Apply `ordered_transactions` in input order.
    ///
    /// Order is significant: every replica processes the identical sequence
    /// and must reach identical results. A rejected transaction discards its
    /// fork and the batch continues; any fault aborts the whole call with
    /// no partial output.
    pub fn process_transaction_set(
        &self,
        ordered_transactions: &[Transaction],
    ) -> Result<ProcessedTransactionSet, ExecutionError> {
        let mut block_cache = StateCache::with_storage(self.storage.clone());
        let mut processed_transactions = Vec::new();
        let mut rejected_transactions = Vec::new();

        for transaction in ordered_transactions {
            let contract_address = &transaction.body.contract_address;
            let contract = self
                .registry
                .resolve(contract_address)
                .ok_or_else(|| ExecutionError::UnknownContract(contract_address.clone()))?;

            let mut fork = block_cache.fork();
            let mut ctx = ContractContext::new(
                contract_address,
                &transaction.header.sender,
                &transaction.body.payload,
                &mut fork,
            );

            match contract.process(&mut ctx) {
                Ok(()) => {
                    let records = fork.into_modified_records();
                    block_cache.merge(records);
                    processed_transactions.push(transaction.clone());
                }
                Err(ContractError::Rejected(reason)) => {
                    tracing::warn!(
                        tx_id = %transaction.id(),
                        contract = %contract_address,
                        reason = %reason,
                        "Transaction rejected"
                    );
                    rejected_transactions.push(RejectedTransaction {
                        transaction: transaction.clone(),
                        reason,
                    });
                }
                Err(ContractError::Fault(source)) => {
                    return Err(ExecutionError::Fault {
                        contract: contract_address.clone(),
                        source,
                    });
                }
            }
        }

        if !rejected_transactions.is_empty() {
            tracing::warn!(
                rejected = rejected_transactions.len(),
                "Virtual machine rejected transactions in this batch"
            );
        }

        Ok(ProcessedTransactionSet {
            state_diff: block_cache.modified_records(),
            processed_transactions,
            rejected_transactions,
        })
    }

    /// Execute a read-only contract query against current committed state.
    ///
    /// Runs in a throwaway fork; nothing the contract writes survives the
    /// call.
    pub fn call_contract(&self, input: &CallContractInput) -> Result<Vec<u8>, ContractError> {
        let contract = self.registry.resolve(&input.contract_address).ok_or_else(|| {
            ContractError::rejected(format!("unknown contract address {}", input.contract_address))
        })?;

        let block_cache = StateCache::with_storage(self.storage.clone());
        let mut fork = block_cache.fork();
        let mut ctx = ContractContext::new(
            &input.contract_address,
            &input.sender,
            &input.payload,
            &mut fork,
        );
        contract.call(&mut ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::token::{self, TokenCommand};
    use crate::contracts::SmartContract;
    use crate::storage::MemoryStateStorage;
    use ledger_types::{StateKey, TransactionBody, TransactionHeader};

    fn vm_with_memory_storage() -> (VirtualMachine, Arc<MemoryStateStorage>) {
        let storage = Arc::new(MemoryStateStorage::new());
        let vm = VirtualMachine::new(
            ContractRegistry::with_builtins(),
            storage.clone() as Arc<dyn StateStorage>,
        );
        (vm, storage)
    }

    fn token_transaction(sender: &str, command: TokenCommand) -> Transaction {
        Transaction {
            header: TransactionHeader {
                version: 0,
                sender: sender.as_bytes().to_vec(),
                timestamp: 1_700_000_000_000,
            },
            body: TransactionBody {
                contract_address: token::address(),
                payload: command.to_bytes(),
            },
        }
    }

    fn mint(account: &str, amount: u64) -> Transaction {
        token_transaction(
            "faucet",
            TokenCommand::Mint {
                account: account.to_string(),
                amount,
            },
        )
    }

    fn transfer(from: &str, to: &str, amount: u64) -> Transaction {
        token_transaction(
            from,
            TokenCommand::Transfer {
                to: to.to_string(),
                amount,
            },
        )
    }

    #[test]
    fn test_valid_and_invalid_split() {
        // Block [T1 valid, T2 invalid] over empty state: diff only from T1
        let (vm, _) = vm_with_memory_storage();
        let t1 = mint("alice", 100);
        let t2 = transfer("bob", "alice", 50); // bob has no funds

        let output = vm.process_transaction_set(&[t1.clone(), t2.clone()]).unwrap();

        assert_eq!(output.processed_transactions, vec![t1]);
        assert_eq!(output.rejected_transactions.len(), 1);
        assert_eq!(output.rejected_transactions[0].transaction, t2);
        assert_eq!(output.state_diff.len(), 1);
        assert_eq!(output.state_diff[0].key, "balance:alice");
        assert_eq!(output.state_diff[0].value, 100u64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_rejected_transaction_contributes_no_keys() {
        let (vm, _) = vm_with_memory_storage();
        let output = vm
            .process_transaction_set(&[transfer("nobody", "anyone", 5)])
            .unwrap();
        assert!(output.state_diff.is_empty());
        assert!(output.processed_transactions.is_empty());
        assert_eq!(output.rejected_transactions.len(), 1);
    }

    #[test]
    fn test_later_writes_shadow_earlier_ones() {
        let (vm, _) = vm_with_memory_storage();
        let batch = vec![
            mint("alice", 100),
            transfer("alice", "bob", 40),
            transfer("alice", "carol", 10),
        ];
        let output = vm.process_transaction_set(&batch).unwrap();
        assert_eq!(output.processed_transactions.len(), 3);

        // Net alice balance after both transfers, not an intermediate value
        let alice = output
            .state_diff
            .iter()
            .rev()
            .find(|r| r.key == "balance:alice")
            .unwrap();
        assert_eq!(alice.value, 50u64.to_le_bytes().to_vec());

        // Exactly one record per mutated key survives in the diff
        let alice_records = output
            .state_diff
            .iter()
            .filter(|r| r.key == "balance:alice")
            .count();
        assert_eq!(alice_records, 1);
    }

    #[test]
    fn test_execution_is_deterministic() {
        let batch = vec![
            mint("alice", 100),
            transfer("alice", "bob", 30),
            transfer("carol", "bob", 10), // rejected: no funds
            transfer("alice", "carol", 20),
        ];

        let (vm_a, _) = vm_with_memory_storage();
        let (vm_b, _) = vm_with_memory_storage();
        let out_a = vm_a.process_transaction_set(&batch).unwrap();
        let out_b = vm_b.process_transaction_set(&batch).unwrap();

        assert_eq!(out_a.state_diff, out_b.state_diff);
        assert_eq!(out_a.processed_transactions, out_b.processed_transactions);
        assert_eq!(
            out_a
                .rejected_transactions
                .iter()
                .map(|r| r.transaction.id())
                .collect::<Vec<_>>(),
            out_b
                .rejected_transactions
                .iter()
                .map(|r| r.transaction.id())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_reads_fall_through_to_committed_state() {
        let (vm, storage) = vm_with_memory_storage();

        // Commit a balance, then spend it in a later batch
        let output = vm.process_transaction_set(&[mint("alice", 100)]).unwrap();
        storage.write_records(&output.state_diff).unwrap();

        let output = vm
            .process_transaction_set(&[transfer("alice", "bob", 60)])
            .unwrap();
        assert_eq!(output.processed_transactions.len(), 1);

        let alice = output
            .state_diff
            .iter()
            .find(|r| r.key == "balance:alice")
            .unwrap();
        assert_eq!(alice.value, 40u64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_unknown_contract_is_a_fault() {
        let (vm, _) = vm_with_memory_storage();
        let mut tx = mint("alice", 1);
        tx.body.contract_address = ledger_types::ContractAddress::new("missing");

        let result = vm.process_transaction_set(&[tx]);
        assert!(matches!(result, Err(ExecutionError::UnknownContract(_))));
    }

    #[test]
    fn test_fault_aborts_whole_batch() {
        struct FaultyContract;
        impl SmartContract for FaultyContract {
            fn process(&self, _ctx: &mut ContractContext<'_, '_>) -> Result<(), ContractError> {
                Err(ContractError::Fault(anyhow::anyhow!("backing store exploded")))
            }
            fn call(&self, _ctx: &mut ContractContext<'_, '_>) -> Result<Vec<u8>, ContractError> {
                Err(ContractError::rejected("not callable"))
            }
        }

        let storage = Arc::new(MemoryStateStorage::new());
        let mut registry = ContractRegistry::with_builtins();
        let faulty = ledger_types::ContractAddress::new("faulty");
        registry.register(faulty.clone(), Arc::new(FaultyContract));
        let vm = VirtualMachine::new(registry, storage);

        let mut bad = mint("alice", 1);
        bad.body.contract_address = faulty;
        let result = vm.process_transaction_set(&[mint("alice", 5), bad]);
        assert!(matches!(result, Err(ExecutionError::Fault { .. })));
    }

    #[test]
    fn test_call_contract_reads_committed_state_without_mutating() {
        let (vm, storage) = vm_with_memory_storage();
        let output = vm.process_transaction_set(&[mint("alice", 77)]).unwrap();
        storage.write_records(&output.state_diff).unwrap();

        let result = vm
            .call_contract(&CallContractInput {
                sender: b"anyone".to_vec(),
                contract_address: token::address(),
                payload: TokenCommand::Balance {
                    account: "alice".to_string(),
                }
                .to_bytes(),
            })
            .unwrap();
        assert_eq!(result, 77u64.to_le_bytes().to_vec());

        // The query left committed state untouched
        let key = StateKey::new(token::address(), "balance:alice");
        assert_eq!(
            storage.read_key(&key).unwrap(),
            Some(77u64.to_le_bytes().to_vec())
        );
        assert_eq!(storage.len(), 1);
    }
}
