//! Layered state cache with fork/merge semantics
//!
//! A block-scoped [`StateCache`] accumulates the net mutation of one block.
//! Each transaction executes against a [`StateCacheFork`]: an overlay whose
//! writes stay invisible to the parent until merged. Discarding the fork
//! discards the transaction's effects entirely.

use crate::storage::StateStorage;
use ledger_types::{StateDiff, StateKey, StateRecord};
use std::collections::HashMap;
use std::sync::Arc;

/// Block-level state cache. Reads fall through to committed storage; writes
/// are tracked in mutation order so the block's state diff lists later
/// writes after earlier ones (re-writing a key moves it to its latest
/// position).
pub struct StateCache {
    storage: Option<Arc<dyn StateStorage>>,
    entries: HashMap<StateKey, Vec<u8>>,
    modified: Vec<StateKey>,
}

impl StateCache {
    /// Cache with no storage fallback; unknown keys read as absent.
    pub fn new() -> Self {
        Self {
            storage: None,
            entries: HashMap::new(),
            modified: Vec::new(),
        }
    }

    /// Cache whose reads fall through to committed state.
    pub fn with_storage(storage: Arc<dyn StateStorage>) -> Self {
        Self {
            storage: Some(storage),
            entries: HashMap::new(),
            modified: Vec::new(),
        }
    }

    /// Read a key: cache first, then committed storage.
    pub fn get(&self, key: &StateKey) -> anyhow::Result<Option<Vec<u8>>> {
        if let Some(value) = self.entries.get(key) {
            return Ok(Some(value.clone()));
        }
        match &self.storage {
            Some(storage) => storage.read_key(key),
            None => Ok(None),
        }
    }

    /// Write a key, recording it as the latest mutation.
    pub fn put(&mut self, key: StateKey, value: Vec<u8>) {
        if self.entries.insert(key.clone(), value).is_some() {
            self.modified.retain(|k| k != &key);
        }
        self.modified.push(key);
    }

    /// Fork an isolated child view. The parent is never mutated through the
    /// fork before an explicit merge.
    pub fn fork(&self) -> StateCacheFork<'_> {
        StateCacheFork {
            parent: self,
            overlay: HashMap::new(),
            modified: Vec::new(),
        }
    }

    /// Merge a fork's modified records into this cache, in their mutation
    /// order. Last write per key wins.
    pub fn merge(&mut self, records: StateDiff) {
        for record in records {
            let key = record.state_key();
            self.put(key, record.value);
        }
    }

    /// The net mutation held by this cache, in mutation order.
    pub fn modified_records(&self) -> StateDiff {
        self.modified
            .iter()
            .map(|key| StateRecord {
                contract: key.contract.clone(),
                key: key.key.clone(),
                value: self.entries[key].clone(),
            })
            .collect()
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

/// One transaction's isolated view over a parent [`StateCache`].
pub struct StateCacheFork<'a> {
    parent: &'a StateCache,
    overlay: HashMap<StateKey, Vec<u8>>,
    modified: Vec<StateKey>,
}

impl StateCacheFork<'_> {
    /// Read a key: overlay first, then the parent chain.
    pub fn get(&self, key: &StateKey) -> anyhow::Result<Option<Vec<u8>>> {
        if let Some(value) = self.overlay.get(key) {
            return Ok(Some(value.clone()));
        }
        self.parent.get(key)
    }

    /// Write a key into the overlay only.
    pub fn put(&mut self, key: StateKey, value: Vec<u8>) {
        if self.overlay.insert(key.clone(), value).is_some() {
            self.modified.retain(|k| k != &key);
        }
        self.modified.push(key);
    }

    /// Consume the fork, yielding its modified records in mutation order.
    pub fn into_modified_records(self) -> StateDiff {
        let mut overlay = self.overlay;
        self.modified
            .into_iter()
            .map(|state_key| {
                let value = overlay.remove(&state_key).unwrap_or_default();
                let StateKey { contract, key } = state_key;
                StateRecord { contract, key, value }
            })
            .collect()
    }
}
