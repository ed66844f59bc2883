//! State and block storage surfaces
//!
//! The node persists committed state and blocks through these traits; the
//! in-memory implementations back tests and single-process simulation.

use dashmap::DashMap;
use ledger_types::{Block, StateKey, StateRecord};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Committed contract state, keyed by `(contract, key)`.
pub trait StateStorage: Send + Sync {
    /// Read one key of committed state.
    fn read_key(&self, key: &StateKey) -> anyhow::Result<Option<Vec<u8>>>;

    /// Apply a block's state diff. Records are written in order; later
    /// records for the same key overwrite earlier ones.
    fn write_records(&self, records: &[StateRecord]) -> anyhow::Result<()>;
}

/// Committed block storage.
pub trait BlockStore: Send + Sync {
    /// Persist a committed block.
    fn put_block(&self, block: &Block) -> anyhow::Result<()>;

    /// The highest committed block, if any.
    fn last_block(&self) -> anyhow::Result<Option<Block>>;

    /// Look up a committed block by height.
    fn block_at(&self, height: u64) -> anyhow::Result<Option<Block>>;
}

/// Thread-safe in-memory state storage.
///
/// Uses DashMap for lock-free concurrent reads; the commit path is the only
/// writer.
#[derive(Default)]
pub struct MemoryStateStorage {
    entries: DashMap<StateKey, Vec<u8>>,
}

impl MemoryStateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StateStorage for MemoryStateStorage {
    fn read_key(&self, key: &StateKey) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|r| r.value().clone()))
    }

    fn write_records(&self, records: &[StateRecord]) -> anyhow::Result<()> {
        for record in records {
            self.entries
                .insert(record.state_key(), record.value.clone());
        }
        Ok(())
    }
}

/// In-memory block store ordered by height.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<BTreeMap<u64, Block>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }
}

impl BlockStore for MemoryBlockStore {
    fn put_block(&self, block: &Block) -> anyhow::Result<()> {
        self.blocks.write().insert(block.height(), block.clone());
        Ok(())
    }

    fn last_block(&self) -> anyhow::Result<Option<Block>> {
        Ok(self.blocks.read().values().next_back().cloned())
    }

    fn block_at(&self, height: u64) -> anyhow::Result<Option<Block>> {
        Ok(self.blocks.read().get(&height).cloned())
    }
}
