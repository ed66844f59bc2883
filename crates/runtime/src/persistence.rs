//! Sled-backed persistence for committed state and blocks
//!
//! One sled database with separate trees for contract state and blocks.
//! State survives restarts; the block builder seeds its height/hash from
//! the last stored block on startup.

use crate::storage::{BlockStore, StateStorage};
use ledger_types::{Block, StateKey, StateRecord};
use sled::Db;
use std::path::Path;

/// Persistent store backing both `StateStorage` and `BlockStore`.
pub struct SledStore {
    /// Sled database instance
    _db: Db,
    /// Contract state tree, keyed by borsh-encoded `StateKey`
    state: sled::Tree,
    /// Block tree, keyed by big-endian height for ordered iteration
    blocks: sled::Tree,
}

impl SledStore {
    /// Open or create a persistent store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(&path)?;
        let state = db.open_tree("state")?;
        let blocks = db.open_tree("blocks")?;
        Ok(Self {
            _db: db,
            state,
            blocks,
        })
    }

    fn encode_state_key(key: &StateKey) -> Vec<u8> {
        borsh::to_vec(key).expect("state key serialization should not fail")
    }
}

impl StateStorage for SledStore {
    fn read_key(&self, key: &StateKey) -> anyhow::Result<Option<Vec<u8>>> {
        let stored = self.state.get(Self::encode_state_key(key))?;
        Ok(stored.map(|v| v.to_vec()))
    }

    fn write_records(&self, records: &[StateRecord]) -> anyhow::Result<()> {
        let mut batch = sled::Batch::default();
        for record in records {
            batch.insert(Self::encode_state_key(&record.state_key()), record.value.clone());
        }
        self.state.apply_batch(batch)?;
        self.state.flush()?;
        Ok(())
    }
}

impl BlockStore for SledStore {
    fn put_block(&self, block: &Block) -> anyhow::Result<()> {
        self.blocks
            .insert(block.height().to_be_bytes(), block.to_bytes())?;
        self.blocks.flush()?;
        Ok(())
    }

    fn last_block(&self) -> anyhow::Result<Option<Block>> {
        match self.blocks.last()? {
            Some((_, bytes)) => Ok(Some(Block::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn block_at(&self, height: u64) -> anyhow::Result<Option<Block>> {
        match self.blocks.get(height.to_be_bytes())? {
            Some(bytes) => Ok(Some(Block::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_types::{BlockBody, BlockHash, BlockHeader, ContractAddress};

    fn block_at_height(height: u64) -> Block {
        Block {
            header: BlockHeader {
                height,
                prev_block_hash: BlockHash::ZERO,
                timestamp: 0,
            },
            body: BlockBody {
                transactions: vec![],
            },
        }
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = StateKey::new(ContractAddress::new("token"), "k1");

        {
            let store = SledStore::open(dir.path()).unwrap();
            store
                .write_records(&[StateRecord {
                    contract: ContractAddress::new("token"),
                    key: "k1".to_string(),
                    value: b"v1".to_vec(),
                }])
                .unwrap();
        }

        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.read_key(&key).unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn test_last_block_orders_by_height() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        // Heights past one byte check the big-endian key encoding
        for height in [1u64, 2, 300] {
            store.put_block(&block_at_height(height)).unwrap();
        }
        assert_eq!(store.last_block().unwrap().unwrap().height(), 300);
        assert_eq!(store.block_at(2).unwrap().unwrap().height(), 2);
    }
}
