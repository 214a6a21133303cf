//! In-memory chain store
//!
//! Same contract as [`crate::storage::RocksStore`], held in process memory
//! behind a single lock so a seal commit is one atomic write.

use crate::{
    error::Result,
    storage::{ChainStore, StorageStats},
    types::{Block, Hash256, PartitionKey, Transaction},
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    transactions: HashMap<Uuid, Transaction>,
    blocks: BTreeMap<(PartitionKey, u64), Block>,
    block_index: HashMap<Hash256, (PartitionKey, u64)>,
    pending: BTreeMap<PartitionKey, BTreeSet<Uuid>>,
    partitions: BTreeSet<PartitionKey>,
}

/// Process-memory chain store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn partition_range<'a>(
        tables: &'a Tables,
        partition: &PartitionKey,
    ) -> impl Iterator<Item = &'a Block> + 'a {
        let start = (partition.clone(), 0u64);
        let end = (partition.clone(), u64::MAX);
        tables.blocks.range(start..=end).map(|(_, block)| block)
    }
}

impl ChainStore for MemoryStore {
    fn stage_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut tables = self.tables.write();
        tables.transactions.insert(tx.id, tx.clone());
        tables
            .pending
            .entry(tx.partition_key.clone())
            .or_default()
            .insert(tx.id);
        tables.partitions.insert(tx.partition_key.clone());
        Ok(())
    }

    fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.tables.read().transactions.get(&id).cloned())
    }

    fn pending_transactions(&self, partition: &PartitionKey) -> Result<Vec<Transaction>> {
        let tables = self.tables.read();
        let mut pending: Vec<Transaction> = tables
            .pending
            .get(partition)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.transactions.get(id).cloned())
            .collect();
        pending.sort_by_key(|tx| (tx.timestamp_nanos, tx.id));
        Ok(pending)
    }

    fn commit_seal(&self, block: &Block, sealed: &[Transaction]) -> Result<()> {
        let mut tables = self.tables.write();
        let key = (block.partition_key.clone(), block.index);

        tables.block_index.insert(block.block_hash, key.clone());
        tables.blocks.insert(key, block.clone());

        for tx in sealed {
            if let Some(open) = tables.pending.get_mut(&tx.partition_key) {
                open.remove(&tx.id);
            }
            tables.transactions.insert(tx.id, tx.clone());
        }
        Ok(())
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>> {
        let tables = self.tables.read();
        Ok(tables
            .block_index
            .get(hash)
            .and_then(|key| tables.blocks.get(key))
            .filter(|block| &block.block_hash == hash)
            .cloned())
    }

    fn get_block_at(&self, partition: &PartitionKey, index: u64) -> Result<Option<Block>> {
        Ok(self
            .tables
            .read()
            .blocks
            .get(&(partition.clone(), index))
            .cloned())
    }

    fn latest_block(&self, partition: &PartitionKey) -> Result<Option<Block>> {
        let tables = self.tables.read();
        Ok(Self::partition_range(&tables, partition).last().cloned())
    }

    fn list_blocks(&self, partition: &PartitionKey) -> Result<Vec<Block>> {
        let tables = self.tables.read();
        Ok(Self::partition_range(&tables, partition).cloned().collect())
    }

    fn partitions(&self) -> Result<Vec<PartitionKey>> {
        Ok(self.tables.read().partitions.iter().cloned().collect())
    }

    fn put_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut tables = self.tables.write();
        tables.transactions.insert(tx.id, tx.clone());
        tables.partitions.insert(tx.partition_key.clone());
        Ok(())
    }

    fn put_block(&self, block: &Block) -> Result<()> {
        let mut tables = self.tables.write();
        let key = (block.partition_key.clone(), block.index);
        tables.block_index.insert(block.block_hash, key.clone());
        tables.blocks.insert(key, block.clone());
        Ok(())
    }

    fn stats(&self) -> Result<StorageStats> {
        let tables = self.tables.read();
        Ok(StorageStats {
            total_transactions: tables.transactions.len() as u64,
            total_blocks: tables.blocks.len() as u64,
            total_partitions: tables.partitions.len() as u64,
        })
    }
}
