//! Storage layer
//!
//! [`ChainStore`] is the persistence boundary of the ledger. Two backends:
//! [`RocksStore`] (below) and [`crate::memory::MemoryStore`].
//!
//! # Column Families (RocksDB)
//!
//! - `transactions` - Every transaction, pending or sealed (key: id)
//! - `blocks` - Sealed blocks (key: partition || index)
//! - `block_index` - Block hash lookup (key: hash, value: block key)
//! - `pending` - Open-block membership (key: partition || id)
//! - `partitions` - Known partitions (key: partition)

use crate::{
    config::StorageConfig,
    error::{Error, Result},
    types::{Block, Hash256, PartitionKey, Transaction},
};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Persistence boundary of the ledger
///
/// `commit_seal` must be atomic: readers observe either the state before the
/// seal or the state after it, never a mix.
pub trait ChainStore: Send + Sync + 'static {
    /// Persist a pending transaction and add it to its partition's open block
    fn stage_transaction(&self, tx: &Transaction) -> Result<()>;

    /// Get transaction by ID
    fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>>;

    /// Open-block members of a partition, ordered by timestamp
    fn pending_transactions(&self, partition: &PartitionKey) -> Result<Vec<Transaction>>;

    /// Atomically store a sealed block, rewrite its members as sealed, and
    /// remove them from the open block
    fn commit_seal(&self, block: &Block, sealed: &[Transaction]) -> Result<()>;

    /// Get block by hash
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>>;

    /// Get block by partition and index
    fn get_block_at(&self, partition: &PartitionKey, index: u64) -> Result<Option<Block>>;

    /// Highest-index block of a partition
    fn latest_block(&self, partition: &PartitionKey) -> Result<Option<Block>>;

    /// All sealed blocks of a partition, ordered by index
    fn list_blocks(&self, partition: &PartitionKey) -> Result<Vec<Block>>;

    /// Every partition that has staged at least one transaction
    fn partitions(&self) -> Result<Vec<PartitionKey>>;

    /// Raw overwrite of a stored transaction, bypassing the ledger
    fn put_transaction(&self, tx: &Transaction) -> Result<()>;

    /// Raw overwrite of a stored block, bypassing the ledger
    fn put_block(&self, block: &Block) -> Result<()>;

    /// Storage statistics
    fn stats(&self) -> Result<StorageStats>;
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Stored transactions (pending + sealed)
    pub total_transactions: u64,
    /// Stored blocks
    pub total_blocks: u64,
    /// Known partitions
    pub total_partitions: u64,
}

/// Column family names
const CF_TRANSACTIONS: &str = "transactions";
const CF_BLOCKS: &str = "blocks";
const CF_BLOCK_INDEX: &str = "block_index";
const CF_PENDING: &str = "pending";
const CF_PARTITIONS: &str = "partitions";

/// RocksDB-backed chain store
pub struct RocksStore {
    db: DB,
    sync_writes: bool,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_compressed()),
            ColumnFamilyDescriptor::new(CF_BLOCKS, Self::cf_options_compressed()),
            ColumnFamilyDescriptor::new(CF_BLOCK_INDEX, Self::cf_options_lookup()),
            ColumnFamilyDescriptor::new(CF_PENDING, Options::default()),
            ColumnFamilyDescriptor::new(CF_PARTITIONS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB chain store");

        Ok(Self {
            db,
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_compressed() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_lookup() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Hash lookups benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    // Key helpers

    /// Length-prefixed partition, so no partition key is a prefix of another
    fn partition_prefix(partition: &PartitionKey) -> Vec<u8> {
        let bytes = partition.as_str().as_bytes();
        let mut key = Vec::with_capacity(4 + bytes.len() + 16);
        key.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        key.extend_from_slice(bytes);
        key
    }

    fn block_key(partition: &PartitionKey, index: u64) -> Vec<u8> {
        let mut key = Self::partition_prefix(partition);
        key.extend_from_slice(&index.to_be_bytes());
        key
    }

    fn pending_key(partition: &PartitionKey, id: Uuid) -> Vec<u8> {
        let mut key = Self::partition_prefix(partition);
        key.extend_from_slice(id.as_bytes());
        key
    }

    /// Scan every key starting with `prefix`, in key order
    fn scan_prefix(
        &self,
        cf: &Arc<BoundColumnFamily<'_>>,
        prefix: &[u8],
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    fn load_block(&self, key: &[u8]) -> Result<Option<Block>> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self.db.get_cf(&cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn approximate_count(&self, cf: &Arc<BoundColumnFamily<'_>>) -> Result<u64> {
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }
}

impl ChainStore for RocksStore {
    fn stage_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        batch.put_cf(&cf_transactions, tx.id.as_bytes(), bincode::serialize(tx)?);

        let cf_pending = self.cf_handle(CF_PENDING)?;
        batch.put_cf(&cf_pending, Self::pending_key(&tx.partition_key, tx.id), b"");

        let cf_partitions = self.cf_handle(CF_PARTITIONS)?;
        batch.put_cf(&cf_partitions, tx.partition_key.as_str().as_bytes(), b"");

        self.db.write_opt(batch, &self.write_options())?;

        tracing::debug!(
            transaction_id = %tx.id,
            partition = %tx.partition_key,
            "Transaction staged"
        );

        Ok(())
    }

    fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn pending_transactions(&self, partition: &PartitionKey) -> Result<Vec<Transaction>> {
        let cf_pending = self.cf_handle(CF_PENDING)?;
        let prefix = Self::partition_prefix(partition);

        let mut pending = Vec::new();
        for (key, _) in self.scan_prefix(&cf_pending, &prefix)? {
            let id_bytes: [u8; 16] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("Malformed pending key".to_string()))?;
            let id = Uuid::from_bytes(id_bytes);

            let tx = self.get_transaction(id)?.ok_or_else(|| {
                Error::Storage(format!("Pending transaction {} missing from store", id))
            })?;
            pending.push(tx);
        }

        pending.sort_by_key(|tx| (tx.timestamp_nanos, tx.id));
        Ok(pending)
    }

    fn commit_seal(&self, block: &Block, sealed: &[Transaction]) -> Result<()> {
        let mut batch = WriteBatch::default();

        // 1. Block
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let block_key = Self::block_key(&block.partition_key, block.index);
        batch.put_cf(&cf_blocks, &block_key, bincode::serialize(block)?);

        // 2. Hash index
        let cf_index = self.cf_handle(CF_BLOCK_INDEX)?;
        batch.put_cf(&cf_index, block.block_hash.as_bytes(), &block_key);

        // 3. Members: sealed copies replace pending ones
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_pending = self.cf_handle(CF_PENDING)?;
        for tx in sealed {
            batch.put_cf(&cf_transactions, tx.id.as_bytes(), bincode::serialize(tx)?);
            batch.delete_cf(&cf_pending, Self::pending_key(&tx.partition_key, tx.id));
        }

        // Atomic commit
        self.db.write_opt(batch, &self.write_options())?;

        tracing::info!(
            partition = %block.partition_key,
            index = block.index,
            block_hash = %block.block_hash,
            transactions = block.entries.len(),
            "Block committed"
        );

        Ok(())
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>> {
        let cf_index = self.cf_handle(CF_BLOCK_INDEX)?;
        let Some(block_key) = self.db.get_cf(&cf_index, hash.as_bytes())? else {
            return Ok(None);
        };

        // The index can outlive an overwritten block; only return exact matches
        Ok(self
            .load_block(&block_key)?
            .filter(|block| &block.block_hash == hash))
    }

    fn get_block_at(&self, partition: &PartitionKey, index: u64) -> Result<Option<Block>> {
        self.load_block(&Self::block_key(partition, index))
    }

    fn latest_block(&self, partition: &PartitionKey) -> Result<Option<Block>> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let prefix = Self::partition_prefix(partition);

        // Seek to the last possible key of this partition and step back
        let mut upper = prefix.clone();
        upper.extend_from_slice(&u64::MAX.to_be_bytes());

        let mut iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&upper, Direction::Reverse));

        match iter.next() {
            Some(item) => {
                let (key, value) = item?;
                if key.starts_with(&prefix) {
                    Ok(Some(bincode::deserialize(&value)?))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    fn list_blocks(&self, partition: &PartitionKey) -> Result<Vec<Block>> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let prefix = Self::partition_prefix(partition);

        self.scan_prefix(&cf, &prefix)?
            .into_iter()
            .map(|(_, value)| bincode::deserialize(&value).map_err(Error::from))
            .collect()
    }

    fn partitions(&self) -> Result<Vec<PartitionKey>> {
        let cf = self.cf_handle(CF_PARTITIONS)?;
        let mut partitions = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            let name = String::from_utf8(key.to_vec())
                .map_err(|e| Error::Storage(format!("Malformed partition key: {}", e)))?;
            partitions.push(PartitionKey::new(name));
        }
        Ok(partitions)
    }

    fn put_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        batch.put_cf(&cf_transactions, tx.id.as_bytes(), bincode::serialize(tx)?);

        let cf_partitions = self.cf_handle(CF_PARTITIONS)?;
        batch.put_cf(&cf_partitions, tx.partition_key.as_str().as_bytes(), b"");

        self.db.write_opt(batch, &self.write_options())?;

        tracing::warn!(
            transaction_id = %tx.id,
            status = ?tx.status,
            "Transaction overwritten outside the ledger"
        );
        Ok(())
    }

    fn put_block(&self, block: &Block) -> Result<()> {
        let mut batch = WriteBatch::default();

        let block_key = Self::block_key(&block.partition_key, block.index);
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        batch.put_cf(&cf_blocks, &block_key, bincode::serialize(block)?);

        let cf_index = self.cf_handle(CF_BLOCK_INDEX)?;
        batch.put_cf(&cf_index, block.block_hash.as_bytes(), &block_key);

        self.db.write_opt(batch, &self.write_options())?;

        tracing::warn!(
            partition = %block.partition_key,
            index = block.index,
            "Block overwritten outside the ledger"
        );
        Ok(())
    }

    fn stats(&self) -> Result<StorageStats> {
        let total_transactions = self.approximate_count(&self.cf_handle(CF_TRANSACTIONS)?)?;

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let mut total_blocks = 0u64;
        for item in self.db.iterator_cf(&cf_blocks, IteratorMode::Start) {
            item?;
            total_blocks += 1;
        }

        Ok(StorageStats {
            total_transactions,
            total_blocks,
            total_partitions: self.partitions()?.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TransactionBuilder;
    use crate::types::{Payload, TransactionKind};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_store() -> (RocksStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..StorageConfig::default()
        };
        (RocksStore::open(&config).unwrap(), temp_dir)
    }

    fn test_tx(builder: &TransactionBuilder, partition: &str, amount: i64) -> Transaction {
        builder
            .build(
                TransactionKind::Contribution,
                "M001",
                partition,
                Decimal::from(amount),
                format!("contrib-{}", amount),
                Payload::new(),
            )
            .unwrap()
    }

    fn seal(store: &RocksStore, partition: &str, index: u64, prev: Hash256, txs: &[Transaction]) -> Block {
        let entries = txs
            .iter()
            .map(|tx| crate::types::BlockEntry {
                transaction_id: tx.id,
                content_hash: tx.content_hash,
            })
            .collect();
        let block = Block::seal(PartitionKey::new(partition), index, prev, 1_000 + index as i64, entries);
        let sealed: Vec<Transaction> = txs.iter().map(|tx| tx.sealed_into(block.block_ref())).collect();
        store.commit_seal(&block, &sealed).unwrap();
        block
    }

    #[test]
    fn test_stage_and_get_transaction() {
        let (store, _temp) = test_store();
        let builder = TransactionBuilder::new();
        let tx = test_tx(&builder, "COOP-01", 100);

        store.stage_transaction(&tx).unwrap();

        let retrieved = store.get_transaction(tx.id).unwrap().unwrap();
        assert_eq!(retrieved, tx);
        assert_eq!(store.pending_transactions(&tx.partition_key).unwrap().len(), 1);
        assert!(store.get_transaction(Uuid::now_v7()).unwrap().is_none());
    }

    #[test]
    fn test_commit_seal_moves_pending_to_block() {
        let (store, _temp) = test_store();
        let builder = TransactionBuilder::new();
        let txs: Vec<Transaction> = (1..=3).map(|i| test_tx(&builder, "COOP-01", i)).collect();
        for tx in &txs {
            store.stage_transaction(tx).unwrap();
        }

        let block = seal(&store, "COOP-01", 0, Hash256::ZERO, &txs);
        let partition = PartitionKey::new("COOP-01");

        assert!(store.pending_transactions(&partition).unwrap().is_empty());
        assert_eq!(store.get_block(&block.block_hash).unwrap().unwrap(), block);
        assert_eq!(store.get_block_at(&partition, 0).unwrap().unwrap(), block);
        for tx in &txs {
            let stored = store.get_transaction(tx.id).unwrap().unwrap();
            assert!(stored.is_sealed());
            assert_eq!(stored.block_ref, Some(block.block_ref()));
        }
    }

    #[test]
    fn test_partitions_do_not_share_prefixes() {
        let (store, _temp) = test_store();
        let builder = TransactionBuilder::new();

        let a = test_tx(&builder, "A", 1);
        let ab = test_tx(&builder, "AB", 2);
        store.stage_transaction(&a).unwrap();
        store.stage_transaction(&ab).unwrap();

        let block_a = seal(&store, "A", 0, Hash256::ZERO, &[a]);
        let block_ab = seal(&store, "AB", 0, Hash256::ZERO, &[ab]);

        assert_eq!(store.list_blocks(&PartitionKey::new("A")).unwrap(), vec![block_a.clone()]);
        assert_eq!(store.list_blocks(&PartitionKey::new("AB")).unwrap(), vec![block_ab]);
        assert_eq!(store.latest_block(&PartitionKey::new("A")).unwrap(), Some(block_a));
        assert_eq!(store.partitions().unwrap().len(), 2);
    }

    #[test]
    fn test_latest_block_and_listing_order() {
        let (store, _temp) = test_store();
        let builder = TransactionBuilder::new();
        let partition = PartitionKey::new("COOP-01");

        assert!(store.latest_block(&partition).unwrap().is_none());

        let mut prev = Hash256::ZERO;
        for index in 0..5u64 {
            let tx = test_tx(&builder, "COOP-01", index as i64);
            store.stage_transaction(&tx).unwrap();
            prev = seal(&store, "COOP-01", index, prev, &[tx]).block_hash;
        }

        let blocks = store.list_blocks(&partition).unwrap();
        let indices: Vec<u64> = blocks.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(store.latest_block(&partition).unwrap().unwrap().block_hash, prev);
    }

    #[test]
    fn test_get_block_ignores_stale_index() {
        let (store, _temp) = test_store();
        let builder = TransactionBuilder::new();
        let tx = test_tx(&builder, "COOP-01", 5);
        store.stage_transaction(&tx).unwrap();
        let block = seal(&store, "COOP-01", 0, Hash256::ZERO, &[tx]);

        let mut tampered = block.clone();
        tampered.block_hash = Hash256::from_bytes([9u8; 32]);
        store.put_block(&tampered).unwrap();

        assert!(store.get_block(&block.block_hash).unwrap().is_none());
        assert_eq!(store.get_block(&tampered.block_hash).unwrap(), Some(tampered));
    }

    #[test]
    fn test_reopen_preserves_state() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..StorageConfig::default()
        };
        let builder = TransactionBuilder::new();
        let tx = test_tx(&builder, "COOP-01", 7);

        {
            let store = RocksStore::open(&config).unwrap();
            store.stage_transaction(&tx).unwrap();
        }

        let store = RocksStore::open(&config).unwrap();
        let pending = store.pending_transactions(&tx.partition_key).unwrap();
        assert_eq!(pending, vec![tx]);
        assert_eq!(store.stats().unwrap().total_partitions, 1);
    }
}
