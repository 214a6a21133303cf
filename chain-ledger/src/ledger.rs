//! Main ledger orchestration layer
//!
//! This module ties together storage, the partition actors, and the verifier
//! into the high-level API used by request handlers.
//!
//! # Example
//!
//! ```no_run
//! use chain_ledger::{Config, Ledger, PartitionKey, Payload, TransactionKind};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> chain_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!
//!     let tx = ledger
//!         .record(
//!             TransactionKind::Deposit,
//!             "M001",
//!             "COOP-01",
//!             Decimal::new(10000, 2),
//!             "deposit-row-17",
//!             Payload::new(),
//!         )
//!         .await?;
//!
//!     let partition = PartitionKey::new("COOP-01");
//!     ledger.seal_now(&partition).await?;
//!     assert!(ledger.verify_transaction(tx.id)?.valid);
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_partition_actor, PartitionHandle},
    builder::{validate_submission, TransactionBuilder},
    config::{Config, StorageBackend},
    crypto::{parse_public_key, KeyPair},
    memory::MemoryStore,
    metrics::Metrics,
    storage::{ChainStore, RocksStore},
    types::{Block, Hash256, PartitionKey, Payload, Transaction, TransactionKind},
    verify::{ChainVerification, TransactionVerification, Verifier},
    Error, Result,
};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
pub struct Ledger {
    /// Storage shared with the actors (reads go straight here)
    store: Arc<dyn ChainStore>,

    /// One actor per partition, spawned on first use
    partitions: DashMap<PartitionKey, PartitionHandle>,

    builder: TransactionBuilder,

    verifier: Verifier,

    /// Seal key (if configured)
    signer: Option<Arc<KeyPair>>,

    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("service_name", &self.config.service_name)
            .field("backend", &self.config.storage.backend)
            .field("active_partitions", &self.partitions.len())
            .field("signing", &self.signer.is_some())
            .finish()
    }
}

impl Ledger {
    /// Open ledger with the configured storage backend
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn ChainStore> = match config.storage.backend {
            StorageBackend::RocksDb => Arc::new(RocksStore::open(&config.storage)?),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };

        Self::with_store(config, store)
    }

    /// Open ledger over an injected store
    pub fn with_store(config: Config, store: Arc<dyn ChainStore>) -> Result<Self> {
        config.validate()?;

        let signer = config
            .signing
            .seed_hex
            .as_deref()
            .map(KeyPair::from_hex_seed)
            .transpose()?
            .map(Arc::new);

        let verifying_key = match (&config.signing.verifying_key_hex, &signer) {
            (Some(key_hex), _) => Some(parse_public_key(key_hex)?),
            (None, Some(signer)) => Some(signer.public_key()),
            (None, None) => None,
        };

        let verifier = Verifier::new(store.clone(), verifying_key);

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            backend = ?config.storage.backend,
            max_block_transactions = config.sealing.max_block_transactions,
            max_block_age_ms = config.sealing.max_block_age_ms,
            signing = signer.is_some(),
            "Ledger opened"
        );

        Ok(Self {
            store,
            partitions: DashMap::new(),
            builder: TransactionBuilder::new(),
            verifier,
            signer,
            metrics: Metrics::new()?,
            config,
        })
    }

    /// Builder for Pending transactions
    ///
    /// Its clock is seeded from storage the first time [`Ledger::record`]
    /// touches a partition, and advanced past every submitted timestamp.
    pub fn builder(&self) -> &TransactionBuilder {
        &self.builder
    }

    /// Build and submit in one step
    pub async fn record(
        &self,
        kind: TransactionKind,
        subject_ref: impl Into<String>,
        partition_key: impl Into<PartitionKey>,
        amount: Decimal,
        external_ref: impl Into<String>,
        payload: Payload,
    ) -> Result<Transaction> {
        let partition_key = partition_key.into();
        self.seed_clock(&partition_key)?;
        let tx = self
            .builder
            .build(kind, subject_ref, partition_key, amount, external_ref, payload)?;
        self.submit(tx).await
    }

    /// Stage a Pending transaction in its partition's open block
    ///
    /// Resubmitting a known id returns the stored transaction unchanged. If
    /// this submission fills the block, the block is sealed before returning
    /// and the returned transaction is the sealed copy.
    pub async fn submit(&self, tx: Transaction) -> Result<Transaction> {
        validate_submission(&tx)?;
        let handle = self.partition_handle(&tx.partition_key)?;
        let stored = handle.submit(tx).await?;
        self.builder.observe(&stored.partition_key, stored.timestamp_nanos);
        Ok(stored)
    }

    /// Seal the partition's open block if its size or age trigger has fired
    pub async fn seal_if_due(&self, partition: &PartitionKey) -> Result<Option<Block>> {
        self.partition_handle(partition)?.seal_if_due().await
    }

    /// Seal the partition's open block if it is non-empty
    pub async fn seal_now(&self, partition: &PartitionKey) -> Result<Option<Block>> {
        self.partition_handle(partition)?.seal_now().await
    }

    /// Get transaction by ID
    pub fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        self.store.get_transaction(id)
    }

    /// Get block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>> {
        self.store.get_block(hash)
    }

    /// Get block by partition and index
    pub fn get_block_at(&self, partition: &PartitionKey, index: u64) -> Result<Option<Block>> {
        self.store.get_block_at(partition, index)
    }

    /// Sealed blocks of a partition, genesis first
    pub fn list_blocks(&self, partition: &PartitionKey) -> Result<Vec<Block>> {
        self.store.list_blocks(partition)
    }

    /// Hash of the partition's last sealed block ([`Hash256::ZERO`] before genesis)
    pub fn tip(&self, partition: &PartitionKey) -> Result<Hash256> {
        Ok(self
            .store
            .latest_block(partition)?
            .map(|block| block.block_hash)
            .unwrap_or(Hash256::ZERO))
    }

    /// Transactions staged in the partition's open block
    pub fn pending_transactions(&self, partition: &PartitionKey) -> Result<Vec<Transaction>> {
        self.store.pending_transactions(partition)
    }

    /// Member transactions of a block, in staging order
    pub fn block_transactions(&self, hash: &Hash256) -> Result<Vec<Transaction>> {
        let block = self
            .store
            .get_block(hash)?
            .ok_or_else(|| Error::BlockNotFound(hash.to_hex()))?;

        block
            .entries
            .iter()
            .map(|entry| {
                self.store
                    .get_transaction(entry.transaction_id)?
                    .ok_or_else(|| Error::TransactionNotFound(entry.transaction_id.to_string()))
            })
            .collect()
    }

    /// Every partition with at least one recorded transaction
    pub fn partitions(&self) -> Result<Vec<PartitionKey>> {
        self.store.partitions()
    }

    /// Verify one transaction against its stored fields and block
    pub fn verify_transaction(&self, id: Uuid) -> Result<TransactionVerification> {
        let report = self.verifier.verify_transaction(id)?;
        if !report.valid {
            self.metrics.record_violation();
        }
        Ok(report)
    }

    /// Verify a partition's whole chain
    pub fn verify_chain(&self, partition: &PartitionKey) -> Result<ChainVerification> {
        let report = self.verifier.verify_chain(partition)?;
        if !report.valid {
            self.metrics.record_violation();
        }
        Ok(report)
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop every partition actor and release the store
    ///
    /// Open blocks stay pending in storage and are recovered on next open.
    pub async fn shutdown(self) -> Result<()> {
        let handles: Vec<PartitionHandle> = self
            .partitions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for handle in &handles {
            if let Err(e) = handle.shutdown().await {
                tracing::warn!(
                    partition = %handle.partition(),
                    error = %e,
                    "Partition actor already stopped"
                );
            }
        }

        tracing::info!(partitions = handles.len(), "Ledger shut down");
        Ok(())
    }

    /// Start the builder's clock for a partition after its latest stored timestamp
    fn seed_clock(&self, partition: &PartitionKey) -> Result<()> {
        if self.builder.tracks(partition) {
            return Ok(());
        }

        let mut last = self
            .store
            .pending_transactions(partition)?
            .iter()
            .map(|tx| tx.timestamp_nanos)
            .max();
        if let Some(block) = self.store.latest_block(partition)? {
            for entry in &block.entries {
                if let Some(tx) = self.store.get_transaction(entry.transaction_id)? {
                    last = last.max(Some(tx.timestamp_nanos));
                }
            }
        }

        if let Some(last) = last {
            self.builder.observe(partition, last);
        }
        Ok(())
    }

    fn partition_handle(&self, partition: &PartitionKey) -> Result<PartitionHandle> {
        if partition.as_str().trim().is_empty() {
            return Err(Error::invalid("partition_key must not be empty"));
        }

        if let Some(handle) = self.partitions.get(partition) {
            return Ok(handle.clone());
        }

        let handle = self
            .partitions
            .entry(partition.clone())
            .or_try_insert_with(|| {
                spawn_partition_actor(
                    partition.clone(),
                    self.store.clone(),
                    self.config.sealing.clone(),
                    self.config.actor.mailbox_capacity,
                    self.signer.clone(),
                    self.metrics.clone(),
                )
            })?
            .clone();

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionStatus;

    fn memory_config(max_block_transactions: usize) -> Config {
        let mut config = Config::in_memory();
        config.sealing.max_block_transactions = max_block_transactions;
        config.sealing.time_sealing_enabled = false;
        config
    }

    #[tokio::test]
    async fn test_record_and_get() {
        let ledger = Ledger::open(memory_config(10)).unwrap();
        let tx = ledger
            .record(
                TransactionKind::Deposit,
                "M001",
                "COOP-01",
                Decimal::from(100),
                "row-1",
                Payload::new(),
            )
            .await
            .unwrap();

        let stored = ledger.get_transaction(tx.id).unwrap().unwrap();
        assert_eq!(stored, tx);
        assert_eq!(ledger.pending_transactions(&tx.partition_key).unwrap().len(), 1);
        assert_eq!(ledger.tip(&tx.partition_key).unwrap(), Hash256::ZERO);
        assert_eq!(ledger.metrics().transactions_submitted.get(), 1);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_rejects_tampered_transaction() {
        let ledger = Ledger::open(memory_config(10)).unwrap();
        let mut tx = ledger
            .builder()
            .build(
                TransactionKind::Withdrawal,
                "M001",
                "COOP-01",
                Decimal::from(-50),
                "row-2",
                Payload::new(),
            )
            .unwrap();
        tx.amount = Decimal::from(-5000);

        assert!(matches!(ledger.submit(tx).await, Err(Error::InvalidInput(_))));
        assert!(ledger.partitions().unwrap().is_empty());

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_seal_now_advances_tip() {
        let ledger = Ledger::open(memory_config(10)).unwrap();
        let partition = PartitionKey::new("COOP-01");

        for amount in [100, -50, 25] {
            ledger
                .record(
                    TransactionKind::Contribution,
                    "M001",
                    partition.clone(),
                    Decimal::from(amount),
                    format!("row-{}", amount),
                    Payload::new(),
                )
                .await
                .unwrap();
        }

        let block = ledger.seal_now(&partition).await.unwrap().unwrap();
        assert_eq!(block.index, 0);
        assert_eq!(ledger.tip(&partition).unwrap(), block.block_hash);

        let members = ledger.block_transactions(&block.block_hash).unwrap();
        assert_eq!(members.len(), 3);
        assert!(members.iter().all(|tx| tx.status == TransactionStatus::Sealed));

        assert!(ledger.seal_now(&partition).await.unwrap().is_none());
        assert!(ledger.verify_chain(&partition).unwrap().valid);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_block_transactions_unknown_hash() {
        let ledger = Ledger::open(memory_config(10)).unwrap();
        let result = ledger.block_transactions(&Hash256::from_bytes([1u8; 32]));
        assert!(matches!(result, Err(Error::BlockNotFound(_))));
        assert!(ledger.get_block(&Hash256::ZERO).unwrap().is_none());
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_signing_seed_signs_blocks() {
        let mut config = memory_config(1);
        config.signing.seed_hex = Some(hex::encode([5u8; 32]));
        let ledger = Ledger::open(config).unwrap();

        let tx = ledger
            .record(
                TransactionKind::Deposit,
                "M001",
                "COOP-01",
                Decimal::ONE,
                "row-1",
                Payload::new(),
            )
            .await
            .unwrap();

        let block_ref = tx.block_ref.unwrap();
        let block = ledger.get_block(&block_ref.block_hash).unwrap().unwrap();
        assert!(block.seal_signature.is_some());
        assert!(ledger.verify_chain(&tx.partition_key).unwrap().valid);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_record_timestamps_follow_stored_history() {
        let store: Arc<dyn ChainStore> = Arc::new(MemoryStore::new());
        let partition = PartitionKey::new("COOP-01");

        // History written by an earlier process whose clock ran ahead
        let earlier = TransactionBuilder::new();
        let ahead = chrono::Utc::now().timestamp_nanos_opt().unwrap() + 3_600_000_000_000;
        earlier.observe(&partition, ahead);
        let staged = earlier
            .build(
                TransactionKind::Deposit,
                "M001",
                partition.clone(),
                Decimal::ONE,
                "row-1",
                Payload::new(),
            )
            .unwrap();
        store.stage_transaction(&staged).unwrap();

        let ledger = Ledger::with_store(memory_config(10), store).unwrap();
        let next = ledger
            .record(
                TransactionKind::Deposit,
                "M001",
                partition.clone(),
                Decimal::TWO,
                "row-2",
                Payload::new(),
            )
            .await
            .unwrap();
        assert!(next.timestamp_nanos > staged.timestamp_nanos);

        ledger.shutdown().await.unwrap();
    }

    #[test]
    fn test_open_rejects_bad_seed() {
        let mut config = memory_config(1);
        config.signing.seed_hex = Some("not-hex".to_string());
        assert!(matches!(Ledger::open(config), Err(Error::Signature(_))));
    }
}
