//! Actor-based concurrency for the ledger
//!
//! Each partition's chain is owned by one Tokio task:
//! - One writer per partition, so two blocks can never share a parent
//! - Size-triggered sealing runs right after the submit that fills the block
//! - Time-triggered sealing runs off an interval inside the same loop
//! - Bounded mailbox gives backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │          Request handlers (many Tokio tasks)          │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ Ledger::submit / seal_*
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │          PartitionHandle (Clone, one per key)         │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │            PartitionActor (Single Task)               │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ Open block: Vec<Transaction>                   │  │
//! │  │ Full, or older than max age → seal()           │  │
//! │  └────────────────────────────────────────────────┘  │
//! │                       │                               │
//! │                       ▼                               │
//! │             ChainStore::commit_seal()                 │
//! │        (block + members in one atomic write)          │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::builder::validate_pending;
use crate::config::SealingConfig;
use crate::crypto::KeyPair;
use crate::metrics::Metrics;
use crate::storage::ChainStore;
use crate::types::{Block, BlockEntry, Hash256, PartitionKey, Transaction};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Message sent to a partition actor
#[derive(Debug)]
pub enum PartitionMessage {
    /// Stage a Pending transaction, or return the stored copy of a known id
    Submit {
        /// Transaction to stage
        tx: Transaction,
        /// Stored (or sealed) copy
        response: oneshot::Sender<Result<Transaction>>,
    },

    /// Seal if the size or age trigger has fired
    SealIfDue {
        /// Sealed block, if one was due
        response: oneshot::Sender<Result<Option<Block>>>,
    },

    /// Seal the open block if it is non-empty
    SealNow {
        /// Sealed block, or None for an empty open block
        response: oneshot::Sender<Result<Option<Block>>>,
    },

    /// Stop the actor; acked once it has released the store
    Shutdown {
        /// Fired after the actor has dropped its store handle
        ack: oneshot::Sender<()>,
    },
}

/// Chain position and open block of a partition
#[derive(Debug, Clone)]
pub struct PartitionState {
    /// Hash of the last sealed block ([`Hash256::ZERO`] before genesis)
    pub tip: Hash256,

    /// Index the next sealed block will get
    pub next_index: u64,

    /// Seal time of the last block
    pub last_sealed_at_nanos: i64,

    /// Staged transactions in staging order
    pub open: Vec<Transaction>,
}

impl PartitionState {
    /// Rebuild the partition position from storage
    pub fn recover(store: &dyn ChainStore, partition: &PartitionKey) -> Result<Self> {
        let latest = store.latest_block(partition)?;
        let open = store.pending_transactions(partition)?;

        let state = match latest {
            Some(block) => Self {
                tip: block.block_hash,
                next_index: block.index + 1,
                last_sealed_at_nanos: block.sealed_at_nanos,
                open,
            },
            None => Self {
                tip: Hash256::ZERO,
                next_index: 0,
                last_sealed_at_nanos: i64::MIN,
                open,
            },
        };

        tracing::info!(
            partition = %partition,
            tip = %state.tip,
            next_index = state.next_index,
            pending = state.open.len(),
            "Partition recovered"
        );

        Ok(state)
    }
}

/// Actor that owns one partition's chain
pub struct PartitionActor {
    partition: PartitionKey,

    /// Storage backend
    store: Arc<dyn ChainStore>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<PartitionMessage>,

    state: PartitionState,

    /// When the open block received its first transaction
    opened_at: Option<Instant>,

    policy: SealingConfig,

    signer: Option<Arc<KeyPair>>,

    metrics: Metrics,
}

impl std::fmt::Debug for PartitionActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionActor")
            .field("partition", &self.partition)
            .field("tip", &self.state.tip)
            .field("next_index", &self.state.next_index)
            .field("pending", &self.state.open.len())
            .finish()
    }
}

impl PartitionActor {
    /// Create new actor
    pub fn new(
        partition: PartitionKey,
        store: Arc<dyn ChainStore>,
        mailbox: mpsc::Receiver<PartitionMessage>,
        state: PartitionState,
        policy: SealingConfig,
        signer: Option<Arc<KeyPair>>,
        metrics: Metrics,
    ) -> Self {
        // A recovered open block starts ageing from now
        let opened_at = (!state.open.is_empty()).then(Instant::now);
        Self {
            partition,
            store,
            mailbox,
            state,
            opened_at,
            policy,
            signer,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        let mut seal_timer = interval(self.policy.tick_interval());
        seal_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let time_sealing = self.policy.time_sealing_enabled;

        let ack = loop {
            tokio::select! {
                // Process incoming messages
                msg = self.mailbox.recv() => {
                    match msg {
                        Some(PartitionMessage::Shutdown { ack }) => break Some(ack),
                        Some(msg) => self.handle_message(msg),
                        // All handles dropped
                        None => break None,
                    }
                }

                // Age trigger
                _ = seal_timer.tick(), if time_sealing && !self.state.open.is_empty() => {
                    if self.age_due() {
                        if let Err(e) = self.seal() {
                            tracing::error!(
                                partition = %self.partition,
                                error = %e,
                                "Error sealing block on timeout"
                            );
                        }
                    }
                }
            }
        };

        tracing::info!(
            partition = %self.partition,
            pending = self.state.open.len(),
            "Partition actor stopped"
        );

        // Release the store before acking so the caller can reopen it
        drop(self);
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: PartitionMessage) {
        match msg {
            PartitionMessage::Submit { tx, response } => {
                let _ = response.send(self.submit(tx));
            }

            PartitionMessage::SealIfDue { response } => {
                let result = if self.size_due() || self.age_due() {
                    self.seal()
                } else {
                    Ok(None)
                };
                let _ = response.send(result);
            }

            PartitionMessage::SealNow { response } => {
                let _ = response.send(self.seal());
            }

            PartitionMessage::Shutdown { .. } => {
                // Handled in main loop
            }
        }
    }

    fn submit(&mut self, tx: Transaction) -> Result<Transaction> {
        if tx.partition_key != self.partition {
            return Err(Error::invalid(format!(
                "transaction {} belongs to partition {}, not {}",
                tx.id, tx.partition_key, self.partition
            )));
        }

        // Idempotent resubmission
        if let Some(existing) = self.store.get_transaction(tx.id)? {
            tracing::debug!(
                transaction_id = %tx.id,
                partition = %self.partition,
                "Duplicate submission, returning stored transaction"
            );
            self.metrics.record_duplicate();
            return Ok(existing);
        }

        validate_pending(&tx)?;
        self.store.stage_transaction(&tx)?;
        if self.state.open.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.state.open.push(tx.clone());
        self.metrics.record_submission();

        if !self.size_due() {
            return Ok(tx);
        }

        // The transaction is staged either way; a failed seal is retried later
        match self.seal() {
            Ok(Some(block)) => Ok(tx.sealed_into(block.block_ref())),
            Ok(None) => Ok(tx),
            Err(e) => {
                tracing::error!(
                    partition = %self.partition,
                    error = %e,
                    "Error sealing full block"
                );
                Ok(tx)
            }
        }
    }

    fn size_due(&self) -> bool {
        self.state.open.len() >= self.policy.max_block_transactions
    }

    fn age_due(&self) -> bool {
        self.policy.time_sealing_enabled
            && self
                .opened_at
                .is_some_and(|opened| opened.elapsed() >= self.policy.max_block_age())
    }

    /// Seal the open block into the chain
    ///
    /// Chain state only advances once the store has committed the block.
    fn seal(&mut self) -> Result<Option<Block>> {
        if self.state.open.is_empty() {
            return Ok(None);
        }

        let started = std::time::Instant::now();

        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let sealed_at_nanos = now.max(self.state.last_sealed_at_nanos.saturating_add(1));

        let entries: Vec<BlockEntry> = self
            .state
            .open
            .iter()
            .map(|tx| BlockEntry {
                transaction_id: tx.id,
                content_hash: tx.content_hash,
            })
            .collect();

        let mut block = Block::seal(
            self.partition.clone(),
            self.state.next_index,
            self.state.tip,
            sealed_at_nanos,
            entries,
        );

        if let Some(signer) = &self.signer {
            block.seal_signature = Some(signer.sign(block.block_hash.as_bytes()).to_vec());
        }

        let block_ref = block.block_ref();
        let sealed: Vec<Transaction> = self
            .state
            .open
            .iter()
            .map(|tx| tx.sealed_into(block_ref))
            .collect();

        self.store.commit_seal(&block, &sealed)?;

        self.state.tip = block.block_hash;
        self.state.next_index += 1;
        self.state.last_sealed_at_nanos = sealed_at_nanos;
        self.state.open.clear();
        self.opened_at = None;

        self.metrics
            .record_seal(block.len(), started.elapsed().as_secs_f64());

        tracing::info!(
            partition = %self.partition,
            index = block.index,
            block_hash = %block.block_hash,
            previous_block_hash = %block.previous_block_hash,
            transactions = block.len(),
            signed = block.seal_signature.is_some(),
            "Block sealed"
        );

        Ok(Some(block))
    }
}

/// Handle for sending messages to a partition actor
#[derive(Debug, Clone)]
pub struct PartitionHandle {
    partition: PartitionKey,
    sender: mpsc::Sender<PartitionMessage>,
}

impl PartitionHandle {
    /// Create new handle
    pub fn new(partition: PartitionKey, sender: mpsc::Sender<PartitionMessage>) -> Self {
        Self { partition, sender }
    }

    /// Partition served by this handle
    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> PartitionMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Stage a transaction
    pub async fn submit(&self, tx: Transaction) -> Result<Transaction> {
        self.request(|response| PartitionMessage::Submit { tx, response })
            .await
    }

    /// Seal if a trigger has fired
    pub async fn seal_if_due(&self) -> Result<Option<Block>> {
        self.request(|response| PartitionMessage::SealIfDue { response })
            .await
    }

    /// Seal the open block now
    pub async fn seal_now(&self) -> Result<Option<Block>> {
        self.request(|response| PartitionMessage::SealNow { response })
            .await
    }

    /// Shutdown actor and wait until it has stopped
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.sender
            .send(PartitionMessage::Shutdown { ack })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        done.await
            .map_err(|_| Error::Concurrency("Shutdown ack dropped".to_string()))
    }
}

/// Recover a partition from storage and spawn its actor
pub fn spawn_partition_actor(
    partition: PartitionKey,
    store: Arc<dyn ChainStore>,
    policy: SealingConfig,
    mailbox_capacity: usize,
    signer: Option<Arc<KeyPair>>,
    metrics: Metrics,
) -> Result<PartitionHandle> {
    let state = PartitionState::recover(store.as_ref(), &partition)?;
    metrics.record_recovered_pending(state.open.len());

    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = PartitionActor::new(
        partition.clone(),
        store,
        rx,
        state,
        policy,
        signer,
        metrics,
    );

    tokio::spawn(async move {
        actor.run().await;
    });

    Ok(PartitionHandle::new(partition, tx))
}
