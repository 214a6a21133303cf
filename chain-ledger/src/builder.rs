//! Transaction record builder
//!
//! Turns caller-supplied event data into a hashed, Pending [`Transaction`].
//! Building never touches the ledger, so callers can show the content hash
//! before committing.

use crate::crypto::generate_uuid_v7;
use crate::types::{PartitionKey, Payload, Transaction, TransactionKind, TransactionStatus};
use crate::{Error, Result};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;

/// Per-partition clock that never repeats or goes backwards
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: DashMap<PartitionKey, i64>,
}

impl MonotonicClock {
    /// Create new clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp (nanoseconds) for the partition: `max(now, last + 1)`
    pub fn next(&self, partition: &PartitionKey) -> i64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let mut last = self.last.entry(partition.clone()).or_insert(i64::MIN);
        let ts = now.max(last.saturating_add(1));
        *last = ts;
        ts
    }

    /// Raise the partition's floor so later timestamps come after `timestamp`
    pub fn observe(&self, partition: &PartitionKey, timestamp: i64) {
        let mut last = self.last.entry(partition.clone()).or_insert(i64::MIN);
        *last = (*last).max(timestamp);
    }

    /// Whether this clock has issued or observed a timestamp for the partition
    pub fn tracks(&self, partition: &PartitionKey) -> bool {
        self.last.contains_key(partition)
    }
}

/// Builds Pending transactions with computed content hashes
///
/// Timestamps are monotonic per partition only among transactions built by
/// the same builder. A fresh builder knows nothing of what is already stored,
/// so [`Ledger::record`](crate::Ledger::record) seeds the ledger's builder
/// from storage before building.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    clock: MonotonicClock,
}

impl TransactionBuilder {
    /// Create new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the partition's clock floor to an already-recorded timestamp
    pub fn observe(&self, partition: &PartitionKey, timestamp_nanos: i64) {
        self.clock.observe(partition, timestamp_nanos);
    }

    /// Whether the partition's clock has been seeded or used
    pub fn tracks(&self, partition: &PartitionKey) -> bool {
        self.clock.tracks(partition)
    }

    /// Build a Pending transaction
    ///
    /// Fails with [`Error::InvalidInput`] before any hashing if a required
    /// field is blank.
    pub fn build(
        &self,
        kind: TransactionKind,
        subject_ref: impl Into<String>,
        partition_key: impl Into<PartitionKey>,
        amount: Decimal,
        external_ref: impl Into<String>,
        payload: Payload,
    ) -> Result<Transaction> {
        let subject_ref = subject_ref.into();
        let partition_key = partition_key.into();
        let external_ref = external_ref.into();

        validate_fields(&kind, &subject_ref, &partition_key, &external_ref, &payload)?;

        let mut tx = Transaction {
            id: generate_uuid_v7(),
            kind,
            subject_ref,
            timestamp_nanos: self.clock.next(&partition_key),
            partition_key,
            amount,
            external_ref,
            payload,
            content_hash: Default::default(),
            block_ref: None,
            status: TransactionStatus::Pending,
        };
        tx.content_hash = tx.compute_content_hash();

        tracing::debug!(
            transaction_id = %tx.id,
            partition = %tx.partition_key,
            kind = %tx.kind,
            content_hash = %tx.content_hash,
            "Transaction built"
        );

        Ok(tx)
    }
}

/// Field rules shared by the builder and ledger submission
pub(crate) fn validate_fields(
    kind: &TransactionKind,
    subject_ref: &str,
    partition_key: &PartitionKey,
    external_ref: &str,
    payload: &Payload,
) -> Result<()> {
    if kind.code().trim().is_empty() {
        return Err(Error::invalid("kind must not be empty"));
    }
    if subject_ref.trim().is_empty() {
        return Err(Error::invalid("subject_ref must not be empty"));
    }
    if partition_key.as_str().trim().is_empty() {
        return Err(Error::invalid("partition_key must not be empty"));
    }
    if external_ref.trim().is_empty() {
        return Err(Error::invalid("external_ref must not be empty"));
    }
    if payload.fields.keys().any(|k| k.trim().is_empty()) {
        return Err(Error::invalid("payload field names must not be empty"));
    }
    Ok(())
}

/// Checks a submitted transaction has well-formed fields
pub(crate) fn validate_submission(tx: &Transaction) -> Result<()> {
    validate_fields(
        &tx.kind,
        &tx.subject_ref,
        &tx.partition_key,
        &tx.external_ref,
        &tx.payload,
    )
}

/// Checks a transaction with an unseen id can be staged: still Pending and
/// carrying the hash of its own fields.
///
/// Only applies to new ids. A known id is answered with the stored copy
/// before this runs.
pub(crate) fn validate_pending(tx: &Transaction) -> Result<()> {
    if tx.status != TransactionStatus::Pending || tx.block_ref.is_some() {
        return Err(Error::invalid(format!(
            "transaction {} is already sealed",
            tx.id
        )));
    }

    if !tx.has_valid_content_hash() {
        return Err(Error::invalid(format!(
            "transaction {} content hash does not match its fields",
            tx.id
        )));
    }

    Ok(())
}
