//! Integrity verification
//!
//! Recomputes hashes from committed state and reports the first divergence.
//! A detected divergence is a result, not an error: both reports carry an
//! [`IntegrityViolation`] instead of failing the call.

use crate::crypto::verify_signature;
use crate::storage::ChainStore;
use crate::types::{Block, BlockRef, Hash256, PartitionKey, Transaction, TransactionStatus};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Specific integrity check that failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum IntegrityViolation {
    /// Stored fields no longer hash to the stored (or recorded) content hash
    #[error("content-hash mismatch for transaction {transaction_id}")]
    ContentHashMismatch {
        /// Affected transaction
        transaction_id: Uuid,
        /// Hash the record claims
        expected: Hash256,
        /// Hash of the stored fields
        computed: Hash256,
    },

    /// Recomputed block hash differs from the stored or referenced one
    #[error("block-hash mismatch at index {index}")]
    BlockHashMismatch {
        /// Affected block
        index: u64,
        /// Hash on record
        expected: Hash256,
        /// Hash of the stored members
        computed: Hash256,
    },

    /// Previous-hash pointer does not match the preceding block
    #[error("linkage mismatch at index {index}")]
    LinkageMismatch {
        /// Affected block
        index: u64,
        /// Hash of the preceding block
        expected: Hash256,
        /// Pointer stored in the block
        found: Hash256,
    },

    /// Block sequence skips or repeats an index
    #[error("index gap: expected {expected}, found {found}")]
    IndexGap {
        /// Next index in sequence
        expected: u64,
        /// Index stored in the block
        found: u64,
    },

    /// Transaction and block disagree about membership
    #[error("membership mismatch for transaction {transaction_id} in block {index}")]
    MembershipMismatch {
        /// Affected transaction
        transaction_id: Uuid,
        /// Block it claims or is claimed by
        index: u64,
    },

    /// Block lists a transaction the store does not have
    #[error("transaction {transaction_id} missing from block {index}")]
    TransactionMissing {
        /// Listed transaction
        transaction_id: Uuid,
        /// Listing block
        index: u64,
    },

    /// Sealed transaction points at a block the store does not have
    #[error("block missing for transaction {transaction_id}")]
    BlockMissing {
        /// Affected transaction
        transaction_id: Uuid,
        /// Referenced index, if any
        index: Option<u64>,
    },

    /// Seal signature absent or invalid for the configured verifying key
    #[error("seal signature invalid at index {index}")]
    SignatureInvalid {
        /// Affected block
        index: u64,
    },

    /// Stored block is not marked confirmed
    #[error("block {index} is not confirmed")]
    Unconfirmed {
        /// Affected block
        index: u64,
    },
}

impl IntegrityViolation {
    /// Short human-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            IntegrityViolation::ContentHashMismatch { .. } => "content-hash mismatch",
            IntegrityViolation::BlockHashMismatch { .. } => "block-hash mismatch",
            IntegrityViolation::LinkageMismatch { .. } => "linkage mismatch",
            IntegrityViolation::IndexGap { .. } => "index gap",
            IntegrityViolation::MembershipMismatch { .. } => "membership mismatch",
            IntegrityViolation::TransactionMissing { .. } => "transaction missing",
            IntegrityViolation::BlockMissing { .. } => "block missing",
            IntegrityViolation::SignatureInvalid { .. } => "signature invalid",
            IntegrityViolation::Unconfirmed { .. } => "block unconfirmed",
        }
    }
}

/// Result of verifying one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionVerification {
    /// Verified transaction
    pub transaction_id: Uuid,
    /// All checks passed
    pub valid: bool,
    /// Lifecycle status on record
    pub status: TransactionStatus,
    /// Content hash on record
    pub stored_content_hash: Hash256,
    /// Content hash recomputed from the stored fields
    pub computed_content_hash: Hash256,
    /// Block membership on record
    pub block_ref: Option<BlockRef>,
    /// First failed check
    pub violation: Option<IntegrityViolation>,
}

/// Result of verifying a partition's chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    /// Verified partition
    pub partition_key: PartitionKey,
    /// All checks passed (vacuously true for an empty chain)
    pub valid: bool,
    /// Blocks fully checked before stopping
    pub blocks_checked: u64,
    /// Member transactions checked
    pub transactions_checked: u64,
    /// Index of the first failing block
    pub broken_at_index: Option<u64>,
    /// First failed check
    pub violation: Option<IntegrityViolation>,
    /// Stored hash of the last block walked
    pub tip: Hash256,
}

/// Read-only verifier over committed state
#[derive(Clone)]
pub struct Verifier {
    store: Arc<dyn ChainStore>,
    verifying_key: Option<[u8; 32]>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("verifying_key", &self.verifying_key.map(hex::encode))
            .finish()
    }
}

impl Verifier {
    /// Create verifier; seal signatures are checked only with a verifying key
    pub fn new(store: Arc<dyn ChainStore>, verifying_key: Option<[u8; 32]>) -> Self {
        Self {
            store,
            verifying_key,
        }
    }

    /// Verify one transaction and, if sealed, its block membership
    pub fn verify_transaction(&self, id: Uuid) -> Result<TransactionVerification> {
        let tx = self
            .store
            .get_transaction(id)?
            .ok_or_else(|| Error::TransactionNotFound(id.to_string()))?;

        let computed = tx.compute_content_hash();
        let violation = self.check_transaction(&tx, &computed)?;

        if let Some(violation) = &violation {
            tracing::warn!(
                transaction_id = %id,
                partition = %tx.partition_key,
                reason = violation.reason(),
                "Transaction failed verification"
            );
        }

        Ok(TransactionVerification {
            transaction_id: id,
            valid: violation.is_none(),
            status: tx.status,
            stored_content_hash: tx.content_hash,
            computed_content_hash: computed,
            block_ref: tx.block_ref,
            violation,
        })
    }

    fn check_transaction(
        &self,
        tx: &Transaction,
        computed: &Hash256,
    ) -> Result<Option<IntegrityViolation>> {
        if computed != &tx.content_hash {
            return Ok(Some(IntegrityViolation::ContentHashMismatch {
                transaction_id: tx.id,
                expected: tx.content_hash,
                computed: *computed,
            }));
        }

        let block_ref = match (tx.status, tx.block_ref) {
            (_, Some(block_ref)) => block_ref,
            (TransactionStatus::Pending, None) => return Ok(None),
            (TransactionStatus::Sealed, None) => {
                return Ok(Some(IntegrityViolation::BlockMissing {
                    transaction_id: tx.id,
                    index: None,
                }))
            }
        };

        let Some(block) = self.store.get_block_at(&tx.partition_key, block_ref.index)? else {
            return Ok(Some(IntegrityViolation::BlockMissing {
                transaction_id: tx.id,
                index: Some(block_ref.index),
            }));
        };

        let block_hash = block.compute_hash();
        if block_hash != block.block_hash || block.block_hash != block_ref.block_hash {
            return Ok(Some(IntegrityViolation::BlockHashMismatch {
                index: block.index,
                expected: block_ref.block_hash,
                computed: block_hash,
            }));
        }

        if !block.contains(tx.id, &tx.content_hash) || tx.status != TransactionStatus::Sealed {
            return Ok(Some(IntegrityViolation::MembershipMismatch {
                transaction_id: tx.id,
                index: block.index,
            }));
        }

        Ok(None)
    }

    /// Walk a partition's chain from genesis and stop at the first failing block
    pub fn verify_chain(&self, partition: &PartitionKey) -> Result<ChainVerification> {
        let blocks = self.store.list_blocks(partition)?;

        let mut report = ChainVerification {
            partition_key: partition.clone(),
            valid: true,
            blocks_checked: 0,
            transactions_checked: 0,
            broken_at_index: None,
            violation: None,
            tip: Hash256::ZERO,
        };

        let mut previous = Hash256::ZERO;
        for (position, block) in blocks.iter().enumerate() {
            if let Some(violation) = self.check_block(block, position as u64, &previous, &mut report)? {
                tracing::warn!(
                    partition = %partition,
                    index = block.index,
                    reason = violation.reason(),
                    "Chain failed verification"
                );
                report.valid = false;
                report.broken_at_index = Some(position as u64);
                report.violation = Some(violation);
                return Ok(report);
            }

            report.blocks_checked += 1;
            report.tip = block.block_hash;
            previous = block.block_hash;
        }

        tracing::debug!(
            partition = %partition,
            blocks = report.blocks_checked,
            transactions = report.transactions_checked,
            "Chain verified"
        );

        Ok(report)
    }

    fn check_block(
        &self,
        block: &Block,
        position: u64,
        previous: &Hash256,
        report: &mut ChainVerification,
    ) -> Result<Option<IntegrityViolation>> {
        let index = block.index;

        if index != position {
            return Ok(Some(IntegrityViolation::IndexGap {
                expected: position,
                found: index,
            }));
        }

        if !block.confirmed {
            return Ok(Some(IntegrityViolation::Unconfirmed { index }));
        }

        if &block.previous_block_hash != previous {
            return Ok(Some(IntegrityViolation::LinkageMismatch {
                index,
                expected: *previous,
                found: block.previous_block_hash,
            }));
        }

        let computed = block.compute_hash_with_previous(previous);
        if computed != block.block_hash {
            return Ok(Some(IntegrityViolation::BlockHashMismatch {
                index,
                expected: block.block_hash,
                computed,
            }));
        }

        for entry in &block.entries {
            let Some(tx) = self.store.get_transaction(entry.transaction_id)? else {
                return Ok(Some(IntegrityViolation::TransactionMissing {
                    transaction_id: entry.transaction_id,
                    index,
                }));
            };
            report.transactions_checked += 1;

            let content_hash = tx.compute_content_hash();
            if content_hash != entry.content_hash {
                return Ok(Some(IntegrityViolation::ContentHashMismatch {
                    transaction_id: tx.id,
                    expected: entry.content_hash,
                    computed: content_hash,
                }));
            }

            if tx.id != entry.transaction_id
                || tx.status != TransactionStatus::Sealed
                || tx.block_ref != Some(block.block_ref())
                || tx.partition_key != block.partition_key
            {
                return Ok(Some(IntegrityViolation::MembershipMismatch {
                    transaction_id: tx.id,
                    index,
                }));
            }
        }

        if let Some(public_key) = &self.verifying_key {
            let signed = block
                .seal_signature
                .as_deref()
                .is_some_and(|sig| verify_signature(block.block_hash.as_bytes(), sig, public_key));
            if !signed {
                return Ok(Some(IntegrityViolation::SignatureInvalid { index }));
            }
        }

        Ok(None)
    }
}
