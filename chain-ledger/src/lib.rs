//! Chain Ledger
//!
//! Tamper-evident transaction ledger for a cooperative-finance back office.
//! Financial events are hashed, staged per tenant partition, sealed into
//! hash-linked blocks, and can be re-verified at any time.
//!
//! # Architecture
//!
//! - **Canonical Hashing**: One byte encoding shared by write and verify paths
//! - **Single Writer per Partition**: One actor owns each chain, so no forks
//! - **Atomic Seals**: A block and its members commit in one write
//! - **Read-only Verification**: Divergences are reported, never repaired
//!
//! # Invariants
//!
//! - Content integrity: stored fields re-hash to the stored content hash
//! - Block integrity: member hashes and parent re-hash to the block hash
//! - Chain linkage: each block points at its predecessor's stored hash
//! - Append-only: sealed blocks and transactions are never rewritten

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod builder;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod verify;

// Re-exports
pub use builder::TransactionBuilder;
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use memory::MemoryStore;
pub use storage::{ChainStore, RocksStore};
pub use types::{
    Block, BlockEntry, BlockRef, Hash256, PartitionKey, Payload, PayloadValue, Transaction,
    TransactionKind, TransactionStatus,
};
pub use verify::{ChainVerification, IntegrityViolation, TransactionVerification};
