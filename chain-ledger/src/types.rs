//! Core types for the chain ledger
//!
//! All types are designed for:
//! - Deterministic hashing (see [`crate::canonical`])
//! - Exact arithmetic (Decimal for money)
//! - Explicit tenant partitioning (no ambient "current company")

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// 32-byte SHA-256 digest
///
/// Serialized as lowercase hex in human-readable formats (JSON, TOML) and
/// as raw bytes in binary formats (bincode).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// All-zero sentinel used as the genesis block's previous hash
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Wrap raw digest bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a 64-character hex string
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| crate::Error::invalid(format!("invalid hex digest: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| crate::Error::invalid("digest must be 32 bytes"))?;
        Ok(Self(bytes))
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check for the all-zero sentinel
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", &self.to_hex()[..16])
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Hash256::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Hash256)
        }
    }
}

/// Tenant (company) identifier. Each partition owns one independent chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Create new partition key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for PartitionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Financial event type recorded in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Savings deposit
    Deposit,
    /// Savings withdrawal
    Withdrawal,
    /// Share capital / periodic contribution
    Contribution,
    /// Loan released to a member
    LoanDisbursement,
    /// Loan amortization payment
    LoanRepayment,
    /// Member registration, suspension, reinstatement, ...
    MemberStateChange,
    /// Compensating entry correcting an earlier transaction
    Adjustment,
    /// Application-defined event tag
    Custom(String),
}

impl TransactionKind {
    /// Stable tag used in canonical encoding
    pub fn code(&self) -> &str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Contribution => "contribution",
            TransactionKind::LoanDisbursement => "loan_disbursement",
            TransactionKind::LoanRepayment => "loan_repayment",
            TransactionKind::MemberStateChange => "member_state_change",
            TransactionKind::Adjustment => "adjustment",
            TransactionKind::Custom(tag) => tag,
        }
    }

    /// Parse from tag. Unknown tags become [`TransactionKind::Custom`], so a
    /// custom tag can never alias a built-in kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "deposit" => TransactionKind::Deposit,
            "withdrawal" => TransactionKind::Withdrawal,
            "contribution" => TransactionKind::Contribution,
            "loan_disbursement" => TransactionKind::LoanDisbursement,
            "loan_repayment" => TransactionKind::LoanRepayment,
            "member_state_change" => TransactionKind::MemberStateChange,
            "adjustment" => TransactionKind::Adjustment,
            other => TransactionKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Typed payload value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadValue {
    /// UTF-8 text
    Text(String),
    /// Signed integer
    Integer(i64),
    /// Exact decimal (rates, balances)
    Decimal(Decimal),
    /// Boolean flag
    Bool(bool),
    /// Timestamp, nanoseconds since Unix epoch
    Timestamp(i64),
}

impl From<&str> for PayloadValue {
    fn from(v: &str) -> Self {
        PayloadValue::Text(v.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(v: String) -> Self {
        PayloadValue::Text(v)
    }
}

impl From<i64> for PayloadValue {
    fn from(v: i64) -> Self {
        PayloadValue::Integer(v)
    }
}

impl From<Decimal> for PayloadValue {
    fn from(v: Decimal) -> Self {
        PayloadValue::Decimal(v)
    }
}

impl From<bool> for PayloadValue {
    fn from(v: bool) -> Self {
        PayloadValue::Bool(v)
    }
}

/// Additional event fields in a versioned, order-stable map
///
/// Keys are kept sorted (`BTreeMap`) so the canonical encoding never depends
/// on insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Schema version
    pub version: u16,
    /// Fields by name
    pub fields: BTreeMap<String, PayloadValue>,
}

impl Payload {
    /// Current payload schema version
    pub const CURRENT_VERSION: u16 = 1;

    /// Empty payload at the current version
    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Get a field
    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.fields.get(key)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// No fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Staged in the open block
    Pending = 1,
    /// Member of a sealed block
    Sealed = 2,
}

/// Pointer from a sealed transaction to its block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block index within the partition
    pub index: u64,
    /// Block hash at seal time
    pub block_hash: Hash256,
}

/// One financial event mirrored into the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Event type
    pub kind: TransactionKind,

    /// Member or account the event concerns
    pub subject_ref: String,

    /// Tenant partition
    pub partition_key: PartitionKey,

    /// Signed amount (exact decimal)
    pub amount: Decimal,

    /// ID of the originating business record
    pub external_ref: String,

    /// Additional event fields
    pub payload: Payload,

    /// Creation timestamp (nanoseconds since Unix epoch)
    pub timestamp_nanos: i64,

    /// Hash over the canonical encoding of the fields above
    pub content_hash: Hash256,

    /// Block membership (None until sealed)
    pub block_ref: Option<BlockRef>,

    /// Lifecycle status
    pub status: TransactionStatus,
}

impl Transaction {
    /// Recompute the content hash from the stored fields
    pub fn compute_content_hash(&self) -> Hash256 {
        crate::crypto::hash_transaction(self)
    }

    /// Stored content hash matches the stored fields
    pub fn has_valid_content_hash(&self) -> bool {
        self.compute_content_hash() == self.content_hash
    }

    /// Check if sealed into a block
    pub fn is_sealed(&self) -> bool {
        self.status == TransactionStatus::Sealed
    }

    /// Creation time
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.timestamp_nanos)
    }

    /// Copy of this transaction marked as a member of `block_ref`
    pub fn sealed_into(&self, block_ref: BlockRef) -> Transaction {
        let mut sealed = self.clone();
        sealed.status = TransactionStatus::Sealed;
        sealed.block_ref = Some(block_ref);
        sealed
    }
}

/// Block member: transaction ID plus its content hash at seal time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    /// Member transaction
    pub transaction_id: Uuid,
    /// Content hash recorded at seal time
    pub content_hash: Hash256,
}

/// Sealed, hash-linked batch of transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Owning partition
    pub partition_key: PartitionKey,

    /// Sequence number within the partition (genesis = 0)
    pub index: u64,

    /// Hash over sorted member content hashes, previous hash and seal time
    pub block_hash: Hash256,

    /// Hash of the preceding block ([`Hash256::ZERO`] for genesis)
    pub previous_block_hash: Hash256,

    /// Seal timestamp (nanoseconds since Unix epoch)
    pub sealed_at_nanos: i64,

    /// True once sealed
    pub confirmed: bool,

    /// Members in staging order
    pub entries: Vec<BlockEntry>,

    /// Ed25519 signature over `block_hash` (if a seal key is configured)
    #[serde(default)]
    pub seal_signature: Option<Vec<u8>>,
}

impl Block {
    /// Build a confirmed block and compute its hash
    pub fn seal(
        partition_key: PartitionKey,
        index: u64,
        previous_block_hash: Hash256,
        sealed_at_nanos: i64,
        entries: Vec<BlockEntry>,
    ) -> Self {
        let mut block = Self {
            partition_key,
            index,
            block_hash: Hash256::ZERO,
            previous_block_hash,
            sealed_at_nanos,
            confirmed: true,
            entries,
            seal_signature: None,
        };
        block.block_hash = block.compute_hash();
        block
    }

    /// Recompute the block hash from the stored members and previous hash
    pub fn compute_hash(&self) -> Hash256 {
        self.compute_hash_with_previous(&self.previous_block_hash)
    }

    /// Recompute the block hash against an externally supplied previous hash
    pub fn compute_hash_with_previous(&self, previous_block_hash: &Hash256) -> Hash256 {
        let content_hashes: Vec<Hash256> = self.entries.iter().map(|e| e.content_hash).collect();
        crate::crypto::hash_block(&content_hashes, previous_block_hash, self.sealed_at_nanos)
    }

    /// Membership check by transaction ID and content hash
    pub fn contains(&self, transaction_id: Uuid, content_hash: &Hash256) -> bool {
        self.entries
            .iter()
            .any(|e| e.transaction_id == transaction_id && &e.content_hash == content_hash)
    }

    /// Member transaction IDs in staging order
    pub fn transaction_ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|e| e.transaction_id).collect()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No members
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First block of the partition
    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Seal time
    pub fn sealed_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.sealed_at_nanos)
    }

    /// Reference for member transactions
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            index: self.index,
            block_hash: self.block_hash,
        }
    }
}
