//! Canonical serialization for cryptographic hashing
//!
//! Ensures deterministic byte representation for content and block hashes.
//! Uses fixed field order, big-endian fixed-width integers, length-prefixed
//! strings, normalized decimals, and sorted payload keys.
//!
//! Write-time hashing (builder, sealing) and verify-time hashing both go
//! through [`transaction_bytes`] and [`block_bytes`]; nothing else in the
//! crate encodes these records for hashing.

use crate::types::{Hash256, Payload, PayloadValue, Transaction};
use rust_decimal::Decimal;

/// Domain tag prefixed to every transaction encoding
const TRANSACTION_DOMAIN: &[u8] = b"chain-ledger/transaction/v1";

/// Domain tag prefixed to every block encoding
const BLOCK_DOMAIN: &[u8] = b"chain-ledger/block/v1";

// Payload value type tags
const TAG_TEXT: u8 = 1;
const TAG_INTEGER: u8 = 2;
const TAG_DECIMAL: u8 = 3;
const TAG_BOOL: u8 = 4;
const TAG_TIMESTAMP: u8 = 5;

/// Canonical serializer
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create new encoder
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Write raw bytes (no length prefix)
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Write u8
    pub fn write_u8(&mut self, n: u8) {
        self.buffer.push(n);
    }

    /// Write u16 (big-endian)
    pub fn write_u16(&mut self, n: u16) {
        self.write_raw(&n.to_be_bytes());
    }

    /// Write u64 (big-endian)
    pub fn write_u64(&mut self, n: u64) {
        self.write_raw(&n.to_be_bytes());
    }

    /// Write i64 (big-endian)
    pub fn write_i64(&mut self, n: i64) {
        self.write_raw(&n.to_be_bytes());
    }

    /// Write string (u64 length prefix)
    pub fn write_string(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.write_raw(s.as_bytes());
    }

    /// Write decimal as normalized string, so `100` and `100.00` encode
    /// identically and `-0` encodes as `0`
    ///
    /// Hashes therefore bind the numeric value, not its scale. A stored
    /// amount rewritten from `100` to `100.00` still verifies; any change
    /// of value does not.
    pub fn write_decimal(&mut self, d: &Decimal) {
        self.write_string(&d.normalize().to_string());
    }

    /// Write 32-byte digest
    pub fn write_digest(&mut self, digest: &Hash256) {
        self.write_raw(digest.as_bytes());
    }

    /// Write payload: version, field count, then fields in key order
    pub fn write_payload(&mut self, payload: &Payload) {
        self.write_u16(payload.version);
        self.write_u64(payload.fields.len() as u64);
        for (key, value) in &payload.fields {
            self.write_string(key);
            self.write_payload_value(value);
        }
    }

    fn write_payload_value(&mut self, value: &PayloadValue) {
        match value {
            PayloadValue::Text(s) => {
                self.write_u8(TAG_TEXT);
                self.write_string(s);
            }
            PayloadValue::Integer(n) => {
                self.write_u8(TAG_INTEGER);
                self.write_i64(*n);
            }
            PayloadValue::Decimal(d) => {
                self.write_u8(TAG_DECIMAL);
                self.write_decimal(d);
            }
            PayloadValue::Bool(b) => {
                self.write_u8(TAG_BOOL);
                self.write_u8(u8::from(*b));
            }
            PayloadValue::Timestamp(ts) => {
                self.write_u8(TAG_TIMESTAMP);
                self.write_i64(*ts);
            }
        }
    }

    /// Finalize and return bytes
    pub fn finalize(self) -> Vec<u8> {
        self.buffer
    }
}

/// Canonical bytes of a transaction's hashed fields
///
/// Order: kind, subject, partition, amount, external ref, payload, timestamp.
/// `id`, `content_hash`, `block_ref` and `status` are not hashed.
pub fn transaction_bytes(tx: &Transaction) -> Vec<u8> {
    let mut enc = CanonicalEncoder::new();
    enc.write_raw(TRANSACTION_DOMAIN);
    enc.write_string(tx.kind.code());
    enc.write_string(&tx.subject_ref);
    enc.write_string(tx.partition_key.as_str());
    enc.write_decimal(&tx.amount);
    enc.write_string(&tx.external_ref);
    enc.write_payload(&tx.payload);
    enc.write_i64(tx.timestamp_nanos);
    enc.finalize()
}

/// Canonical bytes of a block's hashed fields
///
/// Content hashes are sorted, so the result does not depend on staging order.
pub fn block_bytes(
    content_hashes: &[Hash256],
    previous_block_hash: &Hash256,
    sealed_at_nanos: i64,
) -> Vec<u8> {
    let mut sorted = content_hashes.to_vec();
    sorted.sort_unstable();

    let mut enc = CanonicalEncoder::new();
    enc.write_raw(BLOCK_DOMAIN);
    enc.write_u64(sorted.len() as u64);
    for hash in &sorted {
        enc.write_digest(hash);
    }
    enc.write_digest(previous_block_hash);
    enc.write_i64(sealed_at_nanos);
    enc.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_normalization() {
        let mut a = CanonicalEncoder::new();
        a.write_decimal(&Decimal::new(10000, 2)); // 100.00
        let mut b = CanonicalEncoder::new();
        b.write_decimal(&Decimal::from(100));
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_string_length_prefix_prevents_concatenation_collisions() {
        let mut a = CanonicalEncoder::new();
        a.write_string("ab");
        a.write_string("c");
        let mut b = CanonicalEncoder::new();
        b.write_string("a");
        b.write_string("bc");
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_payload_value_tags_distinguish_types() {
        let mut a = CanonicalEncoder::new();
        a.write_payload(&Payload::new().with("n", 1i64));
        let mut b = CanonicalEncoder::new();
        b.write_payload(&Payload::new().with("n", PayloadValue::Timestamp(1)));
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_block_bytes_ignore_member_order() {
        let h1 = Hash256::from_bytes([1u8; 32]);
        let h2 = Hash256::from_bytes([2u8; 32]);
        let prev = Hash256::ZERO;
        assert_eq!(block_bytes(&[h1, h2], &prev, 10), block_bytes(&[h2, h1], &prev, 10));
        assert_ne!(block_bytes(&[h1, h2], &prev, 10), block_bytes(&[h1, h2], &prev, 11));
    }
}
