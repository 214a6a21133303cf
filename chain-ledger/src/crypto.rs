//! Cryptographic operations for the ledger
//!
//! This module provides:
//! - SHA-256 hashing for transactions and blocks (over [`crate::canonical`])
//! - Ed25519 seal key generation, signing, and verification

use crate::canonical;
use crate::types::{Hash256, Transaction};
use crate::{Error, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash256::from_bytes(hasher.finalize().into())
}

/// Content hash of a transaction
pub fn hash_transaction(tx: &Transaction) -> Hash256 {
    hash_bytes(&canonical::transaction_bytes(tx))
}

/// Block hash over member content hashes (sorted), previous hash, and seal time
pub fn hash_block(
    content_hashes: &[Hash256],
    previous_block_hash: &Hash256,
    sealed_at_nanos: i64,
) -> Hash256 {
    hash_bytes(&canonical::block_bytes(
        content_hashes,
        previous_block_hash,
        sealed_at_nanos,
    ))
}

/// Ed25519 key pair used to sign sealed block hashes
#[derive(Debug)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_seed(&rand::random::<[u8; 32]>())
    }

    /// Create from seed (32 bytes) - deterministic generation
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create from a 64-character hex seed
    pub fn from_hex_seed(seed_hex: &str) -> Result<Self> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| Error::Signature(format!("Invalid seed hex: {}", e)))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Signature("Seed must be 32 bytes".to_string()))?;
        Ok(Self::from_seed(&seed))
    }

    /// Get public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Parse a hex-encoded Ed25519 public key
pub fn parse_public_key(public_key_hex: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(public_key_hex.trim())
        .map_err(|e| Error::Signature(format!("Invalid public key hex: {}", e)))?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Signature("Public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&key)
        .map_err(|e| Error::Signature(format!("Invalid public key: {}", e)))?;
    Ok(key)
}

/// Verify a signature with a public key
pub fn verify_signature(message: &[u8], signature: &[u8], public_key: &[u8; 32]) -> bool {
    let signature: [u8; 64] = match signature.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let signature = Signature::from_bytes(&signature);

    let verifying_key = match VerifyingKey::from_bytes(public_key) {
        Ok(key) => key,
        Err(_) => return false,
    };

    verifying_key.verify(message, &signature).is_ok()
}

/// Generate a UUIDv7 (time-ordered)
pub fn generate_uuid_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}
