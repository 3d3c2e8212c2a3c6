//! Tails integrity verification
//!
//! Tails files are content addressed: the registry definition carries the
//! base-58 encoding of the SHA-256 digest of the file. Material is only usable
//! once the recomputed digest matches that value exactly.

use crate::{types::TailsHash, IntegrityError};
use sha2::{Digest, Sha256};

/// Hash arbitrary bytes using SHA-256
fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Digest of tails content in the ledger's encoding
pub fn tails_digest(material: &[u8]) -> TailsHash {
    TailsHash::from_digest(&hash_bytes(material))
}

/// Compare an already computed digest against the expected one
pub fn check_digest(computed: &TailsHash, expected: &TailsHash) -> Result<(), IntegrityError> {
    if computed != expected {
        tracing::warn!("Tails hash mismatch: {} != {}", computed, expected);
        return Err(IntegrityError::HashMismatch {
            computed: computed.clone(),
            expected: expected.clone(),
        });
    }

    tracing::debug!("Checked tails hash: {}", computed);
    Ok(())
}

/// Verify tails content against the digest in the registry definition
pub fn verify_tails(material: &[u8], expected: &TailsHash) -> Result<(), IntegrityError> {
    check_digest(&tails_digest(material), expected)
}

/// Incremental tails hasher for content that arrives in chunks
#[derive(Debug, Default, Clone)]
pub struct TailsHasher {
    hasher: Sha256,
    len: u64,
}

impl TailsHasher {
    /// Create new hasher
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Bytes hashed so far
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Check if nothing was hashed yet
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finish and encode
    pub fn finalize(self) -> TailsHash {
        let digest: [u8; 32] = self.hasher.finalize().into();
        TailsHash::from_digest(&digest)
    }
}
