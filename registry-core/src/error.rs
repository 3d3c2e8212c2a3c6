//! Error types for the registry core

use crate::types::TailsHash;
use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Tails integrity failures
///
/// A mismatch is a content failure, never a transient one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// Computed digest differs from the digest in the registry definition
    #[error("Tails hash mismatch: computed {computed}, expected {expected}")]
    HashMismatch {
        /// Digest of the downloaded content
        computed: TailsHash,
        /// Digest published on the ledger
        expected: TailsHash,
    },
}

/// Core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Tails integrity failure
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Digest is not valid base-58 or has the wrong length
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// Credential index could not be parsed
    #[error("Invalid credential index: {0}")]
    InvalidIndex(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
