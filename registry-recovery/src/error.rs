//! Error types for registry recovery
//!
//! Every failure is terminal for the current run. Nothing here is retried;
//! errors carry the identifiers a caller needs to decide on retry or
//! escalation.

use registry_core::{IntegrityError, RegistryId};
use std::fmt;
use thiserror::Error;

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger object that was looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerObject {
    /// Revocation registry definition
    RegistryDefinition,
    /// Revocation registry delta / accumulator state
    RegistryDelta,
}

impl fmt::Display for LedgerObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerObject::RegistryDefinition => write!(f, "registry definition"),
            LedgerObject::RegistryDelta => write!(f, "registry delta"),
        }
    }
}

/// Accumulator update failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// Registry math rejected the inputs or failed to run
    #[error("Accumulator update failed for {registry_id}: {reason}")]
    ComputationFailed {
        /// Registry ID
        registry_id: RegistryId,
        /// Failure reported by the math capability
        reason: String,
    },

    /// Applicator invoked without indexes to revoke
    #[error("No indexes to revoke for {registry_id}")]
    NoAdditions {
        /// Registry ID
        registry_id: RegistryId,
    },
}

/// Recovery errors
#[derive(Error, Debug)]
pub enum Error {
    /// Registry or delta absent on the ledger
    #[error("{object} not found on ledger: {registry_id}")]
    NotFound {
        /// What was looked up
        object: LedgerObject,
        /// Registry ID
        registry_id: RegistryId,
    },

    /// Tails material failed verification
    #[error("Tails integrity failure for {registry_id}: {source}")]
    Integrity {
        /// Registry ID
        registry_id: RegistryId,
        /// Digest mismatch
        #[source]
        source: IntegrityError,
    },

    /// Transport-level failure
    #[error("Fetch error for {target}: {reason}")]
    Fetch {
        /// URL or resource that was requested
        target: String,
        /// Failure description
        reason: String,
    },

    /// Ledger returned data that could not be decoded
    #[error("Malformed {object} for {registry_id}: {reason}")]
    MalformedResponse {
        /// What was decoded
        object: LedgerObject,
        /// Registry ID
        registry_id: RegistryId,
        /// Decode failure
        reason: String,
    },

    /// Accumulator update failure
    #[error(transparent)]
    Update(#[from] UpdateError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] registry_core::Error),

    /// IO error (tails staging, metrics output)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classification for callers and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Registry or delta absent
    NotFound,
    /// Tails hash mismatch
    Integrity,
    /// Transport failure
    Fetch,
    /// Undecodable ledger data
    MalformedResponse,
    /// Registry math failure
    ComputationFailed,
    /// Invalid configuration
    Config,
    /// Local IO failure
    Io,
}

impl ErrorKind {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Fetch => "fetch",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::ComputationFailed => "computation_failed",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Integrity { .. } => ErrorKind::Integrity,
            Error::Fetch { .. } => ErrorKind::Fetch,
            Error::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Error::Update(_) => ErrorKind::ComputationFailed,
            Error::Config(_) => ErrorKind::Config,
            Error::Core(registry_core::Error::Integrity(_)) => ErrorKind::Integrity,
            Error::Core(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Build a fetch error from a transport failure
    pub fn fetch(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        Error::Fetch {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}
