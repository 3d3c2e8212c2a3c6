//! Revocation Registry Core
//!
//! Pure domain logic for reconciling a ledger's revocation registry with a
//! locally desired revocation state.
//!
//! # Components
//!
//! - **Integrity Verifier** ([`crypto`]): checks tails material against the
//!   base-58 SHA-256 digest published in the registry definition
//! - **Reconciliation Engine** ([`reconcile`]): diffs the ledger's revoked
//!   indexes against the desired set
//! - **Types** ([`types`]): registry definitions, accumulator snapshots,
//!   revoked index sets and update deltas
//!
//! # Invariants
//!
//! - Revocation is monotonic: an index the ledger already revoked is never
//!   scheduled for un-revocation
//! - Tails material is only usable once its digest matches the definition
//! - Reconciliation is a pure function of its two inputs

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod crypto;
pub mod error;
pub mod reconcile;
pub mod types;

// Re-exports
pub use crypto::{check_digest, tails_digest, verify_tails, TailsHasher};
pub use error::{Error, IntegrityError, Result};
pub use reconcile::{reconcile, ReconciliationResult};
pub use types::{
    Accumulator, CredentialIndex, IssuanceType, LedgerRegistryState, RegistryDefinition,
    RegistryId, RevokedIndexSet, TailsHash, Timestamp, UpdateDelta,
};
