//! Reconciliation of ledger and desired revocation state
//!
//! # Policy
//!
//! ```text
//! ledger_revoked:   {1, 3, 5}
//! desired_revoked:  {1, 3, 4}
//!
//! to_add            = desired - ledger = {4}   -> revoked by the update
//! missing_on_target = ledger - desired = {5}   -> reported, never un-revoked
//! ```
//!
//! Accumulator revocation is monotonic. An index the ledger already revoked
//! stays revoked, so indexes missing from the desired state only ever produce
//! a consistency warning.

use crate::types::RevokedIndexSet;
use serde::Serialize;

/// Outcome of comparing ledger and desired revocation state
///
/// Only [`reconcile`] builds this, so `to_add` always is the exact set
/// difference against the ledger's view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    missing_on_target: RevokedIndexSet,
    to_add: RevokedIndexSet,
}

impl ReconciliationResult {
    /// Indexes revoked on the ledger but absent from the desired state
    pub fn missing_on_target(&self) -> &RevokedIndexSet {
        &self.missing_on_target
    }

    /// Indexes that must be newly revoked
    pub fn to_add(&self) -> &RevokedIndexSet {
        &self.to_add
    }

    /// Check if the ledger and desired views disagree on committed revocations
    pub fn has_consistency_warning(&self) -> bool {
        !self.missing_on_target.is_empty()
    }

    /// Check if an accumulator update is required
    pub fn requires_update(&self) -> bool {
        !self.to_add.is_empty()
    }
}

/// Diff the ledger's revoked indexes against the desired set
pub fn reconcile(
    ledger_revoked: &RevokedIndexSet,
    desired_revoked: &RevokedIndexSet,
) -> ReconciliationResult {
    let missing_on_target = ledger_revoked.difference(desired_revoked);
    let to_add = desired_revoked.difference(ledger_revoked);

    debug_assert!(missing_on_target.is_disjoint(&to_add));

    ReconciliationResult {
        missing_on_target,
        to_add,
    }
}
