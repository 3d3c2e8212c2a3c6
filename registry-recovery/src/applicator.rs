//! Update applicator
//!
//! Turns a reconciliation result into an [`UpdateDelta`] by handing exactly
//! its `to_add` set to the registry math capability. Verified tails material
//! is taken by value and released when the update finishes.

use crate::{
    error::UpdateError,
    math::RegistryMath,
    tails::VerifiedTails,
};
use registry_core::{
    LedgerRegistryState, ReconciliationResult, RegistryDefinition, RevokedIndexSet, UpdateDelta,
};
use std::sync::Arc;
use tracing::{error, info};

/// Applies revocations through the registry math capability
#[derive(Clone)]
pub struct UpdateApplicator {
    math: Arc<dyn RegistryMath>,
}

impl std::fmt::Debug for UpdateApplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateApplicator").finish_non_exhaustive()
    }
}

impl UpdateApplicator {
    /// Create new applicator
    pub fn new(math: Arc<dyn RegistryMath>) -> Self {
        Self { math }
    }

    /// Revoke `reconciliation.to_add()` against the current accumulator
    ///
    /// Failures from the math capability are surfaced as
    /// [`UpdateError::ComputationFailed`] and never retried.
    pub async fn apply_update(
        &self,
        definition: &RegistryDefinition,
        current_state: &LedgerRegistryState,
        reconciliation: &ReconciliationResult,
        tails: VerifiedTails,
    ) -> Result<UpdateDelta, UpdateError> {
        let registry_id = definition.id.clone();
        let to_add = reconciliation.to_add();

        if to_add.is_empty() {
            return Err(UpdateError::NoAdditions { registry_id });
        }

        info!("New revoked indexes: {}", to_add);
        info!("Tails file: {} ({} bytes)", tails.path().display(), tails.len());

        let failed = |reason: String| {
            error!("Accumulator update failed for {}: {}", registry_id, reason);
            UpdateError::ComputationFailed {
                registry_id: registry_id.clone(),
                reason,
            }
        };

        let handle = self
            .math
            .load(definition, current_state)
            .map_err(|e| failed(format!("{:#}", e)))?;

        let computed = self
            .math
            .compute_delta(handle, to_add, &tails)
            .await
            .map_err(|e| failed(format!("{:#}", e)))?;

        drop(tails);

        Ok(UpdateDelta {
            registry_id: registry_id.clone(),
            accumulator_from: current_state.accumulator.clone(),
            accumulator_to: computed.accumulator,
            issued: RevokedIndexSet::new(),
            revoked: to_add.clone(),
            delta: computed.delta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{fixture_registry, FakeRegistryMath};
    use crate::tails::StagedTails;
    use registry_core::{reconcile, tails_digest};

    fn verified() -> VerifiedTails {
        StagedTails::stage(b"tails", None)
            .unwrap()
            .verify(&tails_digest(b"tails"))
            .unwrap()
    }

    #[tokio::test]
    async fn test_apply_passes_exact_additions() {
        let math = Arc::new(FakeRegistryMath::new());
        let applicator = UpdateApplicator::new(math.clone());
        let (definition, state) = fixture_registry("reg-1", b"tails");

        let reconciliation = reconcile(
            &RevokedIndexSet::from([1, 3]),
            &RevokedIndexSet::from([1, 3, 4, 5]),
        );

        let delta = applicator
            .apply_update(&definition, &state, &reconciliation, verified())
            .await
            .unwrap();

        assert_eq!(delta.revoked, RevokedIndexSet::from([4, 5]));
        assert!(delta.issued.is_empty());
        assert_eq!(delta.accumulator_from, state.accumulator);
        assert_ne!(delta.accumulator_to, state.accumulator);
        assert_eq!(math.calls(), vec![RevokedIndexSet::from([4, 5])]);
    }

    #[tokio::test]
    async fn test_math_failure_is_computation_failed() {
        let math = Arc::new(FakeRegistryMath::failing("index out of range"));
        let applicator = UpdateApplicator::new(math.clone());
        let (definition, state) = fixture_registry("reg-1", b"tails");
        let reconciliation = reconcile(&RevokedIndexSet::new(), &RevokedIndexSet::from([7]));

        let err = applicator
            .apply_update(&definition, &state, &reconciliation, verified())
            .await
            .unwrap_err();

        match err {
            UpdateError::ComputationFailed { registry_id, reason } => {
                assert_eq!(registry_id, definition.id);
                assert!(reason.contains("index out of range"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // Invoked once, never retried
        assert_eq!(math.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_additions_rejected() {
        let math = Arc::new(FakeRegistryMath::new());
        let applicator = UpdateApplicator::new(math.clone());
        let (definition, state) = fixture_registry("reg-1", b"tails");
        let reconciliation = reconcile(&RevokedIndexSet::from([1]), &RevokedIndexSet::from([1]));

        let err = applicator
            .apply_update(&definition, &state, &reconciliation, verified())
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::NoAdditions { .. }));
        assert!(math.calls().is_empty());
    }

    #[tokio::test]
    async fn test_tails_released_after_update() {
        let applicator = UpdateApplicator::new(Arc::new(FakeRegistryMath::new()));
        let (definition, state) = fixture_registry("reg-1", b"tails");
        let reconciliation = reconcile(&RevokedIndexSet::new(), &RevokedIndexSet::from([2]));

        let tails = verified();
        let path = tails.path().to_path_buf();
        applicator
            .apply_update(&definition, &state, &reconciliation, tails)
            .await
            .unwrap();

        assert!(!path.exists());
    }
}
