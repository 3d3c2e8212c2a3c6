//! Revocation Registry Recovery
//!
//! Reconciles a revocation registry on the ledger with a desired revocation
//! state and computes the update delta that brings the ledger in line.
//!
//! # Architecture
//!
//! ```text
//! LedgerReader ──> TailsSource ──> StagedTails::verify ──> reconcile ──> UpdateApplicator
//!  (definition,     (download)      (SHA-256 / base-58)    (set diff)     (RegistryMath)
//!   delta)
//! ```
//!
//! The ledger, the tails server and the registry math library are capabilities
//! injected into [`RecoveryEngine`]. HTTP and helper-process implementations
//! are used in production, the [`memory`] module provides in-memory ones.
//!
//! # Example
//!
//! ```no_run
//! use registry_recovery::{reconcile_and_update, Config};
//! use registry_core::{RegistryId, RevokedIndexSet};
//!
//! #[tokio::main]
//! async fn main() -> registry_recovery::Result<()> {
//!     let config = Config::from_file("recovery.toml")?;
//!     let registry_id = RegistryId::new("P6UvpU451XA5p8Dx6zsuUu:4:P6UvpU451XA5p8Dx6zsuUu:3:CL:38189:CredentialRevoke:CL_ACCUM:bf7cc241-5cf8-45e5-8aa8-891d0656c666");
//!
//!     let outcome = reconcile_and_update(&config, &registry_id, &RevokedIndexSet::from([1, 3, 4, 5])).await;
//!     if let Some(delta) = outcome.delta() {
//!         println!("{}", delta.to_json()?);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod applicator;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod math;
pub mod memory;
pub mod metrics;
pub mod tails;

// Re-exports
pub use applicator::UpdateApplicator;
pub use config::{Config, RegistryJob};
pub use engine::{RecoveryEngine, RunOutcome, RunPhase, RunStatus};
pub use error::{Error, ErrorKind, LedgerObject, Result, UpdateError};
pub use ledger::{HttpLedgerReader, LedgerReader, LedgerReply};
pub use math::{AccumulatorHandle, ComputedDelta, ProcessRegistryMath, RegistryMath};
pub use metrics::Metrics;
pub use tails::{HttpTailsSource, StagedTails, TailsSource, VerifiedTails};

use registry_core::{RegistryId, RevokedIndexSet};
use uuid::Uuid;

/// Reconcile one registry using the capabilities described by `config`
///
/// Configuration problems are reported as a failed outcome like any other
/// failure, so callers handle a single result shape.
pub async fn reconcile_and_update(
    config: &Config,
    registry_id: &RegistryId,
    desired_revoked: &RevokedIndexSet,
) -> RunOutcome {
    match RecoveryEngine::from_config(config) {
        Ok(engine) => {
            engine
                .reconcile_and_update(registry_id, desired_revoked, None)
                .await
        }
        Err(err) => {
            tracing::error!("Cannot start recovery for {}: {}", registry_id, err);
            RunOutcome {
                run_id: Uuid::now_v7(),
                registry_id: registry_id.clone(),
                phase: RunPhase::Failed,
                status: RunStatus::Failed(err),
                consistency_warning: None,
            }
        }
    }
}
