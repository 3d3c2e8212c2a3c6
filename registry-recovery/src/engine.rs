//! Recovery engine
//!
//! Drives one registry through a full run:
//!
//! ```text
//! Idle -> Fetching -> Verifying -> Reconciling -> NoOpDone
//!                                              -> Applying -> Applied
//!   (any non-terminal phase)                   -> Failed
//! ```
//!
//! Fetch or verify failures end the run immediately; nothing is retried here.
//! Consistency warnings are attached to the outcome, whatever the status.

use crate::{
    applicator::UpdateApplicator,
    config::{Config, RegistryJob},
    ledger::{HttpLedgerReader, LedgerReader},
    math::{ProcessRegistryMath, RegistryMath},
    metrics::Metrics,
    tails::{HttpTailsSource, StagedTails, TailsSource},
    Error, ErrorKind, Result,
};
use registry_core::{reconcile, RegistryId, RevokedIndexSet, Timestamp, UpdateDelta};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Phase of a recovery run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    /// Not started
    Idle,
    /// Fetching ledger state and tails material
    Fetching,
    /// Checking tails integrity
    Verifying,
    /// Diffing ledger and desired state
    Reconciling,
    /// Nothing to revoke (terminal)
    NoOpDone,
    /// Computing the accumulator update
    Applying,
    /// Delta produced (terminal)
    Applied,
    /// Run failed (terminal)
    Failed,
}

impl RunPhase {
    /// Check if the run is over
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::NoOpDone | RunPhase::Applied | RunPhase::Failed)
    }

    /// Check if `next` may follow this phase
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;

        match (self, next) {
            (current, Failed) => !current.is_terminal(),
            (Idle, Fetching)
            | (Fetching, Verifying)
            | (Verifying, Reconciling)
            | (Reconciling, NoOpDone)
            | (Reconciling, Applying)
            | (Applying, Applied) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Final status of a run
#[derive(Debug)]
pub enum RunStatus {
    /// Ledger already matches the desired state
    NoUpdateNeeded,
    /// A delta was produced for publication
    Updated(UpdateDelta),
    /// The run failed
    Failed(Error),
}

/// Result of one reconciliation run
#[derive(Debug)]
pub struct RunOutcome {
    /// Run ID (UUIDv7, time-ordered)
    pub run_id: Uuid,

    /// Registry the run was for
    pub registry_id: RegistryId,

    /// Terminal phase reached
    pub phase: RunPhase,

    /// Final status
    pub status: RunStatus,

    /// Indexes revoked on the ledger but absent from the desired state
    pub consistency_warning: Option<RevokedIndexSet>,
}

impl RunOutcome {
    /// Produced delta, if any
    pub fn delta(&self) -> Option<&UpdateDelta> {
        match &self.status {
            RunStatus::Updated(delta) => Some(delta),
            _ => None,
        }
    }

    /// Failure, if any
    pub fn error(&self) -> Option<&Error> {
        match &self.status {
            RunStatus::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Failure classification, if any
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(Error::kind)
    }

    /// Check if the run failed
    pub fn is_failure(&self) -> bool {
        matches!(self.status, RunStatus::Failed(_))
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match &self.status {
            RunStatus::NoUpdateNeeded => "no_update",
            RunStatus::Updated(_) => "updated",
            RunStatus::Failed(err) => err.kind().as_str(),
        }
    }
}

/// Mutable bookkeeping for a single run
struct Run {
    run_id: Uuid,
    registry_id: RegistryId,
    phase: RunPhase,
    consistency_warning: Option<RevokedIndexSet>,
}

impl Run {
    fn new(registry_id: RegistryId) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            registry_id,
            phase: RunPhase::Idle,
            consistency_warning: None,
        }
    }

    fn advance(&mut self, next: RunPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid phase transition {} -> {}",
            self.phase,
            next
        );
        if !self.phase.can_transition_to(next) {
            error!("Rejected phase transition {} -> {}", self.phase, next);
            return;
        }
        debug!("Phase {} -> {}", self.phase, next);
        self.phase = next;
    }

    fn finish(self, status: RunStatus) -> RunOutcome {
        RunOutcome {
            run_id: self.run_id,
            registry_id: self.registry_id,
            phase: self.phase,
            status,
            consistency_warning: self.consistency_warning,
        }
    }
}

/// Reconciles ledger registries with desired revocation state
pub struct RecoveryEngine {
    ledger: Arc<dyn LedgerReader>,
    tails: Arc<dyn TailsSource>,
    applicator: UpdateApplicator,
    staging_dir: Option<PathBuf>,
    metrics: Metrics,
}

impl fmt::Debug for RecoveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryEngine")
            .field("staging_dir", &self.staging_dir)
            .finish_non_exhaustive()
    }
}

impl RecoveryEngine {
    /// Create engine from injected capabilities
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        tails: Arc<dyn TailsSource>,
        math: Arc<dyn RegistryMath>,
    ) -> Result<Self> {
        let metrics = Metrics::new().map_err(|e| Error::Config(format!("metrics: {}", e)))?;

        Ok(Self {
            ledger,
            tails,
            applicator: UpdateApplicator::new(math),
            staging_dir: None,
            metrics,
        })
    }

    /// Create engine backed by the HTTP ledger gateway, HTTP tails downloads
    /// and the configured registry math helper
    pub fn from_config(config: &Config) -> Result<Self> {
        let ledger = Arc::new(HttpLedgerReader::new(&config.ledger)?);
        let tails = Arc::new(HttpTailsSource::new(&config.tails)?);
        let math = Arc::new(ProcessRegistryMath::new(&config.math)?);

        Ok(Self::new(ledger, tails, math)?.with_staging_dir(config.tails.staging_dir.clone()))
    }

    /// Stage tails files in `dir` instead of the system temp dir
    pub fn with_staging_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.staging_dir = dir;
        self
    }

    /// Metrics collected by this engine
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Reconcile one registry and compute its update delta if required
    pub async fn reconcile_and_update(
        &self,
        registry_id: &RegistryId,
        desired_revoked: &RevokedIndexSet,
        as_of: Option<Timestamp>,
    ) -> RunOutcome {
        let started = Instant::now();
        let mut run = Run::new(registry_id.clone());
        let span = info_span!("recovery", registry_id = %registry_id, run_id = %run.run_id);

        let result = self
            .execute(&mut run, desired_revoked, as_of)
            .instrument(span.clone())
            .await;

        let _guard = span.enter();
        let status = match result {
            Ok(status) => status,
            Err(err) => {
                run.advance(RunPhase::Failed);
                error!("Recovery failed ({}): {}", err.kind(), err);
                RunStatus::Failed(err)
            }
        };

        let outcome = run.finish(status);
        self.record(&outcome, started.elapsed().as_secs_f64());
        info!("Run finished: {} in phase {}", outcome.label(), outcome.phase);

        outcome
    }

    /// Run a configured job
    pub async fn run_job(&self, job: &RegistryJob) -> RunOutcome {
        self.reconcile_and_update(&job.registry_id(), &job.desired_revoked(), job.as_of)
            .await
    }

    /// Run configured jobs one after another
    pub async fn run_all(&self, jobs: &[RegistryJob]) -> Vec<RunOutcome> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            outcomes.push(self.run_job(job).await);
        }
        outcomes
    }

    async fn execute(
        &self,
        run: &mut Run,
        desired_revoked: &RevokedIndexSet,
        as_of: Option<Timestamp>,
    ) -> Result<RunStatus> {
        let registry_id = run.registry_id.clone();

        // Step 1: Fetch ledger state and tails material
        run.advance(RunPhase::Fetching);

        let definition = self.ledger.get_registry_definition(&registry_id).await?;
        info!("Tails URL: {}", definition.tails_location);

        let (state, ledger_revoked) = self.ledger.get_registry_delta(&registry_id, as_of).await?;
        info!(
            "Ledger registry state: accumulator {} as of {}",
            state.accumulator, state.timestamp
        );
        info!("Ledger revoked indexes: {}", ledger_revoked);

        let content = self.tails.fetch(&definition.tails_location).await?;
        let staged = StagedTails::stage(&content, self.staging_dir.as_deref())?;
        drop(content);

        // Step 2: Verify tails integrity
        run.advance(RunPhase::Verifying);

        let tails = staged
            .verify(&definition.tails_hash)
            .map_err(|source| Error::Integrity {
                registry_id: registry_id.clone(),
                source,
            })?;

        // Step 3: Reconcile
        run.advance(RunPhase::Reconciling);

        let reconciliation = reconcile(&ledger_revoked, desired_revoked);

        if reconciliation.has_consistency_warning() {
            warn!(
                "One or more credential indexes marked revoked on the ledger, but not in the new state: {}",
                reconciliation.missing_on_target()
            );
            run.consistency_warning = Some(reconciliation.missing_on_target().clone());
        }

        if !reconciliation.requires_update() {
            info!("No updates to perform");
            run.advance(RunPhase::NoOpDone);
            return Ok(RunStatus::NoUpdateNeeded);
        }

        // Step 4: Apply
        run.advance(RunPhase::Applying);

        let delta = self
            .applicator
            .apply_update(&definition, &state, &reconciliation, tails)
            .await?;

        run.advance(RunPhase::Applied);
        info!(
            "New delta: accumulator {} -> {}, revoked {}",
            delta.accumulator_from, delta.accumulator_to, delta.revoked
        );

        Ok(RunStatus::Updated(delta))
    }

    fn record(&self, outcome: &RunOutcome, duration_secs: f64) {
        self.metrics.record_run(outcome.label(), duration_secs);

        if outcome.consistency_warning.is_some() {
            self.metrics.consistency_warnings.inc();
        }
        if let Some(delta) = outcome.delta() {
            self.metrics.indexes_revoked.inc_by(delta.revoked.len() as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{fixture_registry, FakeRegistryMath, InMemoryLedger, StaticTailsSource};
    use crate::LedgerObject;
    use bytes::Bytes;

    const TAILS: &[u8] = b"tails file contents";

    struct Harness {
        ledger: Arc<InMemoryLedger>,
        tails: Arc<StaticTailsSource>,
        math: Arc<FakeRegistryMath>,
        staging: tempfile::TempDir,
    }

    impl Harness {
        fn new(math: FakeRegistryMath) -> Self {
            Self {
                ledger: Arc::new(InMemoryLedger::new()),
                tails: Arc::new(StaticTailsSource::new()),
                math: Arc::new(math),
                staging: tempfile::tempdir().unwrap(),
            }
        }

        /// Publish a registry whose ledger state revokes `revoked`, serving `served` as tails
        fn publish(&self, id: &str, revoked: RevokedIndexSet, served: &'static [u8]) -> RegistryId {
            let (definition, state) = fixture_registry(id, TAILS);
            self.tails
                .insert(definition.tails_location.clone(), Bytes::from_static(served));
            let registry_id = definition.id.clone();
            self.ledger.insert_registry(definition, state, revoked);
            registry_id
        }

        fn engine(&self) -> RecoveryEngine {
            RecoveryEngine::new(self.ledger.clone(), self.tails.clone(), self.math.clone())
                .unwrap()
                .with_staging_dir(Some(self.staging.path().to_path_buf()))
        }

        fn staged_files(&self) -> usize {
            std::fs::read_dir(self.staging.path()).unwrap().count()
        }
    }

    #[test]
    fn test_phase_transitions() {
        use RunPhase::*;

        assert!(Idle.can_transition_to(Fetching));
        assert!(Reconciling.can_transition_to(NoOpDone));
        assert!(Reconciling.can_transition_to(Applying));
        assert!(Fetching.can_transition_to(Failed));
        assert!(Applying.can_transition_to(Failed));

        assert!(!Idle.can_transition_to(Applying));
        assert!(!Fetching.can_transition_to(Reconciling));
        assert!(!Verifying.can_transition_to(Applying));
        assert!(!Applied.can_transition_to(Failed));
        assert!(!NoOpDone.can_transition_to(Applying));

        for phase in [NoOpDone, Applied, Failed] {
            assert!(phase.is_terminal());
        }
    }

    #[tokio::test]
    async fn test_no_op_run() {
        let harness = Harness::new(FakeRegistryMath::new());
        let id = harness.publish("reg-noop", RevokedIndexSet::from([1, 3, 4]), TAILS);

        let outcome = harness
            .engine()
            .reconcile_and_update(&id, &RevokedIndexSet::from([1, 3, 4]), None)
            .await;

        assert!(matches!(outcome.status, RunStatus::NoUpdateNeeded));
        assert_eq!(outcome.phase, RunPhase::NoOpDone);
        assert!(outcome.consistency_warning.is_none());
        assert!(harness.math.calls().is_empty());
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_pure_addition_run() {
        let harness = Harness::new(FakeRegistryMath::new());
        let id = harness.publish("reg-add", RevokedIndexSet::from([1, 3]), TAILS);
        let engine = harness.engine();

        let outcome = engine
            .reconcile_and_update(&id, &RevokedIndexSet::from([1, 3, 4, 5]), Some(1_700_000_000))
            .await;

        assert_eq!(outcome.phase, RunPhase::Applied);
        let delta = outcome.delta().expect("delta produced");
        assert_eq!(delta.registry_id, id);
        assert_eq!(delta.revoked, RevokedIndexSet::from([4, 5]));
        assert!(outcome.consistency_warning.is_none());

        assert_eq!(harness.math.calls(), vec![RevokedIndexSet::from([4, 5])]);
        assert_eq!(harness.ledger.delta_queries(), vec![(id, Some(1_700_000_000))]);
        assert_eq!(harness.staged_files(), 0);

        assert_eq!(engine.metrics().indexes_revoked.get(), 2);
        assert_eq!(
            engine.metrics().runs_total.with_label_values(&["updated"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_consistency_warning_run() {
        let harness = Harness::new(FakeRegistryMath::new());
        let id = harness.publish("reg-warn", RevokedIndexSet::from([1, 3, 5]), TAILS);
        let engine = harness.engine();

        let outcome = engine
            .reconcile_and_update(&id, &RevokedIndexSet::from([1, 3]), None)
            .await;

        assert!(matches!(outcome.status, RunStatus::NoUpdateNeeded));
        assert_eq!(outcome.consistency_warning, Some(RevokedIndexSet::from([5])));
        assert!(harness.math.calls().is_empty());
        assert_eq!(engine.metrics().consistency_warnings.get(), 1);
    }

    #[tokio::test]
    async fn test_warning_with_update() {
        let harness = Harness::new(FakeRegistryMath::new());
        let id = harness.publish("reg-both", RevokedIndexSet::from([1, 5]), TAILS);

        let outcome = harness
            .engine()
            .reconcile_and_update(&id, &RevokedIndexSet::from([1, 6]), None)
            .await;

        assert_eq!(outcome.delta().unwrap().revoked, RevokedIndexSet::from([6]));
        assert_eq!(outcome.consistency_warning, Some(RevokedIndexSet::from([5])));
    }

    #[tokio::test]
    async fn test_tails_mismatch_run() {
        let harness = Harness::new(FakeRegistryMath::new());
        let id = harness.publish("reg-bad-tails", RevokedIndexSet::from([1]), b"tampered tails");

        let outcome = harness
            .engine()
            .reconcile_and_update(&id, &RevokedIndexSet::from([1, 2]), None)
            .await;

        assert_eq!(outcome.phase, RunPhase::Failed);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Integrity));
        assert!(outcome.delta().is_none());
        // Applicator never reached
        assert!(harness.math.calls().is_empty());
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_update_failure_run() {
        let harness = Harness::new(FakeRegistryMath::failing("accumulator rejected"));
        let id = harness.publish("reg-fail", RevokedIndexSet::new(), TAILS);

        let outcome = harness
            .engine()
            .reconcile_and_update(&id, &RevokedIndexSet::from([2]), None)
            .await;

        assert_eq!(outcome.phase, RunPhase::Failed);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ComputationFailed));
        assert!(outcome.delta().is_none());
        assert_eq!(harness.math.calls().len(), 1);
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_missing_registry_run() {
        let harness = Harness::new(FakeRegistryMath::new());

        let outcome = harness
            .engine()
            .reconcile_and_update(&RegistryId::new("unknown"), &RevokedIndexSet::from([1]), None)
            .await;

        assert_eq!(outcome.phase, RunPhase::Failed);
        assert!(matches!(
            outcome.error(),
            Some(Error::NotFound {
                object: LedgerObject::RegistryDefinition,
                ..
            })
        ));
        assert!(harness.tails.fetches().is_empty());
    }

    #[tokio::test]
    async fn test_missing_delta_is_fatal() {
        let harness = Harness::new(FakeRegistryMath::new());
        let (definition, _) = fixture_registry("reg-no-delta", TAILS);
        let id = definition.id.clone();
        harness.ledger.insert_definition(definition);

        let outcome = harness
            .engine()
            .reconcile_and_update(&id, &RevokedIndexSet::from([1]), None)
            .await;

        assert!(matches!(
            outcome.error(),
            Some(Error::NotFound {
                object: LedgerObject::RegistryDelta,
                ..
            })
        ));
        assert!(harness.tails.fetches().is_empty());
    }

    #[tokio::test]
    async fn test_tails_fetch_failure_run() {
        let harness = Harness::new(FakeRegistryMath::new());
        let (definition, state) = fixture_registry("reg-no-tails", TAILS);
        let id = definition.id.clone();
        harness
            .ledger
            .insert_registry(definition, state, RevokedIndexSet::new());

        let outcome = harness
            .engine()
            .reconcile_and_update(&id, &RevokedIndexSet::from([1]), None)
            .await;

        assert_eq!(outcome.error_kind(), Some(ErrorKind::Fetch));
        assert_eq!(outcome.label(), "fetch");
    }

    #[tokio::test]
    async fn test_run_all_is_sequential_and_independent() {
        let harness = Harness::new(FakeRegistryMath::new());
        harness.publish("reg-a", RevokedIndexSet::from([1]), TAILS);
        harness.publish("reg-b", RevokedIndexSet::from([2]), TAILS);

        let jobs = vec![
            RegistryJob {
                registry_id: "reg-a".to_string(),
                revoked: vec![1, 2],
                as_of: None,
            },
            RegistryJob {
                registry_id: "missing".to_string(),
                revoked: vec![1],
                as_of: None,
            },
            RegistryJob {
                registry_id: "reg-b".to_string(),
                revoked: vec![2],
                as_of: None,
            },
        ];

        let outcomes = harness.engine().run_all(&jobs).await;
        let labels: Vec<_> = outcomes.iter().map(RunOutcome::label).collect();
        assert_eq!(labels, vec!["updated", "not_found", "no_update"]);
        assert_ne!(outcomes[0].run_id, outcomes[2].run_id);
    }
}
