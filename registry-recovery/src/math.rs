//! Registry math capability
//!
//! Accumulator arithmetic lives in an external library. The recovery engine
//! reaches it through [`RegistryMath`]; [`ProcessRegistryMath`] drives a
//! helper program that wraps the library.
//!
//! # Helper protocol
//!
//! The helper receives one JSON request on stdin:
//!
//! ```text
//! {
//!   "registry_definition": { ...ledger definition, "ver": "1.0" },
//!   "registry": { ...accum_to entry, "ver": "1.0" },
//!   "issued": [],
//!   "revoked": [4, 5],
//!   "tails_path": "/tmp/tails-XXXX"
//! }
//! ```
//!
//! and must print `{"accumulator": "...", "delta": {...}}` on stdout. A
//! non-zero exit status is a failed computation; stderr is kept as the reason.

use crate::{config::MathConfig, tails::VerifiedTails, Error, Result};
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use registry_core::{
    Accumulator, LedgerRegistryState, RegistryDefinition, RegistryId, RevokedIndexSet, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Accumulator loaded for an update
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorHandle {
    /// Registry ID
    pub registry_id: RegistryId,

    /// Accumulator the update starts from
    pub accumulator: Accumulator,

    /// Ledger time of that accumulator
    pub timestamp: Timestamp,

    /// Registry capacity
    pub max_cred_num: u32,

    /// Versioned definition JSON
    pub definition: Value,

    /// Versioned registry entry JSON
    pub registry: Value,
}

impl AccumulatorHandle {
    /// Build a handle from fetched ledger objects
    pub fn from_ledger(definition: &RegistryDefinition, state: &LedgerRegistryState) -> Self {
        Self {
            registry_id: definition.id.clone(),
            accumulator: state.accumulator.clone(),
            timestamp: state.timestamp,
            max_cred_num: definition.max_cred_num,
            definition: definition.raw.clone(),
            registry: state.raw.clone(),
        }
    }
}

/// New accumulator plus the delta object describing the change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedDelta {
    /// Accumulator after the update
    pub accumulator: Accumulator,

    /// Delta object to publish
    pub delta: Value,
}

/// Accumulator update capability
///
/// Implementations are expected to be deterministic for identical inputs.
#[async_trait]
pub trait RegistryMath: Send + Sync {
    /// Load the current accumulator
    fn load(
        &self,
        definition: &RegistryDefinition,
        state: &LedgerRegistryState,
    ) -> anyhow::Result<AccumulatorHandle>;

    /// Revoke `revoked_additions` against the loaded accumulator
    async fn compute_delta(
        &self,
        handle: AccumulatorHandle,
        revoked_additions: &RevokedIndexSet,
        tails: &VerifiedTails,
    ) -> anyhow::Result<ComputedDelta>;
}

/// Registry math driven through an external helper process
#[derive(Debug, Clone)]
pub struct ProcessRegistryMath {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessRegistryMath {
    /// Create from configuration; a helper program is required
    pub fn new(config: &MathConfig) -> Result<Self> {
        let program = config
            .program
            .clone()
            .ok_or_else(|| Error::Config("math.program is not set".to_string()))?;

        Ok(Self {
            program,
            args: config.args.clone(),
            timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
        })
    }
}

#[async_trait]
impl RegistryMath for ProcessRegistryMath {
    fn load(
        &self,
        definition: &RegistryDefinition,
        state: &LedgerRegistryState,
    ) -> anyhow::Result<AccumulatorHandle> {
        if state.registry_id != definition.id {
            bail!(
                "registry state for {} does not belong to definition {}",
                state.registry_id,
                definition.id
            );
        }
        Ok(AccumulatorHandle::from_ledger(definition, state))
    }

    async fn compute_delta(
        &self,
        handle: AccumulatorHandle,
        revoked_additions: &RevokedIndexSet,
        tails: &VerifiedTails,
    ) -> anyhow::Result<ComputedDelta> {
        let request = json!({
            "registry_definition": handle.definition,
            "registry": handle.registry,
            "issued": [],
            "revoked": revoked_additions,
            "tails_path": tails.path().to_string_lossy(),
        });

        debug!(
            "Running registry math helper {} for {}",
            self.program.display(),
            handle.registry_id
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.program.display()))?;

        let input = serde_json::to_vec(&request)?;
        let exchange = async move {
            let mut stdin = child
                .stdin
                .take()
                .context("registry math helper stdin unavailable")?;
            match stdin.write_all(&input).await {
                Ok(()) => {}
                // Helper quit without reading; its exit status and stderr say why
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("Registry math helper closed stdin early");
                }
                Err(e) => return Err(anyhow::Error::new(e).context("writing helper request")),
            }
            drop(stdin);

            Ok::<_, anyhow::Error>(child.wait_with_output().await?)
        };

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| anyhow!("registry math helper timed out after {:?}", timeout))??,
            None => exchange.await?,
        };

        if !output.status.success() {
            bail!(
                "registry math helper exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        serde_json::from_slice(&output.stdout).context("registry math helper returned no delta")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tails::StagedTails;
    use registry_core::{tails_digest, IssuanceType, TailsHash};

    fn fixtures() -> (RegistryDefinition, LedgerRegistryState) {
        let id = RegistryId::new("reg-1");
        let definition = RegistryDefinition {
            id: id.clone(),
            revoc_def_type: "CL_ACCUM".to_string(),
            tag: "default".to_string(),
            cred_def_id: "cred-def".to_string(),
            issuance_type: IssuanceType::ByDefault,
            max_cred_num: 10,
            tails_location: "https://tails.example.org/t".to_string(),
            tails_hash: TailsHash::new("unused"),
            raw: json!({"id": "reg-1", "ver": "1.0"}),
        };
        let state = LedgerRegistryState {
            registry_id: id,
            accumulator: Accumulator::new("acc-0"),
            timestamp: 1_650_000_000,
            raw: json!({"value": {"accum": "acc-0"}, "ver": "1.0"}),
        };
        (definition, state)
    }

    fn verified_tails() -> VerifiedTails {
        StagedTails::stage(b"tails", None)
            .unwrap()
            .verify(&tails_digest(b"tails"))
            .unwrap()
    }

    fn shell(script: &str) -> ProcessRegistryMath {
        shell_with_timeout(script, 10)
    }

    fn shell_with_timeout(script: &str, timeout_secs: u64) -> ProcessRegistryMath {
        ProcessRegistryMath::new(&MathConfig {
            program: Some(PathBuf::from("sh")),
            args: vec!["-c".to_string(), script.to_string()],
            timeout_secs,
        })
        .unwrap()
    }

    #[test]
    fn test_requires_program() {
        let result = ProcessRegistryMath::new(&MathConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_rejects_foreign_state() {
        let (definition, mut state) = fixtures();
        state.registry_id = RegistryId::new("reg-2");
        assert!(shell("true").load(&definition, &state).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_success() {
        let math = shell(
            r#"cat > /dev/null; printf '%s' '{"accumulator":"acc-1","delta":{"accum":"acc-1"}}'"#,
        );
        let (definition, state) = fixtures();
        let handle = math.load(&definition, &state).unwrap();

        let computed = math
            .compute_delta(handle, &RevokedIndexSet::from([4, 5]), &verified_tails())
            .await
            .unwrap();

        assert_eq!(computed.accumulator, Accumulator::new("acc-1"));
        assert_eq!(computed.delta["accum"], "acc-1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_receives_request() {
        // Echo the request back as the delta
        let math = shell(r#"printf '{"accumulator":"acc-1","delta":'; cat; printf '}'"#);
        let (definition, state) = fixtures();
        let handle = math.load(&definition, &state).unwrap();
        let tails = verified_tails();

        let computed = math
            .compute_delta(handle, &RevokedIndexSet::from([5, 4]), &tails)
            .await
            .unwrap();

        assert_eq!(computed.delta["revoked"], json!([4, 5]));
        assert_eq!(computed.delta["issued"], json!([]));
        assert_eq!(computed.delta["registry"]["ver"], "1.0");
        assert_eq!(computed.delta["tails_path"], json!(tails.path()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_failure_reports_stderr() {
        let math = shell("cat > /dev/null; echo 'index 11 exceeds max_cred_num' >&2; exit 3");
        let (definition, state) = fixtures();
        let handle = math.load(&definition, &state).unwrap();

        let err = math
            .compute_delta(handle, &RevokedIndexSet::from([11]), &verified_tails())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("index 11 exceeds max_cred_num"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_exiting_before_reading_reports_stderr() {
        let math = shell("echo 'unsupported registry type' >&2; exit 4");
        let (definition, state) = fixtures();
        let handle = math.load(&definition, &state).unwrap();

        let err = math
            .compute_delta(handle, &RevokedIndexSet::from([4]), &verified_tails())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("unsupported registry type"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stalled_helper_times_out() {
        let math = shell_with_timeout("sleep 30", 1);
        let (definition, state) = fixtures();
        let handle = math.load(&definition, &state).unwrap();

        let err = math
            .compute_delta(handle, &RevokedIndexSet::from([4]), &verified_tails())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"));
    }
}
