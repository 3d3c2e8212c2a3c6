//! In-memory capabilities
//!
//! Stand-ins for the ledger, the tails server and the registry math library.
//! They record every call so tests can assert what was (or was not) invoked.

use crate::{
    error::{Error, LedgerObject, Result},
    ledger::LedgerReader,
    math::{AccumulatorHandle, ComputedDelta, RegistryMath},
    tails::{TailsSource, VerifiedTails},
};
use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use registry_core::{
    tails_digest, Accumulator, IssuanceType, LedgerRegistryState, RegistryDefinition, RegistryId,
    RevokedIndexSet, Timestamp,
};
use serde_json::json;
use std::collections::HashMap;

/// Build a matching definition and accumulator state for `tails`
pub fn fixture_registry(registry_id: &str, tails: &[u8]) -> (RegistryDefinition, LedgerRegistryState) {
    let id = RegistryId::new(registry_id);
    let tails_hash = tails_digest(tails);
    let tails_location = format!("memory://tails/{}", tails_hash);

    let definition = RegistryDefinition {
        id: id.clone(),
        revoc_def_type: "CL_ACCUM".to_string(),
        tag: "default".to_string(),
        cred_def_id: format!("{}:cred-def", registry_id),
        issuance_type: IssuanceType::ByDefault,
        max_cred_num: 100,
        tails_location: tails_location.clone(),
        tails_hash: tails_hash.clone(),
        raw: json!({
            "id": registry_id,
            "revocDefType": "CL_ACCUM",
            "value": {
                "maxCredNum": 100,
                "tailsHash": tails_hash,
                "tailsLocation": tails_location,
            },
            "ver": "1.0",
        }),
    };

    let state = LedgerRegistryState {
        registry_id: id,
        accumulator: Accumulator::new("acc-0"),
        timestamp: 1_650_000_000,
        raw: json!({ "value": { "accum": "acc-0" }, "txnTime": 1_650_000_000u64, "ver": "1.0" }),
    };

    (definition, state)
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    definition: RegistryDefinition,
    delta: Option<(LedgerRegistryState, RevokedIndexSet)>,
}

/// Ledger held in memory
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    registries: RwLock<HashMap<RegistryId, LedgerEntry>>,
    delta_queries: Mutex<Vec<(RegistryId, Option<Timestamp>)>>,
}

impl InMemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a definition without any delta
    pub fn insert_definition(&self, definition: RegistryDefinition) {
        self.registries.write().insert(
            definition.id.clone(),
            LedgerEntry {
                definition,
                delta: None,
            },
        );
    }

    /// Publish a definition with its accumulator state and revoked indexes
    pub fn insert_registry(
        &self,
        definition: RegistryDefinition,
        state: LedgerRegistryState,
        revoked: RevokedIndexSet,
    ) {
        self.registries.write().insert(
            definition.id.clone(),
            LedgerEntry {
                definition,
                delta: Some((state, revoked)),
            },
        );
    }

    /// Delta queries seen so far
    pub fn delta_queries(&self) -> Vec<(RegistryId, Option<Timestamp>)> {
        self.delta_queries.lock().clone()
    }
}

#[async_trait]
impl LedgerReader for InMemoryLedger {
    async fn get_registry_definition(
        &self,
        registry_id: &RegistryId,
    ) -> Result<RegistryDefinition> {
        self.registries
            .read()
            .get(registry_id)
            .map(|entry| entry.definition.clone())
            .ok_or_else(|| Error::NotFound {
                object: LedgerObject::RegistryDefinition,
                registry_id: registry_id.clone(),
            })
    }

    async fn get_registry_delta(
        &self,
        registry_id: &RegistryId,
        as_of: Option<Timestamp>,
    ) -> Result<(LedgerRegistryState, RevokedIndexSet)> {
        self.delta_queries.lock().push((registry_id.clone(), as_of));

        self.registries
            .read()
            .get(registry_id)
            .and_then(|entry| entry.delta.clone())
            .ok_or_else(|| Error::NotFound {
                object: LedgerObject::RegistryDelta,
                registry_id: registry_id.clone(),
            })
    }
}

/// Tails content served from memory
#[derive(Debug, Default)]
pub struct StaticTailsSource {
    files: RwLock<HashMap<String, Bytes>>,
    fetches: Mutex<Vec<String>>,
}

impl StaticTailsSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `content` at `location`
    pub fn insert(&self, location: impl Into<String>, content: impl Into<Bytes>) {
        self.files.write().insert(location.into(), content.into());
    }

    /// Locations fetched so far
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().clone()
    }
}

#[async_trait]
impl TailsSource for StaticTailsSource {
    async fn fetch(&self, location: &str) -> Result<Bytes> {
        self.fetches.lock().push(location.to_string());

        self.files
            .read()
            .get(location)
            .cloned()
            .ok_or_else(|| Error::fetch(location, "HTTP 404 Not Found"))
    }
}

/// Deterministic registry math for tests
///
/// The new accumulator is a digest of the old one and the revoked indexes.
/// Indexes outside `1..=max_cred_num` are rejected like the real library does.
#[derive(Debug, Default)]
pub struct FakeRegistryMath {
    failure: Option<String>,
    calls: Mutex<Vec<RevokedIndexSet>>,
}

impl FakeRegistryMath {
    /// Math that succeeds for valid indexes
    pub fn new() -> Self {
        Self::default()
    }

    /// Math that always fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Index sets passed to `compute_delta`
    pub fn calls(&self) -> Vec<RevokedIndexSet> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RegistryMath for FakeRegistryMath {
    fn load(
        &self,
        definition: &RegistryDefinition,
        state: &LedgerRegistryState,
    ) -> anyhow::Result<AccumulatorHandle> {
        Ok(AccumulatorHandle::from_ledger(definition, state))
    }

    async fn compute_delta(
        &self,
        handle: AccumulatorHandle,
        revoked_additions: &RevokedIndexSet,
        tails: &VerifiedTails,
    ) -> anyhow::Result<ComputedDelta> {
        self.calls.lock().push(revoked_additions.clone());

        if let Some(reason) = &self.failure {
            bail!("{}", reason);
        }

        if let Some(index) = revoked_additions
            .iter()
            .find(|&i| i == 0 || i > handle.max_cred_num)
        {
            bail!(
                "credential index {} outside registry capacity {}",
                index,
                handle.max_cred_num
            );
        }

        let content = tails.read()?;
        if tails_digest(&content) != *tails.hash() {
            bail!("tails file changed after verification");
        }

        let seed = format!("{}|{}", handle.accumulator, revoked_additions);
        let accumulator = Accumulator::new(tails_digest(seed.as_bytes()).to_string());

        Ok(ComputedDelta {
            delta: json!({
                "ver": "1.0",
                "value": {
                    "prevAccum": handle.accumulator,
                    "accum": accumulator,
                    "issued": [],
                    "revoked": revoked_additions,
                }
            }),
            accumulator,
        })
    }
}
