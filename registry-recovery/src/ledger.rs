//! Ledger state fetcher
//!
//! The recovery engine only depends on [`LedgerReader`]. [`HttpLedgerReader`]
//! talks to a ledger query gateway that exposes the raw ledger replies:
//!
//! - `GET {base}/rev_reg_def/{registry_id}`
//! - `GET {base}/rev_reg_delta/{registry_id}?to={timestamp}`
//!
//! Replies are either the full ledger reply (`{"result": {"data": ...}}`) or
//! just `{"data": ...}`. A null or empty `data` means the ledger has no such
//! object. `REJECT` and `REQNACK` replies are fetch failures carrying the
//! ledger's reason; any other shape is malformed.

use crate::{
    config::LedgerConfig,
    error::{Error, LedgerObject, Result},
};
use async_trait::async_trait;
use chrono::Utc;
use registry_core::{
    Accumulator, CredentialIndex, IssuanceType, LedgerRegistryState, RegistryDefinition,
    RegistryId, RevokedIndexSet, TailsHash, Timestamp,
};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Version tag the registry math library expects on ledger objects
pub const OBJECT_VERSION: &str = "1.0";

/// Read access to revocation registries on the ledger
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Fetch the registry definition
    async fn get_registry_definition(&self, registry_id: &RegistryId)
        -> Result<RegistryDefinition>;

    /// Fetch the accumulator state and revoked indexes as of `as_of` (now if unset)
    async fn get_registry_delta(
        &self,
        registry_id: &RegistryId,
        as_of: Option<Timestamp>,
    ) -> Result<(LedgerRegistryState, RevokedIndexSet)>;
}

/// Current time in ledger seconds
pub fn now_timestamp() -> Timestamp {
    Timestamp::try_from(Utc::now().timestamp()).unwrap_or(0)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinitionData {
    id: String,
    revoc_def_type: String,
    tag: String,
    cred_def_id: String,
    value: DefinitionValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinitionValue {
    issuance_type: IssuanceType,
    max_cred_num: u32,
    tails_hash: String,
    tails_location: String,
}

#[derive(Deserialize)]
struct DeltaData {
    value: DeltaValue,
}

#[derive(Deserialize)]
struct DeltaValue {
    accum_to: Value,
    #[serde(default)]
    revoked: Vec<CredentialIndex>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccumEntry {
    txn_time: Timestamp,
    value: AccumValue,
}

#[derive(Deserialize)]
struct AccumValue {
    accum: String,
}

/// Classified ledger reply
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerReply {
    /// Reply carries the requested object
    Data(Value),
    /// Reply says the ledger has no such object (`data` null or empty)
    Absent,
    /// Ledger refused the request (`REJECT` / `REQNACK`)
    Rejected {
        /// Reply operation
        op: String,
        /// Reason given by the ledger
        reason: String,
    },
    /// Reply has neither `data` nor a rejection
    Unrecognized,
}

/// Classify a ledger reply and pull out its `data`
pub fn reply_data(reply: &Value) -> LedgerReply {
    if let Some(op @ ("REJECT" | "REQNACK")) = reply.get("op").and_then(Value::as_str) {
        let reason = reply
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("no reason given");
        return LedgerReply::Rejected {
            op: op.to_string(),
            reason: reason.to_string(),
        };
    }

    let data = match reply.get("result") {
        Some(result) => result.get("data"),
        None => reply.get("data"),
    };

    match data {
        None => LedgerReply::Unrecognized,
        Some(Value::Null) => LedgerReply::Absent,
        Some(Value::Object(map)) if map.is_empty() => LedgerReply::Absent,
        Some(Value::String(s)) if s.is_empty() => LedgerReply::Absent,
        Some(other) => LedgerReply::Data(other.clone()),
    }
}

fn with_version(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert("ver".to_string(), Value::String(OBJECT_VERSION.to_string()));
    }
    value
}

/// Decode a registry definition from reply `data`
pub fn parse_registry_definition(
    registry_id: &RegistryId,
    data: Value,
) -> Result<RegistryDefinition> {
    let malformed = |reason: String| Error::MalformedResponse {
        object: LedgerObject::RegistryDefinition,
        registry_id: registry_id.clone(),
        reason,
    };

    let parsed: DefinitionData =
        serde_json::from_value(data.clone()).map_err(|e| malformed(e.to_string()))?;

    if parsed.id != registry_id.as_str() {
        return Err(malformed(format!("ledger returned definition {}", parsed.id)));
    }

    let tails_hash = TailsHash::parse(&parsed.value.tails_hash)
        .map_err(|e| malformed(format!("tailsHash: {}", e)))?;

    Ok(RegistryDefinition {
        id: registry_id.clone(),
        revoc_def_type: parsed.revoc_def_type,
        tag: parsed.tag,
        cred_def_id: parsed.cred_def_id,
        issuance_type: parsed.value.issuance_type,
        max_cred_num: parsed.value.max_cred_num,
        tails_location: parsed.value.tails_location,
        tails_hash,
        raw: with_version(data),
    })
}

/// Decode accumulator state and revoked indexes from reply `data`
pub fn parse_registry_delta(
    registry_id: &RegistryId,
    data: Value,
) -> Result<(LedgerRegistryState, RevokedIndexSet)> {
    let malformed = |reason: String| Error::MalformedResponse {
        object: LedgerObject::RegistryDelta,
        registry_id: registry_id.clone(),
        reason,
    };

    let parsed: DeltaData = serde_json::from_value(data).map_err(|e| malformed(e.to_string()))?;
    let entry: AccumEntry = serde_json::from_value(parsed.value.accum_to.clone())
        .map_err(|e| malformed(format!("accum_to: {}", e)))?;

    let state = LedgerRegistryState {
        registry_id: registry_id.clone(),
        accumulator: Accumulator::new(entry.value.accum),
        timestamp: entry.txn_time,
        raw: with_version(parsed.value.accum_to),
    };

    Ok((state, parsed.value.revoked.into_iter().collect()))
}

/// Ledger reader backed by an HTTP query gateway
#[derive(Debug)]
pub struct HttpLedgerReader {
    base_url: Url,
    client: Client,
}

impl HttpLedgerReader {
    /// Create new reader
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("ledger.base_url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "ledger.base_url cannot be a base: {}",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self { base_url, client })
    }

    fn endpoint(&self, route: &str, registry_id: &RegistryId) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(route).push(registry_id.as_str());
        }
        url
    }

    async fn query(
        &self,
        url: Url,
        object: LedgerObject,
        registry_id: &RegistryId,
    ) -> Result<Option<Value>> {
        debug!("Ledger query: {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::fetch(url.as_str(), e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::fetch(url.as_str(), format!("HTTP {}: {}", status, body)));
        }

        let reply: Value = response.json().await.map_err(|e| Error::MalformedResponse {
            object,
            registry_id: registry_id.clone(),
            reason: e.to_string(),
        })?;

        match reply_data(&reply) {
            LedgerReply::Data(data) => Ok(Some(data)),
            LedgerReply::Absent => Ok(None),
            LedgerReply::Rejected { op, reason } => {
                Err(Error::fetch(url.as_str(), format!("ledger {}: {}", op, reason)))
            }
            LedgerReply::Unrecognized => Err(Error::MalformedResponse {
                object,
                registry_id: registry_id.clone(),
                reason: "reply carries no data".to_string(),
            }),
        }
    }
}

#[async_trait]
impl LedgerReader for HttpLedgerReader {
    async fn get_registry_definition(
        &self,
        registry_id: &RegistryId,
    ) -> Result<RegistryDefinition> {
        info!("Fetch registry: {}", registry_id);

        let url = self.endpoint("rev_reg_def", registry_id);
        let data = self
            .query(url, LedgerObject::RegistryDefinition, registry_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                object: LedgerObject::RegistryDefinition,
                registry_id: registry_id.clone(),
            })?;

        parse_registry_definition(registry_id, data)
    }

    async fn get_registry_delta(
        &self,
        registry_id: &RegistryId,
        as_of: Option<Timestamp>,
    ) -> Result<(LedgerRegistryState, RevokedIndexSet)> {
        let to = as_of.unwrap_or_else(now_timestamp);
        info!("Fetch registry delta: {} as of {}", registry_id, to);

        let mut url = self.endpoint("rev_reg_delta", registry_id);
        url.query_pairs_mut().append_pair("to", &to.to_string());

        let data = self
            .query(url, LedgerObject::RegistryDelta, registry_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                object: LedgerObject::RegistryDelta,
                registry_id: registry_id.clone(),
            })?;

        parse_registry_delta(registry_id, data)
    }
}
