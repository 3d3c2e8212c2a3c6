//! Core types for revocation registries
//!
//! All types are immutable snapshots of ledger data or values derived from
//! them. Index sets are ordered so that logs, JSON output and helper requests
//! are deterministic.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Credential index within a registry
pub type CredentialIndex = u32;

/// Seconds since Unix epoch
pub type Timestamp = u64;

/// Revocation registry identifier
///
/// Shaped like `<did>:4:<did>:3:CL:<seq>:<tag>:CL_ACCUM:<uuid>` on the ledger,
/// but only ever used as an opaque key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryId(String);

impl RegistryId {
    /// Create new registry ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base-58 encoded SHA-256 digest of a tails file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TailsHash(String);

impl TailsHash {
    /// Wrap an encoded digest as published by the ledger
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Encode a raw digest
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        Self(bs58::encode(digest).into_string())
    }

    /// Parse and check that the value decodes to a 32-byte digest
    pub fn parse(encoded: &str) -> Result<Self> {
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| Error::InvalidDigest(format!("{}: {}", encoded, e)))?;
        if bytes.len() != 32 {
            return Err(Error::InvalidDigest(format!(
                "{}: expected 32 bytes, got {}",
                encoded,
                bytes.len()
            )));
        }
        Ok(Self(encoded.to_string()))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TailsHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque accumulator value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Accumulator(String);

impl Accumulator {
    /// Wrap an accumulator value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of revoked credential indexes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevokedIndexSet(BTreeSet<CredentialIndex>);

impl RevokedIndexSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Parse a comma separated list such as `1,3,4,5`
    pub fn parse_list(list: &str) -> Result<Self> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<CredentialIndex>()
                    .map_err(|e| Error::InvalidIndex(format!("{}: {}", s, e)))
            })
            .collect()
    }

    /// Check membership
    pub fn contains(&self, index: CredentialIndex) -> bool {
        self.0.contains(&index)
    }

    /// Number of indexes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in ascending order
    pub fn iter(&self) -> impl Iterator<Item = CredentialIndex> + '_ {
        self.0.iter().copied()
    }

    /// Indexes in `self` that are not in `other`
    pub fn difference(&self, other: &RevokedIndexSet) -> RevokedIndexSet {
        Self(self.0.difference(&other.0).copied().collect())
    }

    /// Check that no index is shared with `other`
    pub fn is_disjoint(&self, other: &RevokedIndexSet) -> bool {
        self.0.is_disjoint(&other.0)
    }

    /// Indexes as an ascending vector
    pub fn to_vec(&self) -> Vec<CredentialIndex> {
        self.iter().collect()
    }
}

impl FromIterator<CredentialIndex> for RevokedIndexSet {
    fn from_iter<I: IntoIterator<Item = CredentialIndex>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[CredentialIndex; N]> for RevokedIndexSet {
    fn from(indexes: [CredentialIndex; N]) -> Self {
        indexes.into_iter().collect()
    }
}

impl From<Vec<CredentialIndex>> for RevokedIndexSet {
    fn from(indexes: Vec<CredentialIndex>) -> Self {
        indexes.into_iter().collect()
    }
}

impl fmt::Display for RevokedIndexSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, index) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", index)?;
        }
        write!(f, "}}")
    }
}

/// How credentials enter the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssuanceType {
    /// Every index is considered issued from the start
    #[serde(rename = "ISSUANCE_BY_DEFAULT")]
    ByDefault,
    /// Indexes are issued one by one
    #[serde(rename = "ISSUANCE_ON_DEMAND")]
    OnDemand,
}

/// Revocation registry definition as published on the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryDefinition {
    /// Registry ID
    pub id: RegistryId,

    /// Revocation type (`CL_ACCUM`)
    pub revoc_def_type: String,

    /// Registry tag
    pub tag: String,

    /// Credential definition the registry belongs to
    pub cred_def_id: String,

    /// Issuance type
    pub issuance_type: IssuanceType,

    /// Capacity of the registry
    pub max_cred_num: u32,

    /// Where the tails file can be downloaded
    pub tails_location: String,

    /// Expected digest of the tails file
    pub tails_hash: TailsHash,

    /// Definition JSON as returned by the ledger, versioned for the math library
    pub raw: serde_json::Value,
}

/// Accumulator snapshot fetched from the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRegistryState {
    /// Registry ID
    pub registry_id: RegistryId,

    /// Current accumulator value
    pub accumulator: Accumulator,

    /// Ledger time of the accumulator entry
    pub timestamp: Timestamp,

    /// Registry entry JSON, versioned for the math library
    pub raw: serde_json::Value,
}

/// Incremental registry update ready to be published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDelta {
    /// Registry ID
    pub registry_id: RegistryId,

    /// Accumulator before the update
    pub accumulator_from: Accumulator,

    /// Accumulator after the update
    pub accumulator_to: Accumulator,

    /// Newly issued indexes (always empty for revocation-only updates)
    pub issued: RevokedIndexSet,

    /// Newly revoked indexes
    pub revoked: RevokedIndexSet,

    /// Delta object produced by the registry math
    pub delta: serde_json::Value,
}

impl UpdateDelta {
    /// Pretty JSON for publication
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
