//! Configuration for registry recovery

use crate::{Error, Result};
use registry_core::{CredentialIndex, RegistryId, RevokedIndexSet, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Ledger gateway configuration
    pub ledger: LedgerConfig,

    /// Tails download configuration
    pub tails: TailsConfig,

    /// Registry math helper configuration
    pub math: MathConfig,

    /// Prometheus text file written after each invocation
    pub metrics_output: Option<PathBuf>,

    /// Registries to reconcile
    pub registries: Vec<RegistryJob>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "registry-recovery".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            ledger: LedgerConfig::default(),
            tails: TailsConfig::default(),
            math: MathConfig::default(),
            metrics_output: None,
            registries: Vec::new(),
        }
    }
}

/// Ledger gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Base URL of the ledger query gateway
    pub base_url: String,

    /// Request timeout (seconds)
    pub request_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Tails download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailsConfig {
    /// Request timeout (seconds)
    pub request_timeout_secs: u64,

    /// Directory for staged tails files (system temp dir if unset)
    pub staging_dir: Option<PathBuf>,

    /// Largest tails file accepted (bytes)
    pub max_size_bytes: u64,
}

impl Default for TailsConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            staging_dir: None,
            max_size_bytes: 512 * 1024 * 1024, // 512 MB
        }
    }
}

/// Registry math helper configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MathConfig {
    /// Helper program wrapping the registry math library
    pub program: Option<PathBuf>,

    /// Extra arguments for the helper
    pub args: Vec<String>,

    /// Helper timeout (seconds, 0 = none)
    pub timeout_secs: u64,
}

/// One registry to reconcile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryJob {
    /// Registry ID
    pub registry_id: String,

    /// Indexes that should be revoked
    pub revoked: Vec<CredentialIndex>,

    /// Ledger time to query (now if unset)
    #[serde(default)]
    pub as_of: Option<Timestamp>,
}

impl RegistryJob {
    /// Registry ID as a typed key
    pub fn registry_id(&self) -> RegistryId {
        RegistryId::new(self.registry_id.clone())
    }

    /// Desired revocation state
    pub fn desired_revoked(&self) -> RevokedIndexSet {
        self.revoked.iter().copied().collect()
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("RECOVERY_LEDGER_URL") {
            self.ledger.base_url = url;
        }

        if let Ok(dir) = std::env::var("RECOVERY_TAILS_DIR") {
            self.tails.staging_dir = Some(PathBuf::from(dir));
        }

        if let Ok(program) = std::env::var("RECOVERY_MATH_PROGRAM") {
            self.math.program = Some(PathBuf::from(program));
        }

        if let Ok(path) = std::env::var("RECOVERY_METRICS_OUTPUT") {
            self.metrics_output = Some(PathBuf::from(path));
        }
    }

    /// Check values that would only fail later at run time
    pub fn validate(&self) -> Result<()> {
        if reqwest::Url::parse(&self.ledger.base_url).is_err() {
            return Err(Error::Config(format!(
                "ledger.base_url is not a valid URL: {}",
                self.ledger.base_url
            )));
        }

        if self.ledger.request_timeout_secs == 0 || self.tails.request_timeout_secs == 0 {
            return Err(Error::Config("request timeouts must be positive".to_string()));
        }

        if self.tails.max_size_bytes == 0 {
            return Err(Error::Config("tails.max_size_bytes must be positive".to_string()));
        }

        if let Some(job) = self.registries.iter().find(|j| j.registry_id.trim().is_empty()) {
            return Err(Error::Config(format!(
                "registry job with revoked {:?} has an empty registry_id",
                job.revoked
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "registry-recovery");
        assert_eq!(config.ledger.base_url, "http://localhost:8080");
        assert!(config.math.program.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_registry_jobs() {
        let config = Config::from_toml(
            r#"
            [ledger]
            base_url = "https://ledger.example.org/"

            [math]
            program = "/usr/local/bin/registry-math"
            args = ["--json"]

            [[registries]]
            registry_id = "P6UvpU451XA5p8Dx6zsuUu:4:P6UvpU451XA5p8Dx6zsuUu:3:CL:38189:CredentialRevoke:CL_ACCUM:bf7cc241-5cf8-45e5-8aa8-891d0656c666"
            revoked = [1, 3, 4, 5]

            [[registries]]
            registry_id = "KJKW5xiNXeGHLhXeMwH1pk:4:KJKW5xiNXeGHLhXeMwH1pk:3:CL:39610:default:CL_ACCUM:ec631ced-b985-403f-bdad-e7f2da219660"
            revoked = [1, 3, 5, 6]
            as_of = 1700000000
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.base_url, "https://ledger.example.org/");
        assert_eq!(config.ledger.request_timeout_secs, 30);
        assert_eq!(config.math.args, vec!["--json".to_string()]);
        assert_eq!(config.registries.len(), 2);
        assert_eq!(
            config.registries[0].desired_revoked(),
            RevokedIndexSet::from([1, 3, 4, 5])
        );
        assert_eq!(config.registries[0].as_of, None);
        assert_eq!(config.registries[1].as_of, Some(1_700_000_000));
    }

    #[test]
    fn test_invalid_ledger_url_rejected() {
        let result = Config::from_toml(
            r#"
            [ledger]
            base_url = "not a url"
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_registry_id_rejected() {
        let result = Config::from_toml(
            r#"
            [[registries]]
            registry_id = " "
            revoked = [1]
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
