//! Registry recovery binary
//!
//! Reconciles the configured registries (or a single one given on the
//! command line) and prints each produced delta as JSON on stdout.

use anyhow::Context;
use clap::Parser;
use registry_core::RevokedIndexSet;
use registry_recovery::{Config, RecoveryEngine, RegistryJob};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "registry-recover")]
#[command(about = "Reconcile revocation registries with their desired revocation state", long_about = None)]
struct Cli {
    /// Config file path (environment only if unset)
    #[arg(short, long, env = "RECOVERY_CONFIG")]
    config: Option<PathBuf>,

    /// Registry ID to reconcile instead of the configured list
    #[arg(short, long, requires = "revoked")]
    registry: Option<String>,

    /// Comma separated indexes that should be revoked, e.g. "1,3,4,5"
    #[arg(long, requires = "registry")]
    revoked: Option<String>,

    /// Ledger time to query (unix seconds, now if unset)
    #[arg(long, requires = "registry")]
    as_of: Option<u64>,

    /// Ledger gateway base URL
    #[arg(long)]
    ledger_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?;
            config.apply_env();
            config
        }
        None => Config::from_env().context("loading config from environment")?,
    };

    if let Some(url) = cli.ledger_url {
        config.ledger.base_url = url;
    }
    config.validate()?;

    let jobs = match (cli.registry, cli.revoked) {
        (Some(registry_id), Some(revoked)) => {
            let desired = RevokedIndexSet::parse_list(&revoked)
                .with_context(|| format!("parsing revoked indexes {:?}", revoked))?;
            vec![RegistryJob {
                registry_id,
                revoked: desired.to_vec(),
                as_of: cli.as_of,
            }]
        }
        _ => config.registries.clone(),
    };

    if jobs.is_empty() {
        anyhow::bail!("no registries to reconcile; pass --registry or configure [[registries]]");
    }

    tracing::info!(
        "Starting {} v{} for {} registries",
        config.service_name,
        config.service_version,
        jobs.len()
    );

    let engine = RecoveryEngine::from_config(&config)?;
    let outcomes = engine.run_all(&jobs).await;

    let mut failures = 0;
    for outcome in &outcomes {
        if let Some(delta) = outcome.delta() {
            println!("{}", delta.to_json()?);
        }
        if outcome.is_failure() {
            failures += 1;
        }
    }

    if let Some(path) = &config.metrics_output {
        engine
            .metrics()
            .write_to(path)
            .with_context(|| format!("writing metrics to {}", path.display()))?;
    }

    tracing::info!(
        "Finished: {} runs, {} failed",
        outcomes.len(),
        failures
    );

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
