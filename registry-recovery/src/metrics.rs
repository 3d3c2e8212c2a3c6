//! Metrics collection for recovery runs
//!
//! # Metrics
//!
//! - `recovery_runs_total{outcome}` - Runs by outcome (`no_update`, `updated`, or an error kind)
//! - `recovery_consistency_warnings_total` - Runs where the ledger revoked indexes missing locally
//! - `recovery_indexes_revoked_total` - Indexes included in produced deltas
//! - `recovery_run_duration_seconds` - Histogram of run durations

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::path::Path;

/// Metrics collector
///
/// Each collector owns its registry so several engines can coexist.
#[derive(Clone)]
pub struct Metrics {
    /// Runs by outcome
    pub runs_total: IntCounterVec,

    /// Consistency warnings raised
    pub consistency_warnings: IntCounter,

    /// Indexes revoked by produced deltas
    pub indexes_revoked: IntCounter,

    /// Run duration histogram
    pub run_duration: Histogram,

    /// Prometheus registry
    pub registry: Registry,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let runs_total = IntCounterVec::new(
            Opts::new("recovery_runs_total", "Recovery runs by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(runs_total.clone()))?;

        let consistency_warnings = IntCounter::new(
            "recovery_consistency_warnings_total",
            "Runs where ledger revocations were missing from the desired state",
        )?;
        registry.register(Box::new(consistency_warnings.clone()))?;

        let indexes_revoked = IntCounter::new(
            "recovery_indexes_revoked_total",
            "Credential indexes revoked by produced deltas",
        )?;
        registry.register(Box::new(indexes_revoked.clone()))?;

        let run_duration = Histogram::with_opts(
            HistogramOpts::new("recovery_run_duration_seconds", "Recovery run duration")
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(run_duration.clone()))?;

        Ok(Self {
            runs_total,
            consistency_warnings,
            indexes_revoked,
            run_duration,
            registry,
        })
    }

    /// Record a finished run
    pub fn record_run(&self, outcome: &str, duration_secs: f64) {
        self.runs_total.with_label_values(&[outcome]).inc();
        self.run_duration.observe(duration_secs);
    }

    /// Render in Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Write the text format to `path` (textfile collector style)
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let text = self
            .render()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, text)
    }
}
