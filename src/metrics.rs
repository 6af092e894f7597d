//! Provisioner Metrics
//!
//! Prometheus collectors for reconciliation runs. Each [`Metrics`] owns its
//! registry so tests and embedded brokers never share global state.

use crate::error::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Run duration buckets, in seconds (runs last up to ten minutes)
const DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0];

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    runs: IntCounterVec,
    run_duration: HistogramVec,
    diagnostics: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let runs = IntCounterVec::new(
            Opts::new("dbaas_reconciliation_runs_total", "Reconciliation runs by outcome"),
            &["operation", "outcome"],
        )?;
        let run_duration = HistogramVec::new(
            HistogramOpts::new(
                "dbaas_reconciliation_duration_seconds",
                "Wall time of reconciliation runs",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["operation"],
        )?;
        let diagnostics = IntCounterVec::new(
            Opts::new(
                "dbaas_controller_diagnostics_total",
                "Controller log diagnostics forwarded to callers",
            ),
            &["level"],
        )?;

        registry.register(Box::new(runs.clone()))?;
        registry.register(Box::new(run_duration.clone()))?;
        registry.register(Box::new(diagnostics.clone()))?;

        Ok(Self {
            registry,
            runs,
            run_duration,
            diagnostics,
        })
    }

    /// Record a finished run
    pub fn record_run(&self, operation: &str, outcome: &str, elapsed: Duration) {
        self.runs.with_label_values(&[operation, outcome]).inc();
        self.run_duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_diagnostic(&self, level: &str) {
        self.diagnostics.with_label_values(&[level]).inc();
    }

    /// Number of finished runs with this operation and outcome
    pub fn runs(&self, operation: &str, outcome: &str) -> u64 {
        self.runs.with_label_values(&[operation, outcome]).get()
    }

    /// Text exposition of every collector
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::error::Error::Internal(format!("metrics are not UTF-8: {}", e)))
    }
}
