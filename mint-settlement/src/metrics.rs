//! Metrics collection for observability
//!
//! Each coordinator owns its own Prometheus registry, so several coordinators
//! can live in one process.
//!
//! # Metrics
//!
//! - `mint_executions_started_total` - Executions that began tracking
//! - `mint_settlements_total{outcome}` - Settlements by outcome
//! - `mint_submission_attempts_total` - Transaction submission attempts
//! - `mint_settled_base_units_total` - Base units confirmed on-chain
//! - `mint_settlement_duration_seconds` - End of execution to settlement outcome

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct SettlementMetrics {
    /// Executions started
    pub executions_started: IntCounter,

    /// Settlements by outcome
    pub settlements: IntCounterVec,

    /// Submission attempts
    pub submission_attempts: IntCounter,

    /// Base units confirmed
    pub settled_base_units: IntCounter,

    /// Settlement latency histogram
    pub settlement_duration: Histogram,

    /// Prometheus registry
    registry: Arc<Registry>,
}

impl std::fmt::Debug for SettlementMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementMetrics")
            .field("executions_started", &self.executions_started.get())
            .field("submission_attempts", &self.submission_attempts.get())
            .field("settled_base_units", &self.settled_base_units.get())
            .finish_non_exhaustive()
    }
}

impl SettlementMetrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let executions_started = IntCounter::new(
            "mint_executions_started_total",
            "Executions that began tracking",
        )?;
        registry.register(Box::new(executions_started.clone()))?;

        let settlements = IntCounterVec::new(
            Opts::new("mint_settlements_total", "Settlements by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(settlements.clone()))?;

        let submission_attempts = IntCounter::new(
            "mint_submission_attempts_total",
            "Transaction submission attempts",
        )?;
        registry.register(Box::new(submission_attempts.clone()))?;

        let settled_base_units = IntCounter::new(
            "mint_settled_base_units_total",
            "Base units confirmed on-chain",
        )?;
        registry.register(Box::new(settled_base_units.clone()))?;

        let settlement_duration = Histogram::with_opts(
            HistogramOpts::new(
                "mint_settlement_duration_seconds",
                "End of execution to settlement outcome",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(settlement_duration.clone()))?;

        Ok(Self {
            executions_started,
            settlements,
            submission_attempts,
            settled_base_units,
            settlement_duration,
            registry,
        })
    }

    /// Record a settlement outcome
    pub fn record_outcome(&self, outcome: &str) {
        self.settlements.with_label_values(&[outcome]).inc();
    }

    /// Settlements recorded with `outcome`
    pub fn outcome_count(&self, outcome: &str) -> u64 {
        self.settlements.with_label_values(&[outcome]).get()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render in the Prometheus text format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_registries() {
        let a = SettlementMetrics::new().unwrap();
        let b = SettlementMetrics::new().unwrap();

        a.executions_started.inc();
        a.record_outcome("confirmed");

        assert_eq!(a.executions_started.get(), 1);
        assert_eq!(b.executions_started.get(), 0);
        assert_eq!(a.outcome_count("confirmed"), 1);
        assert_eq!(b.outcome_count("confirmed"), 0);
    }

    #[test]
    fn test_render_contains_metrics() {
        let metrics = SettlementMetrics::new().unwrap();
        metrics.submission_attempts.inc_by(3);
        metrics.record_outcome("failed");

        let text = metrics.render();
        assert!(text.contains("mint_submission_attempts_total 3"));
        assert!(text.contains("mint_settlements_total{outcome=\"failed\"} 1"));
    }
}
