//! Lifecycle metrics for observability.
//!
//! Provides Prometheus metrics for:
//! - Issuance runs by operation and outcome
//! - Issuance run duration
//! - Challenge records left behind after failed teardown
//! - Renewal sweeps and per-task outcomes
//! - Fleet status gauges, refreshed by health checks
//!
//! Metrics live in a registry owned by the manager so several managers
//! (tests, embedded use) never collide on global registration.

use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::health::HealthSummary;

/// Lifecycle metrics collector.
#[derive(Debug, Clone)]
pub struct LifecycleMetrics {
    registry: Registry,

    /// Labels: operation (issue, renew), outcome
    issuance_total: IntCounterVec,

    /// Labels: operation
    issuance_duration: HistogramVec,

    /// Challenge records that could not be removed
    cleanup_debt_total: IntCounter,

    renewal_sweeps_total: IntCounter,

    /// Labels: outcome (renewed, failed, transient, skipped)
    renewal_tasks_total: IntCounterVec,

    /// Labels: bucket (total, valid, expiring_soon, expired, failed)
    certificates: IntGaugeVec,
}

impl LifecycleMetrics {
    /// Create metrics registered in a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("certkeeper".to_string()), None)
            .context("Failed to create metrics registry")?;

        let issuance_total = IntCounterVec::new(
            Opts::new("issuance_total", "Issuance runs by operation and outcome"),
            &["operation", "outcome"],
        )
        .context("Failed to create issuance_total metric")?;

        let issuance_duration = HistogramVec::new(
            HistogramOpts::new("issuance_duration_seconds", "Duration of issuance runs")
                .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
            &["operation"],
        )
        .context("Failed to create issuance_duration metric")?;

        let cleanup_debt_total = IntCounter::new(
            "cleanup_debt_total",
            "Challenge records left in DNS after failed teardown",
        )
        .context("Failed to create cleanup_debt_total metric")?;

        let renewal_sweeps_total =
            IntCounter::new("renewal_sweeps_total", "Completed renewal sweeps")
                .context("Failed to create renewal_sweeps_total metric")?;

        let renewal_tasks_total = IntCounterVec::new(
            Opts::new("renewal_tasks_total", "Renewal tasks by outcome"),
            &["outcome"],
        )
        .context("Failed to create renewal_tasks_total metric")?;

        let certificates = IntGaugeVec::new(
            Opts::new("certificates", "Managed certificates by health bucket"),
            &["bucket"],
        )
        .context("Failed to create certificates metric")?;

        registry
            .register(Box::new(issuance_total.clone()))
            .context("Failed to register issuance_total metric")?;
        registry
            .register(Box::new(issuance_duration.clone()))
            .context("Failed to register issuance_duration metric")?;
        registry
            .register(Box::new(cleanup_debt_total.clone()))
            .context("Failed to register cleanup_debt_total metric")?;
        registry
            .register(Box::new(renewal_sweeps_total.clone()))
            .context("Failed to register renewal_sweeps_total metric")?;
        registry
            .register(Box::new(renewal_tasks_total.clone()))
            .context("Failed to register renewal_tasks_total metric")?;
        registry
            .register(Box::new(certificates.clone()))
            .context("Failed to register certificates metric")?;

        Ok(Self {
            registry,
            issuance_total,
            issuance_duration,
            cleanup_debt_total,
            renewal_sweeps_total,
            renewal_tasks_total,
            certificates,
        })
    }

    /// Record one issuance run.
    ///
    /// `outcome` is `success` or an error kind label.
    pub fn record_issuance(&self, operation: &str, outcome: &str, duration_secs: f64) {
        self.issuance_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.issuance_duration
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Record challenge records that could not be removed.
    pub fn record_cleanup_debt(&self, records: usize) {
        if records > 0 {
            self.cleanup_debt_total.inc_by(records as u64);
        }
    }

    pub fn record_sweep(&self) {
        self.renewal_sweeps_total.inc();
    }

    pub fn record_renewal_task(&self, outcome: &str) {
        self.renewal_tasks_total.with_label_values(&[outcome]).inc();
    }

    /// Refresh the fleet gauges from a health summary.
    pub fn observe_health(&self, summary: &HealthSummary) {
        for (bucket, value) in [
            ("total", summary.total),
            ("valid", summary.valid),
            ("expiring_soon", summary.expiring_soon),
            ("expired", summary.expired),
            ("failed", summary.failed),
        ] {
            self.certificates
                .with_label_values(&[bucket])
                .set(value as i64);
        }
    }

    pub fn issuance_count(&self, operation: &str, outcome: &str) -> u64 {
        self.issuance_total
            .with_label_values(&[operation, outcome])
            .get()
    }

    pub fn cleanup_debt(&self) -> u64 {
        self.cleanup_debt_total.get()
    }

    pub fn sweeps(&self) -> u64 {
        self.renewal_sweeps_total.get()
    }

    /// Text exposition of every metric in the registry.
    pub fn export_prometheus(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics output is not UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_registries() {
        let a = LifecycleMetrics::new().unwrap();
        let b = LifecycleMetrics::new().unwrap();

        a.record_issuance("issue", "success", 2.0);
        a.record_cleanup_debt(2);
        a.record_cleanup_debt(0);

        assert_eq!(a.issuance_count("issue", "success"), 1);
        assert_eq!(b.issuance_count("issue", "success"), 0);
        assert_eq!(a.cleanup_debt(), 2);
    }

    #[test]
    fn test_export_contains_prefixed_names() {
        let metrics = LifecycleMetrics::new().unwrap();
        metrics.record_sweep();
        metrics.record_renewal_task("renewed");
        metrics.observe_health(&HealthSummary::default());

        let text = metrics.export_prometheus().unwrap();
        assert!(text.contains("certkeeper_renewal_sweeps_total 1"));
        assert!(text.contains("certkeeper_renewal_tasks_total{outcome=\"renewed\"} 1"));
        assert!(text.contains("certkeeper_certificates{bucket=\"total\"} 0"));
    }
}
