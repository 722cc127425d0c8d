//! Observability infrastructure for the auditor
//!
//! Provides:
//! - Prometheus metrics (findings, savings, classification latency, failures)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for classification round-trips (in seconds)
const CLASSIFICATION_BUCKETS: &[f64] = &[
    0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AuditMetricsInner> = OnceLock::new();

struct AuditMetricsInner {
    zombies_found: Gauge,
    potential_savings_usd: Gauge,
    resources_scanned: IntGauge,
    unknown_rate_resources: IntGauge,
    adapter_failures: IntCounter,
    classification_latency_seconds: Histogram,
    classification_parse_failures: IntCounter,
    remediation_actions: IntCounterVec,
}

impl AuditMetricsInner {
    fn new() -> Self {
        Self {
            zombies_found: register_gauge!(
                "cloudcull_zombies_found_total",
                "Total number of zombie GPU instances found in the last audit"
            )
            .expect("Failed to register zombies_found"),

            potential_savings_usd: register_gauge!(
                "cloudcull_potential_savings_usd",
                "Projected monthly savings in USD across zombies with a known rate"
            )
            .expect("Failed to register potential_savings_usd"),

            resources_scanned: register_int_gauge!(
                "cloudcull_resources_scanned",
                "Number of GPU resources discovered in the last audit"
            )
            .expect("Failed to register resources_scanned"),

            unknown_rate_resources: register_int_gauge!(
                "cloudcull_unknown_rate_resources",
                "Number of zombies whose hourly rate could not be resolved"
            )
            .expect("Failed to register unknown_rate_resources"),

            adapter_failures: register_int_counter!(
                "cloudcull_adapter_failures_total",
                "Total number of platform adapter scan failures"
            )
            .expect("Failed to register adapter_failures"),

            classification_latency_seconds: register_histogram!(
                "cloudcull_classification_latency_seconds",
                "Time spent waiting on the classification backend",
                CLASSIFICATION_BUCKETS.to_vec()
            )
            .expect("Failed to register classification_latency_seconds"),

            classification_parse_failures: register_int_counter!(
                "cloudcull_classification_parse_failures_total",
                "Backend responses that contained no usable JSON object"
            )
            .expect("Failed to register classification_parse_failures"),

            remediation_actions: register_int_counter_vec!(
                "cloudcull_remediation_actions_total",
                "Remediation actions attempted, by action and outcome",
                &["action", "outcome"]
            )
            .expect("Failed to register remediation_actions"),
        }
    }
}

/// Audit metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct AuditMetrics {
    _private: (),
}

impl Default for AuditMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AuditMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AuditMetricsInner {
        GLOBAL_METRICS.get_or_init(AuditMetricsInner::new)
    }

    pub fn set_zombies_found(&self, count: usize) {
        self.inner().zombies_found.set(count as f64);
    }

    pub fn set_potential_savings(&self, usd: f64) {
        self.inner().potential_savings_usd.set(usd);
    }

    pub fn set_resources_scanned(&self, count: usize) {
        self.inner().resources_scanned.set(count as i64);
    }

    pub fn set_unknown_rate_resources(&self, count: usize) {
        self.inner().unknown_rate_resources.set(count as i64);
    }

    pub fn inc_adapter_failures(&self) {
        self.inner().adapter_failures.inc();
    }

    /// Record one backend round-trip
    pub fn observe_classification_latency(&self, duration_secs: f64) {
        self.inner()
            .classification_latency_seconds
            .observe(duration_secs);
    }

    pub fn inc_parse_failures(&self) {
        self.inner().classification_parse_failures.inc();
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        self.inner();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Count a stop or state-removal attempt
    pub fn record_remediation(&self, action: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.inner()
            .remediation_actions
            .with_label_values(&[action, outcome])
            .inc();
    }
}

/// Structured logger for audit events
///
/// Every event carries the run identifier so lines from one audit can be
/// correlated.
#[derive(Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Log audit startup
    pub fn log_audit_started(&self, version: &str, backend: &str, adapters: usize, active_ops: bool) {
        info!(
            event = "audit_started",
            run_id = %self.run_id,
            version = %version,
            backend = %backend,
            adapters = adapters,
            active_ops = active_ops,
            "Audit started"
        );
    }

    /// Log the outcome of preflight checks
    pub fn log_preflight(&self, healthy: &[String], removed: &[String]) {
        if removed.is_empty() {
            info!(
                event = "preflight_completed",
                run_id = %self.run_id,
                healthy = ?healthy,
                "All platform adapters passed preflight"
            );
        } else {
            warn!(
                event = "preflight_completed",
                run_id = %self.run_id,
                healthy = ?healthy,
                removed = ?removed,
                "Unhealthy platform adapters removed from the audit"
            );
        }
    }

    /// Log one zombie finding
    pub fn log_zombie(
        &self,
        platform: &str,
        resource_id: &str,
        owner: &str,
        confidence: Option<f64>,
        monthly_cost: Option<f64>,
    ) {
        warn!(
            event = "zombie_detected",
            run_id = %self.run_id,
            platform = %platform,
            resource_id = %resource_id,
            owner = %owner,
            confidence = ?confidence,
            monthly_cost = ?monthly_cost,
            "Zombie GPU instance detected"
        );
    }

    /// Log one remediation step
    pub fn log_remediation_step(&self, action: &str, resource_id: &str, success: bool, detail: &str) {
        if success {
            info!(
                event = "remediation_step",
                run_id = %self.run_id,
                action = %action,
                resource_id = %resource_id,
                success = true,
                "Remediation step succeeded"
            );
        } else {
            warn!(
                event = "remediation_step",
                run_id = %self.run_id,
                action = %action,
                resource_id = %resource_id,
                success = false,
                detail = %detail,
                "Remediation step failed"
            );
        }
    }

    /// Log the outcome of an active operations run
    pub fn log_remediation_summary(&self, planned: usize, stopped: usize, removed: usize, aborted: bool) {
        if aborted {
            warn!(
                event = "remediation_summary",
                run_id = %self.run_id,
                planned = planned,
                stopped = stopped,
                removed = removed,
                aborted = true,
                "Active operations aborted: no instance was stopped"
            );
        } else {
            info!(
                event = "remediation_summary",
                run_id = %self.run_id,
                planned = planned,
                stopped = stopped,
                removed = removed,
                aborted = false,
                "Active operations complete"
            );
        }
    }

    /// Log audit completion
    pub fn log_audit_completed(
        &self,
        scanned: usize,
        zombies: usize,
        unknown_rates: usize,
        monthly_savings: f64,
    ) {
        info!(
            event = "audit_completed",
            run_id = %self.run_id,
            scanned = scanned,
            zombies = zombies,
            unknown_rates = unknown_rates,
            monthly_savings = monthly_savings,
            "Audit completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_metrics_creation() {
        let metrics = AuditMetrics::new();

        metrics.set_zombies_found(3);
        metrics.set_potential_savings(24_000.5);
        metrics.set_resources_scanned(7);
        metrics.set_unknown_rate_resources(1);
        metrics.inc_adapter_failures();
        metrics.observe_classification_latency(0.2);
        metrics.inc_parse_failures();
        metrics.record_remediation("stop", true);
        metrics.record_remediation("state_rm", false);
    }

    #[test]
    fn test_metrics_are_exposed_in_default_registry() {
        let metrics = AuditMetrics::new();
        metrics.set_zombies_found(2);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "cloudcull_zombies_found_total"));
        assert!(families
            .iter()
            .any(|f| f.get_name() == "cloudcull_potential_savings_usd"));
    }

    #[test]
    fn test_encode_renders_text_format() {
        let metrics = AuditMetrics::new();
        metrics.record_remediation("stop", true);

        let text = metrics.encode().unwrap();
        assert!(text.contains("# TYPE cloudcull_resources_scanned gauge"));
        assert!(text.contains("# TYPE cloudcull_remediation_actions_total counter"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("run-42");
        assert_eq!(logger.run_id(), "run-42");
    }
}
