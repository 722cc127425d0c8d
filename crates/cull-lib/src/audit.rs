//! End-to-end audit pipeline
//!
//! Discovery, enrichment, then classification and pricing per resource
//! across a bounded pool. The runner produces records and a summary; plan,
//! active operations and report writing are driven by the caller.

use crate::adapter::PlatformAdapter;
use crate::classify::{Classifier, PARSE_FAILURE_REASONING};
use crate::discovery::DiscoveryOrchestrator;
use crate::enrichment::{Aggregator, EnrichmentConfig};
use crate::models::ResourceRecord;
use crate::observability::{AuditMetrics, StructuredLogger};
use crate::pricing::PricingResolver;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::info;

/// Tunables for one audit run
#[derive(Debug, Clone)]
pub struct AuditSettings {
    pub enrichment: EnrichmentConfig,
    /// Concurrent classification and pricing lookups
    pub analysis_workers: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enrichment: EnrichmentConfig::default(),
            analysis_workers: 10,
        }
    }
}

/// Totals for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditSummary {
    pub scanned: usize,
    pub zombies: usize,
    /// Over zombies with a known rate only
    pub total_monthly_savings: f64,
    pub unknown_rate_count: usize,
    pub parse_failures: usize,
}

impl AuditSummary {
    pub fn from_records(records: &[ResourceRecord]) -> Self {
        let mut summary = Self {
            scanned: records.len(),
            ..Self::default()
        };
        for record in records {
            if record.reasoning.as_deref() == Some(PARSE_FAILURE_REASONING) {
                summary.parse_failures += 1;
            }
            if !record.is_zombie() {
                continue;
            }
            summary.zombies += 1;
            match record.monthly_cost() {
                Some(cost) => summary.total_monthly_savings += cost,
                None => summary.unknown_rate_count += 1,
            }
        }
        summary
    }
}

pub struct AuditOutcome {
    pub records: Vec<ResourceRecord>,
    pub summary: AuditSummary,
}

impl AuditOutcome {
    pub fn zombies(&self) -> Vec<ResourceRecord> {
        self.records.iter().filter(|r| r.is_zombie()).cloned().collect()
    }
}

pub struct AuditRunner {
    discovery: DiscoveryOrchestrator,
    aggregator: Aggregator,
    classifier: Classifier,
    pricing: Arc<PricingResolver>,
    analysis_workers: usize,
    metrics: AuditMetrics,
    logger: StructuredLogger,
}

impl AuditRunner {
    pub fn new(
        adapters: Vec<Arc<dyn PlatformAdapter>>,
        classifier: Classifier,
        pricing: Arc<PricingResolver>,
        settings: AuditSettings,
        metrics: AuditMetrics,
        logger: StructuredLogger,
    ) -> Self {
        let aggregator = Aggregator::new(&adapters, settings.enrichment);
        Self {
            discovery: DiscoveryOrchestrator::new(adapters).with_metrics(metrics.clone()),
            aggregator,
            classifier: classifier.with_metrics(metrics.clone()),
            pricing,
            analysis_workers: settings.analysis_workers.max(1),
            metrics,
            logger,
        }
    }

    pub fn adapters(&self) -> &[Arc<dyn PlatformAdapter>] {
        self.discovery.adapters()
    }

    pub async fn run(&self) -> AuditOutcome {
        let discovered = self.discovery.scan_all().await;
        self.metrics.set_resources_scanned(discovered.len());

        let enriched = self.aggregator.enrich(discovered).await;

        info!(
            resources = enriched.len(),
            workers = self.analysis_workers,
            "Analyzing resources"
        );
        let records: Vec<ResourceRecord> = stream::iter(enriched)
            .map(|record| self.analyze(record))
            .buffer_unordered(self.analysis_workers)
            .collect()
            .await;

        let summary = AuditSummary::from_records(&records);
        for zombie in records.iter().filter(|r| r.is_zombie()) {
            self.logger.log_zombie(
                zombie.platform.as_str(),
                &zombie.id,
                &zombie.owner,
                zombie.confidence,
                zombie.monthly_cost(),
            );
        }

        self.metrics.set_zombies_found(summary.zombies);
        self.metrics.set_potential_savings(summary.total_monthly_savings);
        self.metrics.set_unknown_rate_resources(summary.unknown_rate_count);
        self.logger.log_audit_completed(
            summary.scanned,
            summary.zombies,
            summary.unknown_rate_count,
            summary.total_monthly_savings,
        );

        AuditOutcome { records, summary }
    }

    async fn analyze(&self, mut record: ResourceRecord) -> ResourceRecord {
        let (classification, rate) = tokio::join!(
            self.classifier.classify(&record),
            self.pricing.rate(record.platform, &record.machine_type)
        );
        record.apply_classification(classification);
        record.set_rate(rate);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SimulatedAdapter;
    use crate::classify::SimulatedBackend;
    use crate::models::Platform;

    fn runner(adapters: Vec<Arc<dyn PlatformAdapter>>) -> AuditRunner {
        AuditRunner::new(
            adapters,
            Classifier::new(Arc::new(SimulatedBackend::default())),
            Arc::new(PricingResolver::offline()),
            AuditSettings::default(),
            AuditMetrics::new(),
            StructuredLogger::new("test-run"),
        )
    }

    #[tokio::test]
    async fn test_demo_audit_finds_idle_gpus() {
        let outcome = runner(SimulatedAdapter::demo_set()).run().await;

        assert!(outcome.summary.scanned >= 3);
        assert_eq!(outcome.summary.zombies, outcome.zombies().len());
        assert!(outcome.summary.zombies > 0);
        for zombie in outcome.zombies() {
            assert!(zombie.telemetry.max_cpu_percent < 5.0);
        }
    }

    #[tokio::test]
    async fn test_unknown_rates_counted_not_summed() {
        let outcome = runner(SimulatedAdapter::demo_set()).run().await;

        let known: f64 = outcome
            .zombies()
            .iter()
            .filter_map(|r| r.monthly_cost())
            .sum();
        let unknown = outcome
            .zombies()
            .iter()
            .filter(|r| r.hourly_rate().is_none())
            .count();

        assert_eq!(outcome.summary.total_monthly_savings, known);
        assert_eq!(outcome.summary.unknown_rate_count, unknown);
    }

    #[tokio::test]
    async fn test_failed_adapter_does_not_abort_run() {
        let adapters: Vec<Arc<dyn PlatformAdapter>> = vec![
            Arc::new(SimulatedAdapter::demo(Platform::Aws)),
            Arc::new(SimulatedAdapter::demo(Platform::Gcp).disconnected()),
        ];

        let outcome = runner(adapters).run().await;

        assert!(outcome.records.iter().all(|r| r.platform == Platform::Aws));
        assert!(!outcome.records.is_empty());
    }

    #[test]
    fn test_summary_counts_parse_failures() {
        use crate::models::{ClassificationResult, ResourceDescriptor};

        let mut record = ResourceRecord::from_descriptor(ResourceDescriptor {
            platform: Platform::Aws,
            id: "i-1".to_string(),
            machine_type: "g5.xlarge".to_string(),
            metadata: serde_json::Value::Null,
        });
        record.apply_classification(ClassificationResult::fallback(PARSE_FAILURE_REASONING));

        let summary = AuditSummary::from_records(&[record]);

        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.parse_failures, 1);
        assert_eq!(summary.zombies, 0);
    }
}
