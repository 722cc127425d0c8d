//! Discovery across all healthy platform adapters
//!
//! Every adapter is scanned concurrently. An adapter that fails contributes
//! zero records and a logged error; it never aborts the run.

use crate::adapter::PlatformAdapter;
use crate::models::{Platform, ResourceRecord};
use crate::observability::AuditMetrics;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info};

/// Fans `scan()` out over the adapters that survived preflight
pub struct DiscoveryOrchestrator {
    adapters: Vec<Arc<dyn PlatformAdapter>>,
    metrics: Option<AuditMetrics>,
}

impl DiscoveryOrchestrator {
    pub fn new(adapters: Vec<Arc<dyn PlatformAdapter>>) -> Self {
        Self {
            adapters,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: AuditMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn adapters(&self) -> &[Arc<dyn PlatformAdapter>] {
        &self.adapters
    }

    /// Adapter owning resources of the given platform
    pub fn adapter_for(&self, platform: Platform) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.platform() == platform)
            .cloned()
    }

    /// Scan every adapter and concatenate the results
    pub async fn scan_all(&self) -> Vec<ResourceRecord> {
        let scans = self.adapters.iter().map(|adapter| async move {
            let platform = adapter.platform();
            (platform, adapter.scan().await)
        });

        let mut records = Vec::new();
        for (platform, result) in join_all(scans).await {
            match result {
                Ok(descriptors) => {
                    info!(
                        platform = %platform,
                        count = descriptors.len(),
                        "Discovery complete for platform"
                    );
                    records.extend(descriptors.into_iter().map(ResourceRecord::from_descriptor));
                }
                Err(e) => {
                    error!(
                        platform = %platform,
                        phase = "discovery",
                        error = %e,
                        "Platform scan failed, continuing without it"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_adapter_failures();
                    }
                }
            }
        }

        records
    }
}
