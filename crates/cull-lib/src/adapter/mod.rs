//! Platform adapter abstraction
//!
//! Each cloud platform is reached through one implementation of
//! [`PlatformAdapter`]. Orchestration code only ever holds the trait object,
//! so concrete clients can be swapped without touching the pipeline.

mod simulated;

pub use simulated::{FixtureResource, Inventory, SimulatedAdapter};

use crate::error::AdapterError;
use crate::models::{Platform, ResourceDescriptor, Telemetry};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Instance family prefixes treated as GPU capable on AWS
pub const AWS_GPU_FAMILIES: &[&str] = &["p3", "p4", "g4", "g5", "p5"];

/// VM size series treated as GPU capable on Azure
pub const AZURE_GPU_SERIES: &[&str] = &["NC", "ND", "NV"];

/// Machine type prefixes treated as GPU capable on GCP
pub const GCP_GPU_PREFIXES: &[&str] = &["a2-", "a3-", "g2-"];

/// Operations every cloud platform integration provides
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Platform served by this adapter
    fn platform(&self) -> Platform;

    /// List running GPU-relevant resources
    async fn scan(&self) -> Result<Vec<ResourceDescriptor>, AdapterError>;

    /// Whether [`PlatformAdapter::batch_metrics`] covers many resources in one call
    fn supports_batch_metrics(&self) -> bool {
        false
    }

    /// Telemetry for many resources over the trailing hour, keyed by resource id
    async fn batch_metrics(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Telemetry>, AdapterError>;

    /// Telemetry for a single resource over the trailing hour
    async fn metrics(&self, id: &str, metadata: &Value) -> Result<Telemetry, AdapterError>;

    /// Owner lookup through the platform's audit log
    async fn attribution(&self, id: &str, metadata: &Value) -> Result<String, AdapterError>;

    /// Stop the resource. Stopping an already stopped resource succeeds.
    async fn stop(&self, id: &str, metadata: &Value) -> Result<(), AdapterError>;

    /// Actively validate credentials and connectivity
    async fn verify_connection(&self) -> bool;
}

/// Whether a machine type belongs to a GPU family on the given platform
pub fn is_gpu_machine_type(platform: Platform, machine_type: &str, metadata: &Value) -> bool {
    match platform {
        Platform::Aws => AWS_GPU_FAMILIES.iter().any(|f| machine_type.contains(f)),
        Platform::Azure => AZURE_GPU_SERIES.iter().any(|s| machine_type.contains(s)),
        Platform::Gcp => {
            let has_accelerators = metadata
                .get("guest_accelerators")
                .and_then(Value::as_array)
                .map(|a| !a.is_empty())
                .unwrap_or(false);
            has_accelerators || GCP_GPU_PREFIXES.iter().any(|p| machine_type.contains(p))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gpu_filter_per_platform() {
        let empty = json!({});
        assert!(is_gpu_machine_type(Platform::Aws, "p4d.24xlarge", &empty));
        assert!(!is_gpu_machine_type(Platform::Aws, "m5.large", &empty));
        assert!(is_gpu_machine_type(Platform::Azure, "Standard_NC6", &empty));
        assert!(!is_gpu_machine_type(Platform::Azure, "Standard_D2s_v3", &empty));
        assert!(is_gpu_machine_type(Platform::Gcp, "a2-highgpu-1g", &empty));
        assert!(!is_gpu_machine_type(Platform::Gcp, "n1-standard-4", &empty));
    }

    #[test]
    fn test_gcp_accelerators_count_as_gpu() {
        let metadata = json!({"guest_accelerators": [{"type": "nvidia-tesla-t4"}]});
        assert!(is_gpu_machine_type(Platform::Gcp, "n1-standard-4", &metadata));
    }
}
