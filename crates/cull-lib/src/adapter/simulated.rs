//! Fixture-backed adapter for simulated runs and inventory replays

use super::{is_gpu_machine_type, PlatformAdapter};
use crate::error::AdapterError;
use crate::models::{Platform, ResourceDescriptor, Telemetry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// One resource known to a simulated adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureResource {
    pub platform: Platform,
    pub id: String,
    pub machine_type: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub telemetry: Telemetry,
    /// Owner reported by the audit-log fallback
    #[serde(default)]
    pub audit_owner: Option<String>,
    #[serde(default = "default_running")]
    pub running: bool,
}

fn default_running() -> bool {
    true
}

/// Inventory file format consumed by [`SimulatedAdapter::from_inventory`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub resources: Vec<FixtureResource>,
}

/// Adapter answering every call from in-memory fixtures
///
/// Stops are recorded rather than executed, which keeps the adapter
/// idempotent and lets tests observe what the pipeline attempted.
pub struct SimulatedAdapter {
    platform: Platform,
    resources: Vec<FixtureResource>,
    batch_metrics: bool,
    connected: bool,
    stopped: Mutex<HashSet<String>>,
    attribution_calls: AtomicUsize,
    metric_calls: AtomicUsize,
}

impl SimulatedAdapter {
    pub fn new(platform: Platform, resources: Vec<FixtureResource>) -> Self {
        Self {
            platform,
            resources,
            // Only AWS exposes a batched metrics API
            batch_metrics: platform == Platform::Aws,
            connected: true,
            stopped: Mutex::new(HashSet::new()),
            attribution_calls: AtomicUsize::new(0),
            metric_calls: AtomicUsize::new(0),
        }
    }

    /// Override whether batched telemetry is offered
    pub fn with_batch_metrics(mut self, enabled: bool) -> Self {
        self.batch_metrics = enabled;
        self
    }

    /// Simulate a platform whose credentials do not verify
    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    /// Demo fixture for one platform
    pub fn demo(platform: Platform) -> Self {
        let resource = match platform {
            Platform::Aws => FixtureResource {
                platform,
                id: "i-0a1b2c3d4e5f6g7h8".to_string(),
                machine_type: "p4d.24xlarge".to_string(),
                metadata: json!({
                    "InstanceId": "i-0a1b2c3d4e5f6g7h8",
                    "InstanceType": "p4d.24xlarge",
                    "Tags": [{"Key": "Owner", "Value": "research_lead"}]
                }),
                telemetry: Telemetry {
                    max_cpu_percent: 0.2,
                    network_in_mb: 0.05,
                },
                audit_owner: None,
                running: true,
            },
            Platform::Azure => FixtureResource {
                platform,
                id: "mock-vm-gpu-01".to_string(),
                machine_type: "Standard_NC6".to_string(),
                metadata: json!({
                    "location": "eastus",
                    "resource_id": "/subscriptions/demo/resourceGroups/ml-rg/providers/Microsoft.Compute/virtualMachines/mock-vm-gpu-01",
                    "tags": {}
                }),
                telemetry: Telemetry {
                    max_cpu_percent: 1.2,
                    network_in_mb: 0.01,
                },
                audit_owner: Some("dev_analyst".to_string()),
                running: true,
            },
            Platform::Gcp => FixtureResource {
                platform,
                id: "mock-gpu-node-99".to_string(),
                machine_type: "a2-highgpu-1g".to_string(),
                metadata: json!({"zone": "us-central1-a", "id": "9999", "labels": {}}),
                telemetry: Telemetry {
                    max_cpu_percent: 0.5,
                    network_in_mb: 0.02,
                },
                audit_owner: Some("ml_engineer".to_string()),
                running: true,
            },
        };
        Self::new(platform, vec![resource])
    }

    /// Demo adapters for every supported platform
    pub fn demo_set() -> Vec<Arc<dyn PlatformAdapter>> {
        Platform::ALL
            .iter()
            .map(|p| Arc::new(Self::demo(*p)) as Arc<dyn PlatformAdapter>)
            .collect()
    }

    /// Build one adapter per platform present in an inventory file
    pub fn from_inventory(path: &Path) -> Result<Vec<Arc<dyn PlatformAdapter>>, AdapterError> {
        let inventory_error = |reason: String| AdapterError::Inventory {
            path: path.to_path_buf(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| inventory_error(e.to_string()))?;
        let inventory: Inventory =
            serde_json::from_str(&content).map_err(|e| inventory_error(e.to_string()))?;

        let mut by_platform: HashMap<Platform, Vec<FixtureResource>> = HashMap::new();
        for resource in inventory.resources {
            by_platform.entry(resource.platform).or_default().push(resource);
        }

        Ok(Platform::ALL
            .iter()
            .filter_map(|p| by_platform.remove(p).map(|r| (*p, r)))
            .map(|(p, r)| Arc::new(Self::new(p, r)) as Arc<dyn PlatformAdapter>)
            .collect())
    }

    /// Ids stopped so far
    pub fn stopped_ids(&self) -> Vec<String> {
        let stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = stopped.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of audit-log attribution lookups served
    pub fn attribution_calls(&self) -> usize {
        self.attribution_calls.load(Ordering::SeqCst)
    }

    /// Number of telemetry calls served (a batch counts once)
    pub fn metric_calls(&self) -> usize {
        self.metric_calls.load(Ordering::SeqCst)
    }

    fn find(&self, id: &str) -> Option<&FixtureResource> {
        self.resources.iter().find(|r| r.id == id)
    }

    fn ensure_connected(&self) -> Result<(), AdapterError> {
        if self.connected {
            Ok(())
        } else {
            Err(AdapterError::NotConnected {
                platform: self.platform.to_string(),
                reason: "simulated credentials rejected".to_string(),
            })
        }
    }
}

#[async_trait]
impl PlatformAdapter for SimulatedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn scan(&self) -> Result<Vec<ResourceDescriptor>, AdapterError> {
        self.ensure_connected()?;
        info!(platform = %self.platform, "Probing simulated platform for GPU resources");

        Ok(self
            .resources
            .iter()
            .filter(|r| r.running)
            .filter(|r| is_gpu_machine_type(self.platform, &r.machine_type, &r.metadata))
            .map(|r| ResourceDescriptor {
                platform: self.platform,
                id: r.id.clone(),
                machine_type: r.machine_type.clone(),
                metadata: r.metadata.clone(),
            })
            .collect())
    }

    fn supports_batch_metrics(&self) -> bool {
        self.batch_metrics
    }

    async fn batch_metrics(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Telemetry>, AdapterError> {
        self.ensure_connected()?;
        self.metric_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ids
            .iter()
            .filter_map(|id| self.find(id).map(|r| (id.clone(), r.telemetry)))
            .collect())
    }

    async fn metrics(&self, id: &str, _metadata: &Value) -> Result<Telemetry, AdapterError> {
        self.ensure_connected()?;
        self.metric_calls.fetch_add(1, Ordering::SeqCst);
        self.find(id)
            .map(|r| r.telemetry)
            .ok_or_else(|| AdapterError::NotFound(id.to_string()))
    }

    async fn attribution(&self, id: &str, _metadata: &Value) -> Result<String, AdapterError> {
        self.ensure_connected()?;
        self.attribution_calls.fetch_add(1, Ordering::SeqCst);
        let resource = self
            .find(id)
            .ok_or_else(|| AdapterError::NotFound(id.to_string()))?;
        resource
            .audit_owner
            .clone()
            .ok_or_else(|| AdapterError::Operation {
                operation: "attribution",
                resource_id: id.to_string(),
                reason: "no creation event in audit log".to_string(),
            })
    }

    async fn stop(&self, id: &str, _metadata: &Value) -> Result<(), AdapterError> {
        self.ensure_connected()?;
        if self.find(id).is_none() {
            return Err(AdapterError::NotFound(id.to_string()));
        }

        let mut stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        if !stopped.insert(id.to_string()) {
            warn!(platform = %self.platform, resource_id = %id, "[SIMULATED] Resource already stopped");
        } else {
            info!(platform = %self.platform, resource_id = %id, "[SIMULATED] Stopped resource");
        }
        Ok(())
    }

    async fn verify_connection(&self) -> bool {
        self.connected
    }
}
