//! Deterministic backend for simulated runs

use super::ClassificationBackend;
use crate::error::BackendError;
use crate::models::Telemetry;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

/// Maximum CPU percent below which the simulated backend reports a zombie
pub const SIMULATED_ZOMBIE_CPU_PERCENT: f64 = 5.0;

/// Backend answering from a fixed CPU threshold
///
/// Replies are JSON text so they pass through the same normalizer as any
/// remote backend.
pub struct SimulatedBackend {
    model: String,
}

impl SimulatedBackend {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new("simulated")
    }
}

#[async_trait]
impl ClassificationBackend for SimulatedBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn classify(&self, metadata: &Value, telemetry: &Telemetry) -> Result<String, BackendError> {
        let cpu = telemetry.max_cpu_percent;
        let resource = metadata
            .get("id")
            .or_else(|| metadata.get("InstanceId"))
            .cloned()
            .unwrap_or(Value::Null);
        info!(
            model = %self.model,
            resource = %resource,
            "Simulated analysis"
        );

        let reply = if cpu < SIMULATED_ZOMBIE_CPU_PERCENT {
            json!({
                "decision": "ZOMBIE",
                "reasoning": format!(
                    "Simulated analysis: extremely low utilization ({}% CPU); likely idle waste.",
                    cpu
                ),
                "confidence": 0.99
            })
        } else {
            json!({
                "decision": "ACTIVE",
                "reasoning": format!("Simulated analysis: resource is healthy and active ({}% CPU).", cpu),
                "confidence": 0.95
            })
        };

        Ok(reply.to_string())
    }
}
