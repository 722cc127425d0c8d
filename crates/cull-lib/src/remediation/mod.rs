//! Remediation planning and active operations
//!
//! The planner turns zombie records into a plan document without touching
//! anything. Active operations stop each resource through its adapter and
//! only then reconcile the infrastructure state for the ones that stopped.

pub mod executor;
pub mod terraform;

pub use executor::{EntryFailure, ExecutionSummary, RemediationExecutor, StateStore};
pub use terraform::TerraformStateStore;

use crate::adapter::PlatformAdapter;
use crate::error::PlanError;
use crate::models::{format_usd, Platform, RemediationOutcome, RemediationPlanEntry, ResourceRecord};
use crate::observability::{AuditMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub const PLAN_VERSION: &str = "1.0";
pub const PLAN_ACTION: &str = "decommission";
pub const REMEDIATION_TYPE: &str = "GitOps / State Management";
/// Emitted instead of a command when the id cannot be quoted for a shell
pub const INVALID_IAC_ACTION: &str = "INVALID_RESOURCE_ID";

/// State resource type per platform
pub const RESOURCE_TYPES: &[(Platform, &str)] = &[
    (Platform::Aws, "aws_instance"),
    (Platform::Azure, "azurerm_linux_virtual_machine"),
    (Platform::Gcp, "google_compute_instance"),
];

pub fn resource_type_for(platform: Platform) -> Option<&'static str> {
    RESOURCE_TYPES
        .iter()
        .find(|(p, _)| *p == platform)
        .map(|(_, t)| *t)
}

/// Decommission plan for one audit run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationPlan {
    pub version: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub resources: Vec<RemediationPlanEntry>,
}

impl RemediationPlan {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Subset of this plan containing only the given resource ids
    pub fn retain_ids(&self, ids: &HashSet<String>) -> Self {
        Self {
            resources: self
                .resources
                .iter()
                .filter(|entry| ids.contains(&entry.id))
                .cloned()
                .collect(),
            ..self.clone()
        }
    }

    /// Write the plan as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), PlanError> {
        let io_err = |source| PlanError::Io {
            source,
            path: path.to_path_buf(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(io_err)?;
        info!(path = %path.display(), entries = self.resources.len(), "Remediation manifest saved");
        Ok(())
    }

    /// Fill in the state addresses an execution resolved; returns how many
    /// entries were updated
    pub fn record_addresses(&mut self, summary: &ExecutionSummary) -> usize {
        let mut updated = 0;
        for entry in &mut self.resources {
            if let Some(address) = summary.address_of(&entry.id) {
                entry.state_address = Some(address.to_string());
                updated += 1;
            }
        }
        updated
    }

    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Maps zombie records to plan entries; performs no I/O
#[derive(Debug, Default, Clone, Copy)]
pub struct Planner;

impl Planner {
    pub fn plan(&self, records: &[ResourceRecord]) -> RemediationPlan {
        self.plan_at(records, Utc::now())
    }

    /// Only ZOMBIE-decided records enter the plan
    pub fn plan_at(&self, records: &[ResourceRecord], timestamp: DateTime<Utc>) -> RemediationPlan {
        let resources = records
            .iter()
            .filter(|r| r.is_zombie())
            .map(|record| {
                let resource_type = resource_type_for(record.platform).unwrap_or("cloud_resource");
                let monthly_savings = record.monthly_cost();
                RemediationPlanEntry {
                    id: record.id.clone(),
                    platform: record.platform,
                    machine_type: record.machine_type.clone(),
                    owner: record.owner.clone(),
                    monthly_savings,
                    savings_potential: monthly_savings
                        .map(|s| format!("{}/mo", format_usd(s)))
                        .unwrap_or_else(|| "UNKNOWN".to_string()),
                    remediation_type: REMEDIATION_TYPE.to_string(),
                    suggested_iac_action: suggested_state_rm(resource_type, &record.id),
                    state_address: None,
                }
            })
            .collect();

        RemediationPlan {
            version: PLAN_VERSION.to_string(),
            action: PLAN_ACTION.to_string(),
            timestamp,
            resources,
        }
    }
}

/// Shell-ready `terraform state rm` line; the id is quoted so the manifest
/// can be pasted into a shell or run by CI as-is
fn suggested_state_rm(resource_type: &str, id: &str) -> String {
    if !executor::is_safe_resource_id(id) {
        warn!(resource_id = %id, phase = "planning", "Resource id fails the allow-list; executor will reject it");
    }
    match shlex::try_quote(id) {
        Ok(quoted) => format!("terraform state rm {}.{}", resource_type, quoted),
        Err(_) => INVALID_IAC_ACTION.to_string(),
    }
}

/// Result of a stop-then-remove run
#[derive(Debug, Clone)]
pub struct ActiveOpsReport {
    pub outcomes: Vec<RemediationOutcome>,
    /// Set when no stop succeeded and state reconciliation was skipped
    pub aborted: bool,
    pub execution: Option<ExecutionSummary>,
}

impl ActiveOpsReport {
    pub fn stops_succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.stop_success).count()
    }

    pub fn removals_succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state_removal_success)
            .count()
    }
}

/// Stop-then-remove driver
///
/// Stops every planned resource through its owning adapter and forwards
/// only the successfully stopped ones to the executor. State removal never
/// starts before every stop call has returned.
pub struct ActiveOps {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
    executor: RemediationExecutor,
    metrics: Option<AuditMetrics>,
    logger: StructuredLogger,
}

impl ActiveOps {
    pub fn new(adapters: &[Arc<dyn PlatformAdapter>], executor: RemediationExecutor) -> Self {
        Self {
            adapters: adapters
                .iter()
                .map(|a| (a.platform(), Arc::clone(a)))
                .collect(),
            executor,
            metrics: None,
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn with_metrics(mut self, metrics: AuditMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// `zombies` supplies the metadata each adapter needs to stop a resource
    pub async fn run(&self, plan: &RemediationPlan, zombies: &[ResourceRecord]) -> ActiveOpsReport {
        let metadata: HashMap<&str, &Value> = zombies
            .iter()
            .map(|r| (r.id.as_str(), &r.metadata))
            .collect();

        let stops = plan.resources.iter().map(|entry| {
            let adapter = self.adapters.get(&entry.platform).cloned();
            let meta = metadata.get(entry.id.as_str()).copied().cloned().unwrap_or(Value::Null);
            async move {
                let result = match adapter {
                    Some(adapter) => adapter
                        .stop(&entry.id, &meta)
                        .await
                        .map_err(|e| e.to_string()),
                    None => Err(format!("no adapter for platform {}", entry.platform)),
                };
                (entry.id.clone(), result)
            }
        });

        let mut outcomes = Vec::with_capacity(plan.resources.len());
        let mut stopped = HashSet::new();
        for (resource_id, result) in join_all(stops).await {
            let success = result.is_ok();
            if let Some(metrics) = &self.metrics {
                metrics.record_remediation("stop", success);
            }
            self.logger.log_remediation_step(
                "stop",
                &resource_id,
                success,
                result.as_ref().err().map(String::as_str).unwrap_or(""),
            );
            if success {
                stopped.insert(resource_id.clone());
            }
            outcomes.push(RemediationOutcome {
                resource_id,
                stop_success: success,
                state_removal_success: false,
                state_address: None,
                error: result.err(),
            });
        }

        if stopped.is_empty() {
            warn!(planned = plan.resources.len(), "No resource stopped, state reconciliation skipped");
            return ActiveOpsReport {
                outcomes,
                aborted: true,
                execution: None,
            };
        }

        let summary = self.executor.execute(&plan.retain_ids(&stopped)).await;
        let failures: HashMap<&str, &str> = summary
            .failures
            .iter()
            .map(|f| (f.resource_id.as_str(), f.reason.as_str()))
            .collect();
        for outcome in outcomes.iter_mut().filter(|o| o.stop_success) {
            if let Some(address) = summary.address_of(&outcome.resource_id) {
                outcome.state_removal_success = true;
                outcome.state_address = Some(address.to_string());
            } else if let Some(reason) = failures.get(outcome.resource_id.as_str()) {
                outcome.error = Some(reason.to_string());
            }
        }

        ActiveOpsReport {
            outcomes,
            aborted: false,
            execution: Some(summary),
        }
    }
}
