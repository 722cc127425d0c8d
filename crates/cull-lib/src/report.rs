//! Final audit report
//!
//! Sensitive-looking metadata keys are redacted before anything is
//! written, and unknown rates stay `null` rather than collapsing to zero.

use crate::error::ReportError;
use crate::models::{Decision, Platform, RemediationOutcome, ResourceRecord, Telemetry};
use crate::remediation::{ActiveOpsReport, RemediationPlan};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

pub const SCRUB_MARKER: &str = "***SCRUBBED***";

/// Key fragments that mark a metadata value as sensitive
pub const SENSITIVE_KEY_FRAGMENTS: &[&str] =
    &["password", "secret", "key", "token", "auth", "credential"];

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|s| key.contains(s))
}

/// Recursively redact sensitive keys; a null document becomes `{}`
pub fn scrub_metadata(metadata: &Value) -> Value {
    match metadata {
        Value::Null => Value::Object(Map::new()),
        other => scrub(other),
    }
}

fn scrub(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_key(k) {
                        Value::String(SCRUB_MARKER.to_string())
                    } else {
                        scrub(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(scrub).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Sum over zombies with a known rate
    pub total_monthly_savings: f64,
    pub zombie_count: usize,
    pub unknown_rate_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportInstance {
    pub platform: Platform,
    pub id: String,
    #[serde(rename = "type")]
    pub machine_type: String,
    pub owner: String,
    pub metrics: Telemetry,
    pub status: Option<Decision>,
    pub reasoning: Option<String>,
    pub confidence: Option<f64>,
    pub hourly_rate: Option<f64>,
    pub monthly_cost: Option<f64>,
    pub rate_is_unknown: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iac_command: Option<String>,
    pub metadata: Value,
}

/// What active operations did to the planned resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationSection {
    pub planned: usize,
    pub stopped: usize,
    pub removed: usize,
    /// No stop succeeded, so state was left untouched
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_backup: Option<String>,
    pub outcomes: Vec<RemediationOutcome>,
}

impl RemediationSection {
    pub fn from_report(report: &ActiveOpsReport) -> Self {
        Self {
            planned: report.outcomes.len(),
            stopped: report.stops_succeeded(),
            removed: report.removals_succeeded(),
            aborted: report.aborted,
            state_backup: report
                .execution
                .as_ref()
                .and_then(|e| e.backup.as_ref())
                .map(|p| p.display().to_string()),
            outcomes: report.outcomes.clone(),
        }
    }

    /// At least one resource left the state
    pub fn is_success(&self) -> bool {
        !self.aborted && self.removed > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub summary: ReportSummary,
    pub instances: Vec<ReportInstance>,
    /// Present only when active operations ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<RemediationSection>,
}

impl AuditReport {
    /// Build from every audited record; plan actions are attached to the
    /// matching instances
    pub fn build(
        records: &[ResourceRecord],
        plan: Option<&RemediationPlan>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let actions: HashMap<&str, &str> = plan
            .map(|p| {
                p.resources
                    .iter()
                    .map(|e| (e.id.as_str(), e.suggested_iac_action.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        let zombies = records.iter().filter(|r| r.is_zombie());
        let summary = ReportSummary {
            total_monthly_savings: zombies.clone().filter_map(|r| r.monthly_cost()).sum(),
            zombie_count: zombies.clone().count(),
            unknown_rate_count: zombies.filter(|r| r.hourly_rate().is_none()).count(),
            timestamp,
        };

        let instances = records
            .iter()
            .map(|r| ReportInstance {
                platform: r.platform,
                id: r.id.clone(),
                machine_type: r.machine_type.clone(),
                owner: r.owner.clone(),
                metrics: r.telemetry,
                status: r.decision,
                reasoning: r.reasoning.clone(),
                confidence: r.confidence,
                hourly_rate: r.hourly_rate(),
                monthly_cost: r.monthly_cost(),
                rate_is_unknown: r.hourly_rate().is_none(),
                iac_command: actions.get(r.id.as_str()).map(|a| a.to_string()),
                metadata: scrub_metadata(&r.metadata),
            })
            .collect();

        Self {
            summary,
            instances,
            remediation: None,
        }
    }

    pub fn with_remediation(mut self, report: &ActiveOpsReport) -> Self {
        self.remediation = Some(RemediationSection::from_report(report));
        self
    }

    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let io_err = |source| ReportError::Io {
            source,
            path: path.to_path_buf(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?).map_err(io_err)?;
        info!(path = %path.display(), instances = self.instances.len(), "JSON report saved");
        Ok(())
    }
}
