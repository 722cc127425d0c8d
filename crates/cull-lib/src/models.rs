//! Core data models for the auditor

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Hours used to turn an hourly rate into a monthly figure
pub const HOURS_PER_MONTH: f64 = 730.0;

/// Owner recorded when attribution is impossible
pub const UNKNOWN_OWNER: &str = "Unknown";

/// Cloud platforms with a known adapter and state resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    Aws,
    Azure,
    Gcp,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Aws, Platform::Azure, Platform::Gcp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Aws => "AWS",
            Platform::Azure => "AZURE",
            Platform::Gcp => "GCP",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AWS" => Ok(Platform::Aws),
            "AZURE" => Ok(Platform::Azure),
            "GCP" => Ok(Platform::Gcp),
            other => Err(format!("unsupported platform: {}", other)),
        }
    }
}

/// Raw discovery output of an adapter scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub platform: Platform,
    pub id: String,
    pub machine_type: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Trailing-window utilisation of a resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub max_cpu_percent: f64,
    pub network_in_mb: f64,
}

/// Classification verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Zombie,
    Active,
}

impl Decision {
    /// Parse a backend verdict; anything but a clear ZOMBIE/ACTIVE is rejected
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ZOMBIE" => Some(Decision::Zombie),
            "ACTIVE" => Some(Decision::Active),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Zombie => "ZOMBIE",
            Decision::Active => "ACTIVE",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized output of a classification backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub decision: Decision,
    pub reasoning: String,
    pub confidence: f64,
}

impl ClassificationResult {
    /// Safe verdict used whenever the backend output cannot be trusted
    pub fn fallback(reasoning: impl Into<String>) -> Self {
        Self {
            decision: Decision::Active,
            reasoning: reasoning.into(),
            confidence: 0.0,
        }
    }
}

/// A discovered resource flowing through the audit pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub platform: Platform,
    pub id: String,
    pub machine_type: String,
    pub metadata: Value,
    pub telemetry: Telemetry,
    pub owner: String,
    pub decision: Option<Decision>,
    pub reasoning: Option<String>,
    pub confidence: Option<f64>,
    hourly_rate: Option<f64>,
    monthly_cost: Option<f64>,
}

impl ResourceRecord {
    pub fn from_descriptor(descriptor: ResourceDescriptor) -> Self {
        Self {
            platform: descriptor.platform,
            id: descriptor.id,
            machine_type: descriptor.machine_type,
            metadata: descriptor.metadata,
            telemetry: Telemetry::default(),
            owner: UNKNOWN_OWNER.to_string(),
            decision: None,
            reasoning: None,
            confidence: None,
            hourly_rate: None,
            monthly_cost: None,
        }
    }

    /// Record the hourly rate; the monthly cost is derived from it and
    /// stays absent when the rate is unknown
    pub fn set_rate(&mut self, rate: Option<f64>) {
        self.hourly_rate = rate;
        self.monthly_cost = rate.map(|r| r * HOURS_PER_MONTH);
    }

    pub fn hourly_rate(&self) -> Option<f64> {
        self.hourly_rate
    }

    pub fn monthly_cost(&self) -> Option<f64> {
        self.monthly_cost
    }

    pub fn apply_classification(&mut self, result: ClassificationResult) {
        self.decision = Some(result.decision);
        self.reasoning = Some(result.reasoning);
        self.confidence = Some(result.confidence);
    }

    pub fn is_zombie(&self) -> bool {
        self.decision == Some(Decision::Zombie)
    }
}

/// One planned remediation, derived from a zombie record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationPlanEntry {
    pub id: String,
    pub platform: Platform,
    #[serde(rename = "type")]
    pub machine_type: String,
    pub owner: String,
    pub monthly_savings: Option<f64>,
    pub savings_potential: String,
    pub remediation_type: String,
    pub suggested_iac_action: String,
    #[serde(default)]
    pub state_address: Option<String>,
}

/// Format a USD amount with thousands separators, e.g. `$23,922.10`
pub fn format_usd(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

/// Result of remediating one plan entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationOutcome {
    pub resource_id: String,
    pub stop_success: bool,
    pub state_removal_success: bool,
    /// State address the resource was removed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
