//! Error types shared across the auditor components

use thiserror::Error;

/// Failures raised by a platform adapter call
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{platform} adapter is not connected: {reason}")]
    NotConnected { platform: String, reason: String },
    #[error("{operation} failed for {resource_id}: {reason}")]
    Operation {
        operation: &'static str,
        resource_id: String,
        reason: String,
    },
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("resource {0} not found")]
    NotFound(String),
    #[error("inventory {path}: {reason}")]
    Inventory {
        path: std::path::PathBuf,
        reason: String,
    },
}

/// Failures raised by a classification backend transport
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("missing API key for provider {0}")]
    MissingApiKey(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend response had no text content")]
    EmptyResponse,
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the live price tier; always degraded to the static table
#[derive(Debug, Error)]
pub enum PricingError {
    #[error("price request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("price API returned status {0}")]
    Status(u16),
    #[error("invalid price API url: {0}")]
    Url(#[from] url::ParseError),
    #[error("no price listed for {0}")]
    NotListed(String),
}

/// Failures talking to the infrastructure state tool
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state tool `{0}` not found in PATH")]
    ToolMissing(String),
    #[error("state tool exited with {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },
    #[error("state output could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons the preflight gate refuses to start a run
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("no healthy platform adapters remain")]
    NoHealthyAdapters,
    #[error("state tool required for remediation is unavailable: {0}")]
    StateToolMissing(String),
    #[error("preflight already ran for this audit")]
    AlreadyChecked,
}

/// Failures persisting or loading a remediation plan
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
    #[error("plan serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures writing the final audit report
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
    #[error("report serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
