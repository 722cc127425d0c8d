//! Core library for the GPU zombie auditor
//!
//! This crate provides the core functionality for:
//! - Multi-cloud discovery of GPU compute through platform adapters
//! - Telemetry and owner attribution enrichment
//! - Classification of idle ("zombie") resources and cost impact
//! - Remediation planning and stop-then-reconcile execution
//! - Preflight checks, health tracking and observability

pub mod adapter;
pub mod audit;
pub mod classify;
pub mod discovery;
pub mod enrichment;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod preflight;
pub mod pricing;
pub mod remediation;
pub mod report;

pub use error::{
    AdapterError, BackendError, PlanError, PreflightError, PricingError, ReportError,
    StateStoreError,
};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AuditMetrics, StructuredLogger};
