//! Preflight gate
//!
//! Runs once per audit before any resource-level work. Unhealthy adapters
//! are dropped and an unbuildable classification backend is replaced by one
//! that always yields the safe verdict; only an empty adapter set or a
//! missing state tool for a remediation run stop the audit.

use crate::adapter::PlatformAdapter;
use crate::classify::{build_backend, BackendSettings, ClassificationBackend, UnavailableBackend};
use crate::error::PreflightError;
use crate::health::{components, HealthRegistry};
use crate::models::Platform;
use crate::remediation::StateStore;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Gate state; `Ready` and `Failed` are terminal for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightState {
    Unchecked,
    Ready,
    Failed,
}

/// What preflight validates
pub struct PreflightInput {
    pub adapters: Vec<Arc<dyn PlatformAdapter>>,
    pub backend: BackendSettings,
    pub state_store: Option<Arc<dyn StateStore>>,
    /// Active operations were requested, so the state tool is mandatory
    pub remediation_requested: bool,
}

/// Components cleared to take part in the audit
pub struct PreflightReady {
    pub adapters: Vec<Arc<dyn PlatformAdapter>>,
    pub backend: Arc<dyn ClassificationBackend>,
    pub removed: Vec<Platform>,
    /// Whether the state tool was found; dry runs proceed without it
    pub state_tool_available: bool,
}

pub struct PreflightGate {
    health: HealthRegistry,
    state: PreflightState,
}

impl PreflightGate {
    pub fn new(health: HealthRegistry) -> Self {
        Self {
            health,
            state: PreflightState::Unchecked,
        }
    }

    pub fn state(&self) -> PreflightState {
        self.state
    }

    pub async fn check(&mut self, input: PreflightInput) -> Result<PreflightReady, PreflightError> {
        if self.state != PreflightState::Unchecked {
            return Err(PreflightError::AlreadyChecked);
        }

        let result = self.evaluate(input).await;
        self.state = match &result {
            Ok(_) => PreflightState::Ready,
            Err(e) => {
                error!(error = %e, "Preflight failed");
                PreflightState::Failed
            }
        };
        self.health.set_ready(result.is_ok()).await;
        result
    }

    async fn evaluate(&self, input: PreflightInput) -> Result<PreflightReady, PreflightError> {
        let backend = self.check_backend(&input.backend).await;
        let state_tool_available = self
            .check_state_store(input.state_store.as_deref(), input.remediation_requested)
            .await?;

        let checks = input.adapters.iter().map(|adapter| async move {
            (Arc::clone(adapter), adapter.verify_connection().await)
        });

        let mut adapters = Vec::new();
        let mut removed = Vec::new();
        for (adapter, connected) in join_all(checks).await {
            if connected {
                adapters.push(adapter);
            } else {
                warn!(platform = %adapter.platform(), "Adapter failed connection check, removing");
                removed.push(adapter.platform());
            }
        }

        if adapters.is_empty() {
            self.health
                .set_unhealthy(components::ADAPTERS, "No platform adapter passed its connection check")
                .await;
            return Err(PreflightError::NoHealthyAdapters);
        }

        if removed.is_empty() {
            self.health.set_healthy(components::ADAPTERS).await;
        } else {
            let names: Vec<&str> = removed.iter().map(Platform::as_str).collect();
            self.health
                .set_degraded(components::ADAPTERS, format!("Removed: {}", names.join(", ")))
                .await;
        }

        info!(healthy = adapters.len(), removed = removed.len(), "Preflight passed");
        Ok(PreflightReady {
            adapters,
            backend,
            removed,
            state_tool_available,
        })
    }

    async fn check_backend(&self, settings: &BackendSettings) -> Arc<dyn ClassificationBackend> {
        match build_backend(settings) {
            Ok(backend) => {
                self.health.set_healthy(components::BACKEND).await;
                backend
            }
            Err(e) => {
                warn!(error = %e, "Classification backend unavailable, all resources will be treated as active");
                self.health
                    .set_unhealthy(components::BACKEND, e.to_string())
                    .await;
                Arc::new(UnavailableBackend::new(e.to_string()))
            }
        }
    }

    async fn check_state_store(
        &self,
        store: Option<&dyn StateStore>,
        required: bool,
    ) -> Result<bool, PreflightError> {
        let (available, name) = match store {
            Some(store) => (store.is_available(), store.name().to_string()),
            None => (false, "state tool".to_string()),
        };

        if available {
            self.health.set_healthy(components::STATE_STORE).await;
            return Ok(true);
        }

        let message = format!("`{name}` not found");
        if required {
            self.health
                .set_unhealthy(components::STATE_STORE, message.clone())
                .await;
            return Err(PreflightError::StateToolMissing(name));
        }

        self.health
            .set_degraded(components::STATE_STORE, format!("{message}; remediation unavailable"))
            .await;
        Ok(false)
    }
}
