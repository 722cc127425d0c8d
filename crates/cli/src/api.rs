//! Health check and scrape endpoints served while an audit runs
//!
//! Every JSON body carries the audit's run id so a health check can be
//! matched with the run's log lines.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use cull_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::AuditMetrics,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// State shared by the handlers of one audit run
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AuditMetrics,
    pub run_id: String,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: AuditMetrics, run_id: impl Into<String>) -> Self {
        Self {
            health_registry,
            metrics,
            run_id: run_id.into(),
        }
    }
}

#[derive(Serialize)]
struct RunScoped<'a, T> {
    run_id: &'a str,
    #[serde(flatten)]
    body: T,
}

/// Degraded still counts as up: preflight may have dropped a platform
fn http_status_for(status: ComponentStatus) -> StatusCode {
    match status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let code = http_status_for(health.status);
    let body = serde_json::to_value(RunScoped {
        run_id: &state.run_id,
        body: health,
    });
    respond_json(code, body)
}

/// Ready once preflight has passed
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    let code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::to_value(RunScoped {
        run_id: &state.run_id,
        body: readiness,
    });
    respond_json(code, body)
}

fn respond_json(code: StatusCode, body: serde_json::Result<serde_json::Value>) -> axum::response::Response {
    match body {
        Ok(value) => (code, Json(value)).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to serialize health response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(text) => (StatusCode::OK, [("content-type", PROMETHEUS_CONTENT_TYPE)], text),
        Err(e) => {
            error!(run_id = %state.run_id, error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", PROMETHEUS_CONTENT_TYPE)],
                String::new(),
            )
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the health and metrics endpoints until the process exits
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, run_id = %state.run_id, "Serving metrics and health endpoints");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
