//! Liveness and readiness probes

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use super::state::AppState;
use crate::api::types::Json;
use crate::domain::DomainError;

/// Probe body; `checks` appears only on readiness
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<HealthCheck>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl HealthResponse {
    fn new(status: HealthStatus) -> Self {
        Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
            checks: None,
            latency_ms: None,
        }
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn status_code(self) -> StatusCode {
        match self {
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            Self::Healthy | Self::Degraded => StatusCode::OK,
        }
    }
}

/// One probed component
#[derive(Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u64,
}

/// GET /health - always 200 while the process serves
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse::new(HealthStatus::Healthy))
}

/// Readiness check: the registries and the chain store must answer
pub async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();

    let checks = vec![
        timed_check("prompt_registry", state.prompt_service.list()).await,
        timed_check("gate_registry", state.gate_service.list()).await,
        timed_check("chain_store", state.chain_executor.list()).await,
    ];

    let mut response = HealthResponse::new(overall(&checks));
    response.checks = Some(checks);
    response.latency_ms = Some(start.elapsed().as_millis() as u64);

    (response.status.status_code(), Json(response))
}

/// GET /live
pub async fn live_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn timed_check<T>(
    name: &'static str,
    probe: impl Future<Output = Result<T, DomainError>>,
) -> HealthCheck {
    let start = Instant::now();
    let result = probe.await;

    let (status, message) = match result {
        Ok(_) => (HealthStatus::Healthy, None),
        Err(e) => (HealthStatus::Unhealthy, Some(e.to_string())),
    };

    HealthCheck {
        name,
        status,
        message,
        latency_ms: start.elapsed().as_millis() as u64,
    }
}

/// Chains cannot run without the chain store; a registry outage only degrades
fn overall(checks: &[HealthCheck]) -> HealthStatus {
    let store_down = checks
        .iter()
        .any(|c| c.name == "chain_store" && c.status == HealthStatus::Unhealthy);

    if store_down {
        HealthStatus::Unhealthy
    } else if checks.iter().any(|c| c.status != HealthStatus::Healthy) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
