#![allow(dead_code)]
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::controller::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    checks: HealthChecks,
}

/// Individual health checks
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    fleet: ComponentHealth,
}

/// Health status of a component
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn healthy(latency_ms: u64) -> Self {
        Self { status: "healthy".to_string(), latency_ms: Some(latency_ms), error: None }
    }
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let fleet_health = check_fleet(&state);
    let all_healthy = fleet_health.status == "healthy";

    let response = HealthResponse {
        status: if all_healthy { "healthy".to_string() } else { "degraded".to_string() },
        timestamp: chrono::Utc::now(),
        checks: HealthChecks { fleet: fleet_health },
    };

    let status_code = if all_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(response))
}

fn check_fleet(state: &AppState) -> ComponentHealth {
    let start = std::time::Instant::now();
    let _ = state.manager.get_totals();
    ComponentHealth::healthy(start.elapsed().as_millis() as u64)
}

/// GET /health/ready - Readiness probe for Kubernetes
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let _ = state;
    StatusCode::OK
}

/// GET /health/live - Liveness probe for Kubernetes
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_health_healthy() {
        let health = ComponentHealth::healthy(42);
        assert_eq!(health.status, "healthy");
        assert_eq!(health.latency_ms, Some(42));
        assert!(health.error.is_none());
    }
}
