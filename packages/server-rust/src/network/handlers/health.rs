//! Health and liveness/readiness endpoints of the HTTP binding.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::network::BindingState;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub binding: String,
    pub state: &'static str,
    /// Paths served by this binding, in registration order.
    pub procedures: Vec<String>,
    pub in_flight: u64,
    pub uptime_secs: u64,
}

/// Always 200; a draining binding is told apart by `state`.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        binding: state.binding.to_string(),
        state: state.shutdown.state().as_str(),
        procedures: state.table.paths().map(str::to_string).collect(),
        in_flight: state.shutdown.in_flight_count(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// 200 while the binding is `Started`, 503 before that and while stopping.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    match state.shutdown.state() {
        BindingState::Started => StatusCode::OK,
        BindingState::Created | BindingState::Draining | BindingState::Stopped => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
