use std::time::Instant;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    started_at: Instant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub uptime_secs: u64,
    pub checked_at: String,
}

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(HealthState { started_at: Instant::now() })
}

/// The ledger is in-process memory and the model endpoint is only touched per
/// turn, so readiness here means the runtime itself came up.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let payload = HealthResponse {
        status: "ready",
        service: HealthCheck {
            status: "ready",
            detail: "trackcrow-server runtime initialized".to_string(),
        },
        uptime_secs: state.started_at.elapsed().as_secs(),
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}
