pub mod payments;
pub mod webhook;

use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub db: String,
    pub gateways: Vec<String>,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_connected = match state.repository.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unreachable");
            false
        }
    };

    let health_response = HealthStatus {
        status: if db_connected { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        db: if db_connected { "connected" } else { "disconnected" }.to_string(),
        gateways: state
            .gateways
            .providers()
            .iter()
            .map(|p| p.to_string())
            .collect(),
    };

    let status_code = if db_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health_response))
}
