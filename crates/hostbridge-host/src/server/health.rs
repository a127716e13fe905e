//! Health check endpoint.

use axum::{Json, extract::State};
use serde::Serialize;

use super::{ClientInfo, HostState};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Registered operation names.
    pub operations: Vec<String>,
    /// The orchestrator currently linked, if any.
    pub connected_client: Option<ClientInfo>,
}

/// GET /health
pub async fn health(State(state): State<HostState>) -> Json<HealthResponse> {
    let operations = state
        .dispatcher()
        .registry()
        .names()
        .into_iter()
        .map(str::to_string)
        .collect();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        operations,
        connected_client: state.active_client(),
    })
}
