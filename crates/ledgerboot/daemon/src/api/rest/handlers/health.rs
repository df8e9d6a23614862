//! Health and status handlers

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use ledgerboot_types::{BootstrapPhase, PhaseStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

/// Bootstrap status response
#[derive(Debug, Serialize)]
pub struct BootstrapStatusResponse {
    pub phases: BTreeMap<BootstrapPhase, PhaseStatus>,
    pub complete: bool,
    pub running: bool,
    pub readiness_attempts: u32,
    pub identity: Option<String>,
    pub company: String,
    pub chaincode_id: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Bootstrap status endpoint
pub async fn bootstrap_status(State(state): State<AppState>) -> Json<BootstrapStatusResponse> {
    let orchestrator = &state.orchestrator;
    let board = orchestrator.phase_board();
    let config = orchestrator.config().await;
    let identity = orchestrator.identity().await.map(|i| i.subject.clone());

    Json(BootstrapStatusResponse {
        phases: board.statuses().clone(),
        complete: board.is_complete(),
        running: orchestrator.is_running(),
        readiness_attempts: orchestrator.readiness_attempts(),
        identity,
        company: config.company,
        chaincode_id: config.chaincode.id,
        updated_at: board.updated_at(),
        started_at: state.started_at,
    })
}
