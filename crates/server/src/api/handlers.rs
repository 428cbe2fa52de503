use axum::{extract::State, http::header, response::IntoResponse, Json};
use deckforge_core::{OrchestratorStatus, SanitizedConfig};
use serde::Serialize;
use std::sync::Arc;

use super::error::ApiError;
use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Prometheus scrape endpoint
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}

/// Worker state and task counts
pub async fn orchestrator_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OrchestratorStatus>, ApiError> {
    Ok(Json(state.orchestrator().status()?))
}
