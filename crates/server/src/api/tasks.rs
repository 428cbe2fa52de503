//! Task API handlers.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use deckforge_core::status::{ResultView, TaskSummary};
use deckforge_core::{
    GenerationParams, Phase, StageBreakdown, StatusView, TaskFilter, TaskStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use crate::state::AppState;

/// Maximum allowed limit for task queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for task queries
const DEFAULT_LIMIT: i64 = 100;

/// Header carrying the deck's SHA-256 on downloads
const CHECKSUM_HEADER: &str = "x-checksum-sha256";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a task
#[derive(Debug, Deserialize)]
pub struct SubmitTaskBody {
    #[serde(flatten)]
    pub params: GenerationParams,
    /// Recorded on the task for listing and diagnostics
    pub created_by: Option<String>,
}

/// Response for an accepted submission
#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

/// Query parameters for listing tasks
#[derive(Debug, Deserialize)]
pub struct ListTasksParams {
    /// Filter by status, e.g. `COMPLETED`
    pub status: Option<String>,
    /// Filter by creator
    pub created_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Response for listing tasks
#[derive(Debug, Serialize)]
pub struct ListTasksResponse {
    pub tasks: Vec<TaskSummary>,
    pub limit: i64,
    pub offset: i64,
}

/// Request body for cancelling a task
#[derive(Debug, Default, Deserialize)]
pub struct CancelTaskBody {
    /// Optional reason for cancellation
    pub reason: Option<String>,
}

/// Request body for resuming a failed task
#[derive(Debug, Deserialize)]
pub struct RetryTaskBody {
    /// Phase to regenerate from: outline, content, assets or compile
    pub stage: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a generation request. Returns as soon as the task is queued.
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitTaskBody>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), ApiError> {
    let created_by = body.created_by.as_deref().unwrap_or("anonymous");
    let task = state.orchestrator().submit(&body.params, created_by).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTaskResponse {
            task_id: task.id,
            status: task.status,
            version: task.version,
            created_at: task.created_at,
        }),
    ))
}

/// Get task status, including the outline and slides generated so far
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusView>, ApiError> {
    Ok(Json(state.status().get_status(&id)?))
}

/// Per-stage breakdown for a task
pub async fn get_stages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StageBreakdown>, ApiError> {
    Ok(Json(state.status().get_stage_status(&id)?))
}

/// Location of the compiled deck
pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ResultView>, ApiError> {
    Ok(Json(state.status().get_result(&id).await?))
}

/// Download the compiled deck
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (artifact, bytes) = state.status().download(&id).await?;
    let disposition = format!("attachment; filename=\"{}.md\"", id);

    Ok((
        [
            (header::CONTENT_TYPE, artifact.content_type),
            (header::CONTENT_DISPOSITION, disposition),
            (HeaderName::from_static(CHECKSUM_HEADER), artifact.checksum),
        ],
        bytes,
    ))
}

/// List tasks with optional filters
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTasksParams>,
) -> Result<Json<ListTasksResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = TaskFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref status) = params.status {
        let status: TaskStatus = status.parse().map_err(ApiError::bad_request)?;
        filter = filter.with_status(status);
    }

    if let Some(ref created_by) = params.created_by {
        filter = filter.with_created_by(created_by);
    }

    let tasks = state.status().list(&filter)?;

    Ok(Json(ListTasksResponse {
        tasks,
        limit,
        offset,
    }))
}

/// Cancel a task that is still generating
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<CancelTaskBody>>,
) -> Result<Json<StatusView>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let task = state.orchestrator().cancel(&id, body.reason.as_deref())?;
    Ok(Json(StatusView::from_task(&task, Utc::now())))
}

/// Resume a failed task from the given phase
pub async fn retry_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RetryTaskBody>,
) -> Result<(StatusCode, Json<StatusView>), ApiError> {
    let phase: Phase = body
        .stage
        .to_ascii_lowercase()
        .parse()
        .map_err(ApiError::bad_request)?;

    let task = state.orchestrator().retry_from_stage(&id, phase).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StatusView::from_task(&task, Utc::now())),
    ))
}
