//! Edit lock and slide edit handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use deckforge_core::{EditLock, LockLease, SlideEdits, StatusView};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for acquiring the edit lock
#[derive(Debug, Default, Deserialize)]
pub struct AcquireLockBody {
    /// Caller-chosen token; generated when absent
    pub token: Option<String>,
    /// Requested lease length, capped by configuration
    pub ttl_secs: Option<u64>,
}

/// Request body for releasing the edit lock
#[derive(Debug, Deserialize)]
pub struct ReleaseLockBody {
    pub token: String,
}

/// Request body for editing one slide
#[derive(Debug, Deserialize)]
pub struct ModifySlideBody {
    #[serde(flatten)]
    pub edits: SlideEdits,
    /// Edit version the caller last saw for this slide
    pub expected_edit_version: u64,
    /// Token of a held lock; without one the edit takes its own lock
    pub lock_token: Option<String>,
}

/// Response for a slide edit
#[derive(Debug, Serialize)]
pub struct ModifySlideResponse {
    pub task_id: String,
    pub slide_index: u32,
    pub edit_version: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Start an edit session on a completed task
pub async fn acquire_lock(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<AcquireLockBody>>,
) -> Result<Json<LockLease>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let token = body
        .token
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let ttl = body.ttl_secs.map(Duration::from_secs);

    let lease = state.orchestrator().acquire_lock(&id, &token, ttl)?;
    Ok(Json(lease))
}

/// End an edit session, rebuilding the deck if slides changed
pub async fn release_lock(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ReleaseLockBody>,
) -> Result<Json<StatusView>, ApiError> {
    let task = state.orchestrator().release_lock(&id, &body.token).await?;
    Ok(Json(StatusView::from_task(&task, Utc::now())))
}

/// Change one slide of a completed task
pub async fn modify_slide(
    State(state): State<Arc<AppState>>,
    Path((id, slide_index)): Path<(String, u32)>,
    Json(body): Json<ModifySlideBody>,
) -> Result<Json<ModifySlideResponse>, ApiError> {
    let lock = match body.lock_token {
        Some(token) => EditLock::Held(token),
        None => EditLock::Implicit,
    };

    let edit_version = state
        .orchestrator()
        .modify_slide(
            &id,
            slide_index,
            &body.edits,
            body.expected_edit_version,
            lock,
        )
        .await?;

    Ok(Json(ModifySlideResponse {
        task_id: id,
        slide_index,
        edit_version,
    }))
}
