//! Mapping of domain errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use deckforge_core::task::FieldViolation;
use deckforge_core::{OrchestratorError, StatusError};
use serde::Serialize;
use tracing::error;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: &'static str,
    pub message: String,
    /// Rejected fields, for validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<FieldViolation>>,
    /// Current slide edit version, for edit conflicts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_edit_version: Option<u64>,
}

/// An error returned from an API handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error,
                message: message.into(),
                violations: None,
                current_edit_version: None,
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let message = err.to_string();
        match err {
            OrchestratorError::Validation(e) => {
                let mut api = Self::new(StatusCode::BAD_REQUEST, "validation_error", message);
                api.body.violations = Some(e.violations);
                api
            }
            OrchestratorError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "not_found", message),
            OrchestratorError::SlideNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "slide_not_found", message)
            }
            OrchestratorError::VersionConflict(_) => {
                Self::new(StatusCode::CONFLICT, "version_conflict", message)
            }
            OrchestratorError::Conflict { actual, .. } => {
                let mut api = Self::new(StatusCode::CONFLICT, "conflict", message);
                api.body.current_edit_version = Some(actual);
                api
            }
            OrchestratorError::LockUnavailable(_) => {
                Self::new(StatusCode::LOCKED, "lock_unavailable", message)
            }
            OrchestratorError::InvalidState { .. } => {
                Self::new(StatusCode::CONFLICT, "invalid_state", message)
            }
            OrchestratorError::EditFailed(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "edit_failed", message)
            }
            OrchestratorError::Store(_) => {
                error!("Internal error: {}", message);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
            }
        }
    }
}

impl From<StatusError> for ApiError {
    fn from(err: StatusError) -> Self {
        let message = err.to_string();
        match err {
            StatusError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "not_found", message),
            StatusError::NotReady { .. } => Self::new(StatusCode::CONFLICT, "not_ready", message),
            StatusError::ArtifactMissing(_)
            | StatusError::ChecksumMismatch(_)
            | StatusError::Store(_)
            | StatusError::Artifact(_) => {
                error!("Internal error: {}", message);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckforge_core::{TaskStatus, ValidationError};

    #[test]
    fn test_orchestrator_error_status_codes() {
        let cases = [
            (
                OrchestratorError::Validation(ValidationError::single("topic", "empty")),
                StatusCode::BAD_REQUEST,
            ),
            (OrchestratorError::NotFound("t".into()), StatusCode::NOT_FOUND),
            (
                OrchestratorError::LockUnavailable("busy".into()),
                StatusCode::LOCKED,
            ),
            (
                OrchestratorError::Conflict {
                    slide_index: 0,
                    expected: 1,
                    actual: 2,
                },
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::InvalidState {
                    task_id: "t".into(),
                    status: TaskStatus::Completed,
                    operation: "cancel".into(),
                },
                StatusCode::CONFLICT,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_validation_error_lists_fields() {
        let api = ApiError::from(OrchestratorError::Validation(ValidationError::single(
            "num_slides",
            "out of range",
        )));
        let violations = api.body.violations.unwrap();
        assert_eq!(violations[0].field, "num_slides");
    }

    #[test]
    fn test_not_ready_is_conflict() {
        let api = ApiError::from(StatusError::NotReady {
            task_id: "t".into(),
            status: TaskStatus::ContentPending,
        });
        assert_eq!(api.status(), StatusCode::CONFLICT);
        assert_eq!(api.body.error, "not_ready");
    }
}
