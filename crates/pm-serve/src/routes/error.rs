use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pm_core::error::{EvaluationError, ProgressMarkError, TaskError};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorEnvelope {
    pub code: &'static str,
    pub message: String,
    pub correlation_id: Option<String>,
}

pub fn error_response(
    status: StatusCode,
    code: &'static str,
    message: String,
    correlation_id: Option<String>,
) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            code,
            message,
            correlation_id,
        }),
    )
        .into_response()
}

pub fn invalid_input(message: impl ToString, correlation_id: Option<String>) -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        "invalid_input",
        message.to_string(),
        correlation_id,
    )
}

pub fn map_error(err: &ProgressMarkError, correlation_id: Option<String>) -> Response {
    let (status, code, message) = match err {
        ProgressMarkError::Task(task) => map_task_error(task),
        ProgressMarkError::Evaluation(evaluation) => map_evaluation_error(evaluation),
        ProgressMarkError::Internal { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            message.clone(),
        ),
    };
    if status.is_server_error() {
        error!(code, correlation_id = ?correlation_id, "request failed: {message}");
    }
    error_response(status, code, message, correlation_id)
}

fn map_task_error(err: &TaskError) -> (StatusCode, &'static str, String) {
    match err {
        TaskError::NotFound => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        TaskError::AccessDenied => (StatusCode::FORBIDDEN, "access_denied", err.to_string()),
        TaskError::InvalidInput { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
        }
        TaskError::Internal { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            err.to_string(),
        ),
    }
}

fn map_evaluation_error(err: &EvaluationError) -> (StatusCode, &'static str, String) {
    match err {
        EvaluationError::NotFound => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        EvaluationError::InvalidInput { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
        }
        EvaluationError::InvalidTransition { .. } | EvaluationError::InvalidState { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_state",
            err.to_string(),
        ),
        EvaluationError::Conflict { .. } => (StatusCode::CONFLICT, "conflict", err.to_string()),
        EvaluationError::ExternalService { .. } => (
            StatusCode::BAD_GATEWAY,
            "external_service",
            err.to_string(),
        ),
        EvaluationError::Internal { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            err.to_string(),
        ),
    }
}
