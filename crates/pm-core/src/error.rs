use crate::types::enums::EvaluationStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found")]
    NotFound,
    #[error("task not found or access denied")]
    AccessDenied,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("evaluation not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: EvaluationStatus,
        to: EvaluationStatus,
    },
    #[error("invalid state: {message}")]
    InvalidState { message: String },
    #[error("conflict: {message}")]
    Conflict { message: String },
    #[error("AI evaluation failed after {attempts} attempts: {message}")]
    ExternalService { attempts: u32, message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

#[derive(Debug, Error)]
pub enum ProgressMarkError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ProgressMarkError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}
