use crate::error::EvaluationError;
use crate::types::{EvaluatorOutput, TaskContext};
use async_trait::async_trait;

/// Scores a task from its context. Implementations own their retry policy; an
/// `Err` here is terminal for the run.
#[async_trait]
pub trait TaskEvaluator: Send + Sync {
    async fn evaluate(&self, context: &TaskContext) -> Result<EvaluatorOutput, EvaluationError>;
}
