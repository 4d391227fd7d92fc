use crate::error::EvaluationError;
use crate::types::{
    Assessment, Evaluation, EvaluationFilter, EvaluationId, EvaluationRun, EvaluationStatus,
    EvaluationType, NewEvaluation, RunId, TaskId,
};
use serde_json::Value;

pub trait EvaluationRepository {
    /// Fails with `Conflict` when `(task_id, type, idempotency_key)` is already taken.
    fn create(&self, input: NewEvaluation) -> Result<Evaluation, EvaluationError>;
    fn get(&self, id: &EvaluationId) -> Result<Option<Evaluation>, EvaluationError>;
    fn find_by_idempotency_key(
        &self,
        task_id: &TaskId,
        evaluation_type: EvaluationType,
        key: &str,
    ) -> Result<Option<Evaluation>, EvaluationError>;
    /// Newest first, starting after `filter.cursor`, at most `limit` rows.
    fn list_for_task(
        &self,
        task_id: &TaskId,
        filter: &EvaluationFilter,
        limit: u32,
    ) -> Result<Vec<Evaluation>, EvaluationError>;
    /// Ignores the cursor.
    fn count_for_task(
        &self,
        task_id: &TaskId,
        filter: &EvaluationFilter,
    ) -> Result<u64, EvaluationError>;
    fn list_by_status(&self, status: EvaluationStatus) -> Result<Vec<Evaluation>, EvaluationError>;
    fn set_status(
        &self,
        id: &EvaluationId,
        status: EvaluationStatus,
    ) -> Result<Evaluation, EvaluationError>;
    /// Copies the assessment onto the evaluation and marks it `Completed`.
    fn set_result(
        &self,
        id: &EvaluationId,
        assessment: &Assessment,
    ) -> Result<Evaluation, EvaluationError>;
}

pub trait EvaluationRunRepository {
    fn start(&self, evaluation_id: &EvaluationId) -> Result<EvaluationRun, EvaluationError>;
    fn get(&self, id: &RunId) -> Result<Option<EvaluationRun>, EvaluationError>;
    /// Only a `Running` run can complete; anything else is `InvalidState`.
    fn complete(&self, id: &RunId, output: &Value) -> Result<EvaluationRun, EvaluationError>;
    /// Only a `Running` run can fail; anything else is `InvalidState`.
    fn fail(&self, id: &RunId, error_message: &str) -> Result<EvaluationRun, EvaluationError>;
    /// Newest first.
    fn list(&self, evaluation_id: &EvaluationId) -> Result<Vec<EvaluationRun>, EvaluationError>;
}
