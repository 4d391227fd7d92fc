use crate::error::{EvaluationError, TaskError};
use crate::types::{
    CreateAiEvaluationInput, CreateManagerEvaluationInput, CreateTaskInput, CreateWorklogInput,
    EvaluationStatus,
};
use serde_json::{Map, Value};

pub const MAX_SUMMARY_CHARS: usize = 1000;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

fn invalid(message: impl Into<String>) -> EvaluationError {
    EvaluationError::InvalidInput {
        message: message.into(),
    }
}

/// Returns the validated score and trimmed summary.
pub fn validate_manager_input(
    input: &CreateManagerEvaluationInput,
) -> Result<(u8, String), EvaluationError> {
    let score = u8::try_from(input.score_percent)
        .ok()
        .filter(|score| *score <= 100)
        .ok_or_else(|| invalid("score must be between 0 and 100"))?;
    let summary = input.summary.trim();
    let len = summary.chars().count();
    if len == 0 || len > MAX_SUMMARY_CHARS {
        return Err(invalid(format!(
            "summary must be 1-{MAX_SUMMARY_CHARS} characters"
        )));
    }
    if let Some(criteria) = &input.criteria {
        if !criteria.is_object() {
            return Err(invalid("criteria must be an object"));
        }
    }
    Ok((score, summary.to_string()))
}

/// Returns the payload object, `{}` when absent.
pub fn validate_ai_input(
    input: &CreateAiEvaluationInput,
) -> Result<Map<String, Value>, EvaluationError> {
    match &input.context_payload {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(invalid("context payload must be an object")),
    }
}

/// Returns the trimmed key.
pub fn validate_idempotency_key(key: &str) -> Result<String, EvaluationError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(invalid("idempotency key must not be empty"));
    }
    if !key.is_ascii() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(invalid("invalid idempotency key"));
    }
    Ok(key.to_string())
}

pub fn validate_page_limit(limit: Option<u32>) -> Result<u32, EvaluationError> {
    match limit {
        None => Ok(DEFAULT_PAGE_LIMIT),
        Some(value) if (1..=MAX_PAGE_LIMIT).contains(&value) => Ok(value),
        Some(_) => Err(invalid(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}"
        ))),
    }
}

pub fn validate_evaluation_transition(
    from: EvaluationStatus,
    to: EvaluationStatus,
) -> Result<(), EvaluationError> {
    use EvaluationStatus::{Completed, Failed, Pending, Running};

    let valid = matches!(
        (from, to),
        (Pending, Running) | (Running, Completed) | (Running, Failed)
    );
    if valid {
        Ok(())
    } else {
        Err(EvaluationError::InvalidTransition { from, to })
    }
}

pub fn validate_task_input(input: &CreateTaskInput) -> Result<(), TaskError> {
    if input.title.trim().is_empty() {
        return Err(TaskError::InvalidInput {
            message: "title must not be empty".to_string(),
        });
    }
    if let Some(hours) = input.estimate_hours {
        if !hours.is_finite() || hours < 0.0 {
            return Err(TaskError::InvalidInput {
                message: "estimate hours must be a non-negative number".to_string(),
            });
        }
    }
    if let (Some(start), Some(due)) = (input.start_date, input.due_date) {
        if due < start {
            return Err(TaskError::InvalidInput {
                message: "due date must not precede start date".to_string(),
            });
        }
    }
    Ok(())
}

pub fn validate_worklog_input(input: &CreateWorklogInput) -> Result<(), TaskError> {
    if input.content.trim().is_empty() {
        return Err(TaskError::InvalidInput {
            message: "worklog content must not be empty".to_string(),
        });
    }
    Ok(())
}
