use crate::types::enums::{EvaluationStatus, EvaluationType, Priority, TaskStatus};
use crate::types::evaluation::Evaluation;
use crate::types::ids::EvaluationId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CreateTaskInput {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub estimate_hours: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CreateWorklogInput {
    pub content: String,
    pub spent_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CreateManagerEvaluationInput {
    pub score_percent: i64,
    pub summary: String,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub criteria: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CreateAiEvaluationInput {
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub context_payload: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, IntoParams)]
pub struct EvaluationFilter {
    #[serde(rename = "type")]
    pub evaluation_type: Option<EvaluationType>,
    pub status: Option<EvaluationStatus>,
    pub limit: Option<u32>,
    /// Id of the last evaluation of the previous page.
    pub cursor: Option<EvaluationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PageMeta {
    pub total: u64,
    pub has_next_page: bool,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EvaluationPage {
    pub evaluations: Vec<Evaluation>,
    pub meta: PageMeta,
}

/// Result of an AI submission; `replayed` is set when an idempotency key matched an existing evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AiSubmission {
    pub evaluation: Evaluation,
    pub replayed: bool,
}
