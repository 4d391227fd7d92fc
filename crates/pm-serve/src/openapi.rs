use crate::routes::error::ErrorEnvelope;
use crate::routes::evaluations::RunList;
use crate::routes::events::EventsQuery;
use crate::routes::tasks::AddAssigneeInput;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use pm_core::types::enums::{
    EvaluationStatus, EvaluationType, Priority, RunStatus, TaskStatus, Verdict,
};
use pm_core::types::evaluation::{Evaluation, EvaluationRun};
use pm_core::types::ids::{EvaluationId, RunId, TaskId, UserId, WorklogId};
use pm_core::types::io::{
    CreateAiEvaluationInput, CreateManagerEvaluationInput, CreateTaskInput, CreateWorklogInput,
    EvaluationFilter, EvaluationPage, PageMeta,
};
use pm_core::types::task::{Task, Worklog};
use pm_events::types::{EventRecord, EventSource};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(title = "progressmark", description = "Task evaluation API"),
    paths(
        crate::routes::tasks::create_task,
        crate::routes::tasks::get_task,
        crate::routes::tasks::add_assignee,
        crate::routes::tasks::add_worklog,
        crate::routes::tasks::list_worklogs,
        crate::routes::evaluations::list_evaluations,
        crate::routes::evaluations::create_manager,
        crate::routes::evaluations::create_ai,
        crate::routes::evaluations::get_evaluation,
        crate::routes::evaluations::list_runs,
        crate::routes::events::list_events
    ),
    components(schemas(
        Task,
        Worklog,
        CreateTaskInput,
        CreateWorklogInput,
        AddAssigneeInput,
        Evaluation,
        EvaluationRun,
        EvaluationPage,
        PageMeta,
        EvaluationFilter,
        CreateManagerEvaluationInput,
        CreateAiEvaluationInput,
        RunList,
        ErrorEnvelope,
        EventRecord,
        EventsQuery,
        EventSource,
        TaskId,
        WorklogId,
        UserId,
        EvaluationId,
        RunId,
        TaskStatus,
        Priority,
        EvaluationType,
        EvaluationStatus,
        RunStatus,
        Verdict
    ))
)]
struct ApiDoc;

pub fn generate_spec() -> String {
    ApiDoc::openapi()
        .to_pretty_json()
        .unwrap_or_else(|_| "{}".to_string())
}

pub fn router() -> Router {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
