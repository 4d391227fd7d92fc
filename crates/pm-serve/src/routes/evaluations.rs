use crate::middleware::actor::Actor;
use crate::middleware::correlation::CorrelationId;
use crate::routes::error::{invalid_input, map_error};
use crate::routes::tasks::parse_task_id;
use crate::{AppState, build_core};
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use pm_core::types::evaluation::{Evaluation, EvaluationRun};
use pm_core::types::io::{
    CreateAiEvaluationInput, CreateManagerEvaluationInput, EvaluationFilter, EvaluationPage,
};
use pm_core::types::{EvaluationId, UserId};
use pm_core::{ProgressMark, ProgressMarkError, RequestContext, Store};
use pm_events::types::EventSource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use utoipa::ToSchema;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Debug, Serialize, ToSchema)]
pub struct RunList {
    pub runs: Vec<EvaluationRun>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tasks/{id}/evaluations", get(list_evaluations))
        .route("/tasks/{id}/evaluations/manager", post(create_manager))
        .route("/tasks/{id}/evaluations/ai", post(create_ai))
        .route("/evaluations/{id}", get(get_evaluation))
        .route("/evaluations/{id}/runs", get(list_runs))
        .with_state(state)
}

fn parse_evaluation_id(
    raw: &str,
    correlation: &CorrelationId,
) -> Result<EvaluationId, Response> {
    raw.parse::<EvaluationId>().map_err(|err| {
        invalid_input(
            format!("invalid evaluation id: {err}"),
            Some(correlation.0.clone()),
        )
    })
}

/// An empty body means "use the defaults".
fn parse_optional_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| format!("invalid JSON body: {err}"))
}

/// Evaluations are visible to whoever can see their task.
fn visible_evaluation<S: Store>(
    core: &ProgressMark<S>,
    actor: &UserId,
    id: &EvaluationId,
) -> Result<Evaluation, ProgressMarkError> {
    let evaluation = core.evaluations().get(id)?;
    core.tasks().get(actor, &evaluation.task_id)?;
    Ok(evaluation)
}

#[utoipa::path(
    get,
    path = "/api/tasks/{id}/evaluations",
    params(("id" = String, Path, description = "Task id"), EvaluationFilter),
    responses((status = 200, body = EvaluationPage))
)]
pub(crate) async fn list_evaluations(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    query: Result<Query<EvaluationFilter>, QueryRejection>,
) -> Response {
    let id = match parse_task_id(&id, &correlation) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let filter = match query {
        Ok(Query(filter)) => filter,
        Err(rejection) => return invalid_input(rejection.body_text(), Some(correlation.0)),
    };
    let core = match build_core(&state) {
        Ok(core) => core,
        Err(err) => return map_error(&err, Some(correlation.0)),
    };
    match core.evaluations().list_for_task(&id, &actor, &filter) {
        Ok(page) => Json(page).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)),
    }
}

#[utoipa::path(
    post,
    path = "/api/tasks/{id}/evaluations/manager",
    params(("id" = String, Path, description = "Task id")),
    request_body = CreateManagerEvaluationInput,
    responses((status = 201, body = Evaluation))
)]
pub(crate) async fn create_manager(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    body: Result<Json<CreateManagerEvaluationInput>, JsonRejection>,
) -> Response {
    let id = match parse_task_id(&id, &correlation) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let input = match body {
        Ok(Json(input)) => input,
        Err(rejection) => return invalid_input(rejection.body_text(), Some(correlation.0)),
    };
    let core = match build_core(&state) {
        Ok(core) => core,
        Err(err) => return map_error(&err, Some(correlation.0)),
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    match core.evaluations().create_manager(&ctx, &id, &actor, input) {
        Ok(evaluation) => (StatusCode::CREATED, Json(evaluation)).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id),
    }
}

#[utoipa::path(
    post,
    path = "/api/tasks/{id}/evaluations/ai",
    params(
        ("id" = String, Path, description = "Task id"),
        ("idempotency-key" = Option<String>, Header, description = "Replays the first submission carrying the same key")
    ),
    request_body = CreateAiEvaluationInput,
    responses(
        (status = 201, body = Evaluation, description = "Evaluation created and queued"),
        (status = 200, body = Evaluation, description = "Idempotent replay")
    )
)]
pub(crate) async fn create_ai(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let id = match parse_task_id(&id, &correlation) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let key = match headers.get(IDEMPOTENCY_HEADER).map(|value| value.to_str()) {
        None => None,
        Some(Ok(key)) => Some(key.to_string()),
        Some(Err(_)) => {
            return invalid_input(
                format!("{IDEMPOTENCY_HEADER} must be visible ASCII"),
                Some(correlation.0),
            );
        }
    };
    let input = match parse_optional_body::<CreateAiEvaluationInput>(&body) {
        Ok(input) => input,
        Err(err) => return invalid_input(err, Some(correlation.0)),
    };
    let core = match build_core(&state) {
        Ok(core) => core,
        Err(err) => return map_error(&err, Some(correlation.0)),
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    match core
        .evaluations()
        .create_ai(&ctx, &id, &actor, input, key.as_deref())
    {
        Ok(submission) if submission.replayed => Json(submission.evaluation).into_response(),
        Ok(submission) => (StatusCode::CREATED, Json(submission.evaluation)).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id),
    }
}

#[utoipa::path(
    get,
    path = "/api/evaluations/{id}",
    params(("id" = String, Path, description = "Evaluation id")),
    responses((status = 200, body = Evaluation))
)]
pub(crate) async fn get_evaluation(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_evaluation_id(&id, &correlation) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let core = match build_core(&state) {
        Ok(core) => core,
        Err(err) => return map_error(&err, Some(correlation.0)),
    };
    match visible_evaluation(&core, &actor, &id) {
        Ok(evaluation) => Json(evaluation).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)),
    }
}

#[utoipa::path(
    get,
    path = "/api/evaluations/{id}/runs",
    params(("id" = String, Path, description = "Evaluation id")),
    responses((status = 200, body = RunList))
)]
pub(crate) async fn list_runs(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_evaluation_id(&id, &correlation) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let core = match build_core(&state) {
        Ok(core) => core,
        Err(err) => return map_error(&err, Some(correlation.0)),
    };
    let runs = visible_evaluation(&core, &actor, &id).and_then(|_| core.evaluations().runs(&id));
    match runs {
        Ok(runs) => Json(RunList { runs }).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)),
    }
}
