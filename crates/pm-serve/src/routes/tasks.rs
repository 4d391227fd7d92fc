use crate::middleware::actor::Actor;
use crate::middleware::correlation::CorrelationId;
use crate::routes::error::{invalid_input, map_error};
use crate::{AppState, build_core};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use pm_core::RequestContext;
use pm_core::types::io::{CreateTaskInput, CreateWorklogInput};
use pm_core::types::task::{Task, Worklog};
use pm_core::types::{TaskId, UserId};
use pm_events::types::EventSource;
use utoipa::ToSchema;

#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct AddAssigneeInput {
    user_id: UserId,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tasks", post(create_task))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/assignees", post(add_assignee))
        .route(
            "/tasks/{id}/worklogs",
            post(add_worklog).get(list_worklogs),
        )
        .with_state(state)
}

pub(crate) fn parse_task_id(raw: &str, correlation: &CorrelationId) -> Result<TaskId, Response> {
    raw.parse::<TaskId>()
        .map_err(|err| invalid_input(format!("invalid task id: {err}"), Some(correlation.0.clone())))
}

#[utoipa::path(
    post,
    path = "/api/tasks",
    request_body = CreateTaskInput,
    responses((status = 201, body = Task))
)]
pub(crate) async fn create_task(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Actor(actor): Actor,
    body: Result<Json<CreateTaskInput>, JsonRejection>,
) -> Response {
    let input = match body {
        Ok(Json(input)) => input,
        Err(rejection) => return invalid_input(rejection.body_text(), Some(correlation.0)),
    };
    let core = match build_core(&state) {
        Ok(core) => core,
        Err(err) => return map_error(&err, Some(correlation.0)),
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    match core.tasks().create(&ctx, &actor, input) {
        Ok(task) => (StatusCode::CREATED, Json(task)).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id),
    }
}

#[utoipa::path(
    get,
    path = "/api/tasks/{id}",
    params(("id" = String, Path, description = "Task id")),
    responses((status = 200, body = Task))
)]
pub(crate) async fn get_task(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_task_id(&id, &correlation) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let core = match build_core(&state) {
        Ok(core) => core,
        Err(err) => return map_error(&err, Some(correlation.0)),
    };
    match core.tasks().get(&actor, &id) {
        Ok(task) => Json(task).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)),
    }
}

#[utoipa::path(
    post,
    path = "/api/tasks/{id}/assignees",
    params(("id" = String, Path, description = "Task id")),
    request_body = AddAssigneeInput,
    responses((status = 200, body = Task))
)]
pub(crate) async fn add_assignee(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    body: Result<Json<AddAssigneeInput>, JsonRejection>,
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
    match core
        .tasks()
        .add_assignee(&ctx, &actor, &id, &input.user_id)
    {
        Ok(task) => Json(task).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id),
    }
}

#[utoipa::path(
    post,
    path = "/api/tasks/{id}/worklogs",
    params(("id" = String, Path, description = "Task id")),
    request_body = CreateWorklogInput,
    responses((status = 201, body = Worklog))
)]
pub(crate) async fn add_worklog(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    body: Result<Json<CreateWorklogInput>, JsonRejection>,
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
    match core.tasks().add_worklog(&ctx, &actor, &id, input) {
        Ok(worklog) => (StatusCode::CREATED, Json(worklog)).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id),
    }
}

#[utoipa::path(
    get,
    path = "/api/tasks/{id}/worklogs",
    params(("id" = String, Path, description = "Task id")),
    responses((status = 200, body = Vec<Worklog>))
)]
pub(crate) async fn list_worklogs(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_task_id(&id, &correlation) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let core = match build_core(&state) {
        Ok(core) => core,
        Err(err) => return map_error(&err, Some(correlation.0)),
    };
    match core.tasks().worklogs(&actor, &id) {
        Ok(worklogs) => Json(worklogs).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)),
    }
}
