use crate::middleware::correlation::CorrelationId;
use crate::routes::error::{invalid_input, map_error};
use crate::{AppState, build_core};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use pm_events::types::EventRecord;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, serde::Deserialize, ToSchema, IntoParams)]
pub struct EventsQuery {
    /// Only events with a larger sequence number.
    after: Option<i64>,
    limit: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(list_events))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/api/events",
    params(EventsQuery),
    responses((status = 200, body = Vec<EventRecord>))
)]
pub(crate) async fn list_events(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => return invalid_input(rejection.body_text(), Some(correlation.0)),
    };
    let core = match build_core(&state) {
        Ok(core) => core,
        Err(err) => return map_error(&err, Some(correlation.0)),
    };
    match core.events().list(query.after, query.limit) {
        Ok(events) => Json(events).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)),
    }
}
