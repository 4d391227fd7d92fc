use crate::middleware::correlation::CorrelationId;
use crate::routes::error::error_response;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::Response;
use pm_core::types::UserId;

pub const HEADER_NAME: &str = "x-actor-id";

/// The calling user, taken from `x-actor-id`. Authentication happens upstream.
#[derive(Debug, Clone)]
pub struct Actor(pub UserId);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation = parts
            .extensions
            .get::<CorrelationId>()
            .map(|value| value.0.clone());
        let Some(raw) = parts
            .headers
            .get(HEADER_NAME)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            return Err(unauthenticated(
                format!("missing {HEADER_NAME} header"),
                correlation,
            ));
        };
        raw.parse::<UserId>()
            .map(Actor)
            .map_err(|err| unauthenticated(format!("invalid {HEADER_NAME}: {err}"), correlation))
    }
}

fn unauthenticated(message: String, correlation_id: Option<String>) -> Response {
    error_response(
        StatusCode::UNAUTHORIZED,
        "unauthenticated",
        message,
        correlation_id,
    )
}
