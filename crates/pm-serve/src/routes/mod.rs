pub mod error;
pub mod evaluations;
pub mod events;
pub mod tasks;

use crate::middleware::correlation::correlation_middleware;
use crate::{AppState, openapi};
use axum::Router;
use axum::middleware;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(tasks::router(state.clone()))
        .merge(evaluations::router(state.clone()))
        .merge(events::router(state))
        .merge(openapi::router())
        .route_layer(middleware::from_fn(correlation_middleware));

    Router::new().nest("/api", api)
}

#[cfg(test)]
mod tests {
    use crate::{AppState, app};
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use pm_core::queue::{self, EvaluationReceiver};
    use pm_core::types::UserId;
    use pm_db::schema;
    use pm_events::EventBus;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        _dir: TempDir,
        router: Router,
        receiver: EvaluationReceiver,
    }

    impl TestApp {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("progressmark.db");
            schema::open_and_migrate(&path).unwrap();
            let (queue, receiver) = queue::channel();
            let state = AppState::new(path, EventBus::new(64), queue);
            Self {
                _dir: dir,
                router: app(state),
                receiver,
            }
        }

        async fn send(
            &self,
            method: &str,
            uri: &str,
            actor: Option<&UserId>,
            headers: &[(&str, &str)],
            body: Option<Value>,
        ) -> (StatusCode, axum::http::HeaderMap, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(actor) = actor {
                builder = builder.header("x-actor-id", actor.as_str());
            }
            for (name, value) in headers {
                builder = builder.header(*name, *value);
            }
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, headers, value)
        }

        async fn create_task(&self, actor: &UserId) -> String {
            let (status, _, body) = self
                .send(
                    "POST",
                    "/api/tasks",
                    Some(actor),
                    &[],
                    Some(json!({"title": "Write release notes"})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            body["id"].as_str().unwrap().to_string()
        }
    }

    #[tokio::test]
    async fn missing_actor_is_unauthenticated() {
        let app = TestApp::new();
        let (status, headers, body) = app
            .send(
                "POST",
                "/api/tasks",
                None,
                &[("x-correlation-id", "corr-test")],
                Some(json!({"title": "x"})),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthenticated");
        assert_eq!(body["correlation_id"], "corr-test");
        assert_eq!(headers["x-correlation-id"], "corr-test");
    }

    #[tokio::test]
    async fn manager_evaluation_is_created_and_listed() {
        let app = TestApp::new();
        let owner = UserId::generate();
        let task = app.create_task(&owner).await;

        let (status, _, evaluation) = app
            .send(
                "POST",
                &format!("/api/tasks/{task}/evaluations/manager"),
                Some(&owner),
                &[],
                Some(json!({"score_percent": 72, "summary": "Solid progress"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(evaluation["status"], "COMPLETED");
        assert_eq!(evaluation["score_percent"], 72);

        let (status, _, page) = app
            .send(
                "GET",
                &format!("/api/tasks/{task}/evaluations?limit=10"),
                Some(&owner),
                &[],
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["meta"]["total"], 1);
        assert_eq!(page["meta"]["has_next_page"], false);
        assert_eq!(page["evaluations"][0]["id"], evaluation["id"]);
    }

    #[tokio::test]
    async fn invalid_manager_score_is_rejected() {
        let app = TestApp::new();
        let owner = UserId::generate();
        let task = app.create_task(&owner).await;
        let (status, _, body) = app
            .send(
                "POST",
                &format!("/api/tasks/{task}/evaluations/manager"),
                Some(&owner),
                &[],
                Some(json!({"score_percent": 140, "summary": "Too generous"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_input");
    }

    #[tokio::test]
    async fn ai_submission_replays_with_the_same_key() {
        let mut app = TestApp::new();
        let owner = UserId::generate();
        let task = app.create_task(&owner).await;
        let uri = format!("/api/tasks/{task}/evaluations/ai");

        let (first_status, _, first) = app
            .send("POST", &uri, Some(&owner), &[("idempotency-key", "k-1")], None)
            .await;
        let (second_status, _, second) = app
            .send("POST", &uri, Some(&owner), &[("idempotency-key", "k-1")], None)
            .await;

        assert_eq!(first_status, StatusCode::CREATED);
        assert_eq!(second_status, StatusCode::OK);
        assert_eq!(first["id"], second["id"]);
        assert_eq!(first["status"], "PENDING");
        assert!(app.receiver.try_recv().is_some());
        assert!(app.receiver.try_recv().is_none());
    }

    #[tokio::test]
    async fn outsiders_cannot_see_evaluations() {
        let app = TestApp::new();
        let owner = UserId::generate();
        let outsider = UserId::generate();
        let task = app.create_task(&owner).await;
        let (_, _, evaluation) = app
            .send(
                "POST",
                &format!("/api/tasks/{task}/evaluations/ai"),
                Some(&owner),
                &[],
                Some(json!({"context_payload": {"sprint": 4}})),
            )
            .await;
        let id = evaluation["id"].as_str().unwrap();

        let (status, _, body) = app
            .send("GET", &format!("/api/evaluations/{id}"), Some(&outsider), &[], None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "access_denied");

        let (status, _, runs) = app
            .send(
                "GET",
                &format!("/api/evaluations/{id}/runs"),
                Some(&owner),
                &[],
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(runs["runs"], json!([]));
    }

    #[tokio::test]
    async fn unknown_evaluation_is_not_found() {
        let app = TestApp::new();
        let owner = UserId::generate();
        let id = pm_core::types::EvaluationId::generate();
        let (status, _, body) = app
            .send("GET", &format!("/api/evaluations/{id}"), Some(&owner), &[], None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn events_are_listed_in_sequence() {
        let app = TestApp::new();
        let owner = UserId::generate();
        app.create_task(&owner).await;
        let (status, _, events) = app.send("GET", "/api/events", None, &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(events[0]["seq"], 1);
        assert_eq!(events[0]["body"]["type"], "TaskCreated");
    }
}
