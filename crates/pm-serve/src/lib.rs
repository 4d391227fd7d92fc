pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod worker;

use axum::Router;
use pm_core::queue::EvaluationQueue;
use pm_core::{ProgressMark, ProgressMarkError};
use pm_db::schema;
use pm_db::store::DbStore;
use pm_events::bus::EventBus;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub db_path: PathBuf,
    pub event_bus: EventBus,
    pub queue: EvaluationQueue,
}

impl AppState {
    pub fn new(db_path: impl Into<PathBuf>, event_bus: EventBus, queue: EvaluationQueue) -> Self {
        Self {
            db_path: db_path.into(),
            event_bus,
            queue,
        }
    }
}

/// One connection per request; the schema is migrated once at startup.
pub fn build_core(state: &AppState) -> Result<ProgressMark<DbStore>, ProgressMarkError> {
    let conn = schema::open(&state.db_path).map_err(ProgressMarkError::internal)?;
    Ok(ProgressMark::new(
        DbStore::new(conn),
        state.event_bus.clone(),
        state.queue.clone(),
    ))
}

pub fn app(state: AppState) -> Router {
    routes::router(state).layer(TraceLayer::new_for_http())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "progressmark listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
