use pm_core::progressmark::RecoveryReport;
use pm_core::queue::EvaluationReceiver;
use pm_core::types::EvaluationId;
use pm_core::{EvaluationRunner, ProgressMarkError, RequestContext, StoreFactory};
use pm_events::types::EventSource;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Drains the evaluation queue until every sender is gone, running at most
/// `max_concurrent` evaluations at a time.
pub async fn run<F>(
    runner: Arc<EvaluationRunner<F>>,
    mut receiver: EvaluationReceiver,
    max_concurrent: usize,
) where
    F: StoreFactory + 'static,
{
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    while let Some(id) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            error!(evaluation_id = %id, "worker semaphore closed");
            break;
        };
        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            execute(runner.as_ref(), &id).await;
            drop(permit);
        });
    }
    info!("evaluation queue closed, worker stopping");
}

async fn execute<F: StoreFactory>(runner: &EvaluationRunner<F>, id: &EvaluationId) {
    match runner.run(id).await {
        Ok(evaluation) => info!(
            evaluation_id = %id,
            status = ?evaluation.status,
            score_percent = ?evaluation.score_percent,
            "AI evaluation settled"
        ),
        Err(ProgressMarkError::Evaluation(err)) => {
            warn!(evaluation_id = %id, "AI evaluation not run: {err}");
        }
        Err(err) => error!(evaluation_id = %id, "AI evaluation errored: {err}"),
    }
}

/// Startup sweep over evaluations a previous process left behind.
pub fn recover<F: StoreFactory>(
    runner: &EvaluationRunner<F>,
) -> Result<RecoveryReport, ProgressMarkError> {
    let ctx = RequestContext::new(EventSource::Worker, None);
    let report = runner.core()?.evaluations().recover(&ctx)?;
    if !report.failed.is_empty() || !report.redispatched.is_empty() {
        warn!(
            failed = report.failed.len(),
            redispatched = report.redispatched.len(),
            "recovered interrupted evaluations"
        );
    }
    Ok(report)
}
