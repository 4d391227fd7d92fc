use crate::error::{EvaluationError, ProgressMarkError};
use crate::evaluator::TaskEvaluator;
use crate::progressmark::{ProgressMark, RequestContext};
use crate::queue::EvaluationQueue;
use crate::store::StoreFactory;
use crate::types::{Evaluation, EvaluationId, EvaluatorOutput, StartedRun, TaskContext};
use pm_events::{EventBus, EventSource};
use std::sync::Arc;
use tracing::{error, info};

/// Drives one AI evaluation from `Pending` to a terminal status.
///
/// Store handles are opened per step and dropped before the model call, so a
/// slow model never pins a database connection.
pub struct EvaluationRunner<F: StoreFactory> {
    factory: F,
    event_bus: EventBus,
    queue: EvaluationQueue,
    evaluator: Arc<dyn TaskEvaluator>,
}

impl<F: StoreFactory> EvaluationRunner<F> {
    pub fn new(
        factory: F,
        event_bus: EventBus,
        queue: EvaluationQueue,
        evaluator: Arc<dyn TaskEvaluator>,
    ) -> Self {
        Self {
            factory,
            event_bus,
            queue,
            evaluator,
        }
    }

    pub fn core(&self) -> Result<ProgressMark<F::Store>, ProgressMarkError> {
        let store = self.factory.open()?;
        Ok(ProgressMark::new(
            store,
            self.event_bus.clone(),
            self.queue.clone(),
        ))
    }

    /// Errors before the run starts leave the evaluation untouched; once it is
    /// `Running`, every path ends in `Completed` or `Failed`.
    pub async fn run(&self, id: &EvaluationId) -> Result<Evaluation, ProgressMarkError> {
        let ctx = RequestContext::new(EventSource::Worker, None);
        let started = {
            let core = self.core()?;
            core.evaluations().begin(&ctx, id)?
        };
        info!(evaluation_id = %id, run_id = %started.run.id, "AI evaluation started");

        let outcome = self.evaluate(&started).await;
        self.settle(&ctx, &started, outcome)
    }

    async fn evaluate(&self, started: &StartedRun) -> Result<EvaluatorOutput, EvaluationError> {
        let context = self.load_context(&started.evaluation)?;
        self.evaluator.evaluate(&context).await
    }

    fn load_context(&self, evaluation: &Evaluation) -> Result<TaskContext, EvaluationError> {
        let core = self.core().map_err(into_evaluation_error)?;
        core.evaluations()
            .context(evaluation)
            .map_err(into_evaluation_error)
    }

    fn settle(
        &self,
        ctx: &RequestContext,
        started: &StartedRun,
        outcome: Result<EvaluatorOutput, EvaluationError>,
    ) -> Result<Evaluation, ProgressMarkError> {
        let reason = match &outcome {
            Ok(_) => "failed to record evaluation result".to_string(),
            Err(err) => err.to_string(),
        };
        let first = self
            .core()
            .and_then(|core| core.evaluations().finish(ctx, started, outcome));
        match first {
            Ok(evaluation) => Ok(evaluation),
            Err(err) => {
                error!(
                    evaluation_id = %started.evaluation.id,
                    "recording evaluation outcome failed, marking failed: {err}"
                );
                let fallback = EvaluationError::Internal {
                    message: format!("{reason}: {err}"),
                };
                self.core()
                    .and_then(|core| core.evaluations().finish(ctx, started, Err(fallback)))
            }
        }
    }
}

fn into_evaluation_error(err: ProgressMarkError) -> EvaluationError {
    match err {
        ProgressMarkError::Evaluation(err) => err,
        other => EvaluationError::Internal {
            message: other.to_string(),
        },
    }
}
