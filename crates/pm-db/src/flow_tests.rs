use crate::schema;
use crate::store::{DbStore, DbStoreFactory};
use async_trait::async_trait;
use pm_ai::{AiEvaluator, GenerateError, RetryPolicy, TextGenerator};
use pm_core::error::{EvaluationError, ProgressMarkError, TaskError};
use pm_core::queue::{self, EvaluationQueue, EvaluationReceiver};
use pm_core::store::StoreFactory;
use pm_core::types::{
    Assessment, CreateAiEvaluationInput, CreateManagerEvaluationInput, CreateTaskInput,
    CreateWorklogInput, Evaluation, EvaluationFilter, EvaluationStatus, EvaluationType,
    EvaluatorOutput, Extraction, RunStatus, Task, TaskContext, UserId, Verdict,
};
use pm_core::{EvaluationRunner, ProgressMark, RequestContext, TaskEvaluator};
use pm_events::{EventBus, EventSource};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    factory: DbStoreFactory,
    bus: EventBus,
    queue: EvaluationQueue,
    receiver: EvaluationReceiver,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progressmark.db");
        schema::open_and_migrate(&path).unwrap();
        let (queue, receiver) = queue::channel();
        Self {
            _dir: dir,
            factory: DbStoreFactory::new(path),
            bus: EventBus::new(64),
            queue,
            receiver,
        }
    }

    fn core(&self) -> ProgressMark<DbStore> {
        ProgressMark::new(
            self.factory.open().unwrap(),
            self.bus.clone(),
            self.queue.clone(),
        )
    }

    fn runner(&self, evaluator: Arc<dyn TaskEvaluator>) -> EvaluationRunner<DbStoreFactory> {
        EvaluationRunner::new(
            self.factory.clone(),
            self.bus.clone(),
            self.queue.clone(),
            evaluator,
        )
    }

    fn drain(&mut self) -> Vec<pm_core::types::EvaluationId> {
        std::iter::from_fn(|| self.receiver.try_recv()).collect()
    }
}

fn api() -> RequestContext {
    RequestContext::new(EventSource::Api, Some("req-1".to_string()))
}

fn seed_task(core: &ProgressMark<DbStore>, owner: &UserId, worklogs: &[(&str, u32)]) -> Task {
    let task = core
        .tasks()
        .create(
            &api(),
            owner,
            CreateTaskInput {
                title: "Release checklist".to_string(),
                description: Some("Prepare the 2.0 release".to_string()),
                status: None,
                priority: None,
                start_date: None,
                due_date: None,
                estimate_hours: Some(8.0),
            },
        )
        .unwrap();
    for (content, minutes) in worklogs {
        core.tasks()
            .add_worklog(
                &api(),
                owner,
                &task.id,
                CreateWorklogInput {
                    content: (*content).to_string(),
                    spent_minutes: *minutes,
                },
            )
            .unwrap();
    }
    task
}

struct Fixed(Result<EvaluatorOutput, fn() -> EvaluationError>);

#[async_trait]
impl TaskEvaluator for Fixed {
    async fn evaluate(&self, _context: &TaskContext) -> Result<EvaluatorOutput, EvaluationError> {
        match &self.0 {
            Ok(output) => Ok(output.clone()),
            Err(make) => Err(make()),
        }
    }
}

struct Scripted {
    reply: String,
    calls: AtomicU32,
}

#[async_trait]
impl TextGenerator for Scripted {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(prompt.contains("Release checklist"));
        Ok(self.reply.clone())
    }
}

/// Hands out real stores, except on the `fail_on`-th open.
struct FlakyFactory {
    inner: DbStoreFactory,
    opens: AtomicU32,
    fail_on: u32,
}

impl StoreFactory for FlakyFactory {
    type Store = DbStore;

    fn open(&self) -> Result<DbStore, ProgressMarkError> {
        let open = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if open == self.fail_on {
            return Err(ProgressMarkError::internal("database unavailable"));
        }
        self.inner.open()
    }
}

impl Harness {
    /// Opens are counted per run: begin, context, first settle, second settle.
    fn flaky_runner(
        &self,
        fail_on: u32,
        evaluator: Arc<dyn TaskEvaluator>,
    ) -> EvaluationRunner<FlakyFactory> {
        EvaluationRunner::new(
            FlakyFactory {
                inner: self.factory.clone(),
                opens: AtomicU32::new(0),
                fail_on,
            },
            self.bus.clone(),
            self.queue.clone(),
            evaluator,
        )
    }

    fn submit_ai(&self) -> Evaluation {
        let core = self.core();
        let owner = UserId::generate();
        let task = seed_task(&core, &owner, &[("Drafted notes", 30)]);
        core.evaluations()
            .create_ai(&api(), &task.id, &owner, CreateAiEvaluationInput::default(), None)
            .unwrap()
            .evaluation
    }
}

fn completed_output() -> EvaluatorOutput {
    EvaluatorOutput {
        assessment: Assessment::from_score(88, "Release shipped"),
        attempts: 1,
        structure_valid: true,
        extraction: Extraction::Template,
        raw_response: "Score: 88%".to_string(),
    }
}

fn external_failure() -> EvaluationError {
    EvaluationError::ExternalService {
        attempts: 3,
        message: "request failed: connection refused".to_string(),
    }
}

#[test]
fn test_manager_evaluation_is_completed_immediately() {
    let harness = Harness::new();
    let core = harness.core();
    let owner = UserId::generate();
    let task = seed_task(&core, &owner, &[]);

    let evaluation = core
        .evaluations()
        .create_manager(
            &api(),
            &task.id,
            &owner,
            CreateManagerEvaluationInput {
                score_percent: 82,
                summary: " Shipped on time ".to_string(),
                criteria: Some(json!({"quality": 4})),
            },
        )
        .unwrap();

    assert_eq!(evaluation.evaluation_type, EvaluationType::Manager);
    assert_eq!(evaluation.status, EvaluationStatus::Completed);
    assert_eq!(evaluation.score_percent, Some(82));
    assert_eq!(evaluation.summary.as_deref(), Some("Shipped on time"));
    assert_eq!(evaluation.verdict, Some(Verdict::Pass));
    assert_eq!(evaluation.evaluator_id, Some(owner));
    assert_eq!(evaluation.context_payload, json!({"criteria": {"quality": 4}}));
    assert!(core.evaluations().runs(&evaluation.id).unwrap().is_empty());

    let events = core.events().list(None, None).unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.body["type"], "EvaluationCreated");
    assert_eq!(last.correlation_id.as_deref(), Some("req-1"));
}

#[test]
fn test_manager_evaluation_checks_access_and_input() {
    let harness = Harness::new();
    let core = harness.core();
    let owner = UserId::generate();
    let task = seed_task(&core, &owner, &[]);
    let input = |score| CreateManagerEvaluationInput {
        score_percent: score,
        summary: "ok".to_string(),
        criteria: None,
    };

    let stranger = core
        .evaluations()
        .create_manager(&api(), &task.id, &UserId::generate(), input(70))
        .unwrap_err();
    assert!(matches!(stranger, ProgressMarkError::Task(TaskError::AccessDenied)));

    let missing = core
        .evaluations()
        .create_manager(&api(), &pm_core::types::TaskId::generate(), &owner, input(70))
        .unwrap_err();
    assert!(matches!(missing, ProgressMarkError::Task(TaskError::NotFound)));

    let invalid = core
        .evaluations()
        .create_manager(&api(), &task.id, &owner, input(140))
        .unwrap_err();
    assert!(matches!(
        invalid,
        ProgressMarkError::Evaluation(EvaluationError::InvalidInput { .. })
    ));
}

#[test]
fn test_idempotent_ai_submission_dispatches_once() {
    let mut harness = Harness::new();
    let core = harness.core();
    let owner = UserId::generate();
    let task = seed_task(&core, &owner, &[]);

    let first = core
        .evaluations()
        .create_ai(
            &api(),
            &task.id,
            &owner,
            CreateAiEvaluationInput {
                context_payload: Some(json!({"focus": "docs"})),
            },
            Some("submit-1"),
        )
        .unwrap();
    let second = core
        .evaluations()
        .create_ai(
            &api(),
            &task.id,
            &owner,
            CreateAiEvaluationInput::default(),
            Some("submit-1"),
        )
        .unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.evaluation.id, second.evaluation.id);
    assert_eq!(first.evaluation.status, EvaluationStatus::Pending);
    assert_eq!(first.evaluation.idempotency_key.as_deref(), Some("submit-1"));
    assert_eq!(
        first.evaluation.context_payload,
        json!({"focus": "docs", "idempotency_key": "submit-1"})
    );
    assert_eq!(harness.drain(), vec![first.evaluation.id.clone()]);

    let filter = EvaluationFilter::default();
    let page = core
        .evaluations()
        .list_for_task(&task.id, &owner, &filter)
        .unwrap();
    assert_eq!(page.meta.total, 1);
}

#[test]
fn test_ai_submissions_without_key_are_independent() {
    let mut harness = Harness::new();
    let core = harness.core();
    let owner = UserId::generate();
    let task = seed_task(&core, &owner, &[]);

    for _ in 0..2 {
        core.evaluations()
            .create_ai(&api(), &task.id, &owner, CreateAiEvaluationInput::default(), None)
            .unwrap();
    }
    assert_eq!(harness.drain().len(), 2);
}

#[test]
fn test_closed_queue_does_not_fail_submission() {
    let harness = Harness::new();
    let Harness {
        _dir,
        factory,
        bus,
        queue,
        receiver,
    } = harness;
    drop(receiver);
    let core = ProgressMark::new(factory.open().unwrap(), bus, queue);
    let owner = UserId::generate();
    let task = seed_task(&core, &owner, &[]);

    let submission = core
        .evaluations()
        .create_ai(&api(), &task.id, &owner, CreateAiEvaluationInput::default(), None)
        .unwrap();
    assert_eq!(submission.evaluation.status, EvaluationStatus::Pending);
}

#[test]
fn test_listing_pages_with_meta() {
    let harness = Harness::new();
    let core = harness.core();
    let owner = UserId::generate();
    let task = seed_task(&core, &owner, &[]);
    for score in [50, 60, 70] {
        core.evaluations()
            .create_manager(
                &api(),
                &task.id,
                &owner,
                CreateManagerEvaluationInput {
                    score_percent: score,
                    summary: format!("score {score}"),
                    criteria: None,
                },
            )
            .unwrap();
    }

    let first = core
        .evaluations()
        .list_for_task(
            &task.id,
            &owner,
            &EvaluationFilter {
                limit: Some(2),
                ..EvaluationFilter::default()
            },
        )
        .unwrap();
    assert_eq!(first.evaluations.len(), 2);
    assert_eq!(first.evaluations[0].score_percent, Some(70));
    assert_eq!(first.meta.total, 3);
    assert!(first.meta.has_next_page);
    let cursor = first.meta.next_cursor.clone().unwrap();

    let second = core
        .evaluations()
        .list_for_task(
            &task.id,
            &owner,
            &EvaluationFilter {
                limit: Some(2),
                cursor: Some(cursor.parse().unwrap()),
                ..EvaluationFilter::default()
            },
        )
        .unwrap();
    assert_eq!(second.evaluations.len(), 1);
    assert_eq!(second.evaluations[0].score_percent, Some(50));
    assert!(!second.meta.has_next_page);
    assert!(second.meta.next_cursor.is_none());

    let stranger = core
        .evaluations()
        .list_for_task(&task.id, &UserId::generate(), &EvaluationFilter::default())
        .unwrap_err();
    assert!(matches!(stranger, ProgressMarkError::Task(TaskError::AccessDenied)));
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_ai_evaluation_completes() {
    let mut harness = Harness::new();
    let owner = UserId::generate();
    let (task, submitted) = {
        let core = harness.core();
        let task = seed_task(
            &core,
            &owner,
            &[("Drafted checklist", 45), ("Reviewed with QA", 30)],
        );
        let submitted = core
            .evaluations()
            .create_ai(&api(), &task.id, &owner, CreateAiEvaluationInput::default(), None)
            .unwrap();
        (task, submitted.evaluation)
    };
    assert_eq!(harness.drain(), vec![submitted.id.clone()]);

    let generator = Arc::new(Scripted {
        reply: "Score: 85%\nSummary: Checklist drafted and reviewed\nVerdict: pass".to_string(),
        calls: AtomicU32::new(0),
    });
    let evaluator = AiEvaluator::new(generator.clone(), RetryPolicy::default());
    let mut events = harness.bus.subscribe();

    let finished = harness
        .runner(Arc::new(evaluator))
        .run(&submitted.id)
        .await
        .unwrap();

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(finished.task_id, task.id);
    assert_eq!(finished.status, EvaluationStatus::Completed);
    assert_eq!(finished.score_percent, Some(85));
    assert_eq!(finished.verdict, Some(Verdict::Pass));
    assert_eq!(
        finished.summary.as_deref(),
        Some("Checklist drafted and reviewed")
    );

    let core = harness.core();
    let runs = core.evaluations().runs(&submitted.id).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    let output: EvaluatorOutput = serde_json::from_value(runs[0].output_json.clone().unwrap()).unwrap();
    assert_eq!(output.attempts, 1);
    assert_eq!(output.extraction, Extraction::Template);

    let started = events.recv().await.unwrap();
    let completed = events.recv().await.unwrap();
    assert_eq!(started.body["type"], "EvaluationStarted");
    assert_eq!(completed.body["type"], "EvaluationCompleted");
    assert_eq!(started.source, EventSource::Worker);
}

#[tokio::test]
async fn test_exhausted_model_marks_run_and_evaluation_failed() {
    let harness = Harness::new();
    let owner = UserId::generate();
    let submitted = {
        let core = harness.core();
        let task = seed_task(&core, &owner, &[]);
        core.evaluations()
            .create_ai(&api(), &task.id, &owner, CreateAiEvaluationInput::default(), None)
            .unwrap()
            .evaluation
    };

    let finished = harness
        .runner(Arc::new(Fixed(Err(external_failure))))
        .run(&submitted.id)
        .await
        .unwrap();
    assert_eq!(finished.status, EvaluationStatus::Failed);
    assert!(finished.score_percent.is_none());

    let runs = harness.core().evaluations().runs(&submitted.id).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(
        runs[0].error_message.as_deref(),
        Some("AI evaluation failed after 3 attempts: request failed: connection refused")
    );
    assert!(runs[0].completed_at.is_some());
}

#[tokio::test]
async fn test_only_pending_ai_evaluations_can_be_triggered() {
    let harness = Harness::new();
    let owner = UserId::generate();
    let core = harness.core();
    let task = seed_task(&core, &owner, &[]);
    let manager = core
        .evaluations()
        .create_manager(
            &api(),
            &task.id,
            &owner,
            CreateManagerEvaluationInput {
                score_percent: 40,
                summary: "Behind schedule".to_string(),
                criteria: None,
            },
        )
        .unwrap();
    let runner = harness.runner(Arc::new(Fixed(Err(external_failure))));

    let err = runner.run(&manager.id).await.unwrap_err();
    assert!(matches!(
        err,
        ProgressMarkError::Evaluation(EvaluationError::InvalidState { .. })
    ));

    let ai = core
        .evaluations()
        .create_ai(&api(), &task.id, &owner, CreateAiEvaluationInput::default(), None)
        .unwrap()
        .evaluation;
    runner.run(&ai.id).await.unwrap();
    let again = runner.run(&ai.id).await.unwrap_err();
    assert!(matches!(
        again,
        ProgressMarkError::Evaluation(EvaluationError::InvalidTransition { .. })
    ));
    assert_eq!(core.evaluations().runs(&ai.id).unwrap().len(), 1);
}

#[test]
fn test_finish_requires_a_running_run() {
    let harness = Harness::new();
    let owner = UserId::generate();
    let core = harness.core();
    let task = seed_task(&core, &owner, &[]);
    let ai = core
        .evaluations()
        .create_ai(&api(), &task.id, &owner, CreateAiEvaluationInput::default(), None)
        .unwrap()
        .evaluation;
    let ctx = RequestContext::new(EventSource::Worker, None);

    let started = core.evaluations().begin(&ctx, &ai.id).unwrap();
    assert_eq!(started.evaluation.status, EvaluationStatus::Running);
    assert_eq!(started.run.status, RunStatus::Running);

    core.evaluations()
        .finish(&ctx, &started, Err(external_failure()))
        .unwrap();
    let err = core
        .evaluations()
        .finish(&ctx, &started, Err(external_failure()))
        .unwrap_err();
    assert!(matches!(
        err,
        ProgressMarkError::Evaluation(EvaluationError::InvalidTransition { .. })
    ));
    assert_eq!(
        core.evaluations().get(&ai.id).unwrap().status,
        EvaluationStatus::Failed
    );
}

#[test]
fn test_recover_fails_interrupted_and_redispatches_pending() {
    let mut harness = Harness::new();
    let owner = UserId::generate();
    let core = harness.core();
    let task = seed_task(&core, &owner, &[]);
    let submit = || {
        core.evaluations()
            .create_ai(&api(), &task.id, &owner, CreateAiEvaluationInput::default(), None)
            .unwrap()
            .evaluation
    };
    let interrupted = submit();
    let waiting = submit();
    let ctx = RequestContext::new(EventSource::Worker, None);
    let started = core.evaluations().begin(&ctx, &interrupted.id).unwrap();
    harness.drain();

    let report = core.evaluations().recover(&ctx).unwrap();
    assert_eq!(report.failed, vec![interrupted.id.clone()]);
    assert_eq!(report.redispatched, vec![waiting.id.clone()]);
    assert_eq!(harness.drain(), vec![waiting.id.clone()]);

    assert_eq!(
        core.evaluations().get(&interrupted.id).unwrap().status,
        EvaluationStatus::Failed
    );
    let runs = core.evaluations().runs(&interrupted.id).unwrap();
    assert_eq!(runs[0].id, started.run.id);
    assert_eq!(runs[0].status, RunStatus::Failed);
}

#[test]
fn test_unknown_evaluation_is_not_found() {
    let harness = Harness::new();
    let core = harness.core();
    let id = pm_core::types::EvaluationId::generate();
    assert!(matches!(
        core.evaluations().get(&id),
        Err(ProgressMarkError::Evaluation(EvaluationError::NotFound))
    ));
    assert!(matches!(
        core.evaluations().runs(&id),
        Err(ProgressMarkError::Evaluation(EvaluationError::NotFound))
    ));
}

#[tokio::test]
async fn test_context_load_failure_after_begin_fails_the_run() {
    let harness = Harness::new();
    let submitted = harness.submit_ai();
    let generator = Arc::new(Scripted {
        reply: "Score: 90%".to_string(),
        calls: AtomicU32::new(0),
    });
    let evaluator = AiEvaluator::new(generator.clone(), RetryPolicy::default());

    let finished = harness
        .flaky_runner(2, Arc::new(evaluator))
        .run(&submitted.id)
        .await
        .unwrap();
    assert_eq!(finished.status, EvaluationStatus::Failed);
    assert!(finished.score_percent.is_none());
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

    let runs = harness.core().evaluations().runs(&submitted.id).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(
        runs[0]
            .error_message
            .as_deref()
            .is_some_and(|message| message.contains("database unavailable"))
    );
    assert!(runs[0].completed_at.is_some());
}

#[tokio::test]
async fn test_failed_result_write_falls_back_to_failed() {
    let harness = Harness::new();
    let submitted = harness.submit_ai();

    let finished = harness
        .flaky_runner(3, Arc::new(Fixed(Ok(completed_output()))))
        .run(&submitted.id)
        .await
        .unwrap();
    assert_eq!(finished.status, EvaluationStatus::Failed);
    assert!(finished.score_percent.is_none());

    let runs = harness.core().evaluations().runs(&submitted.id).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].output_json.is_none());
    let message = runs[0].error_message.as_deref().unwrap();
    assert_eq!(
        message,
        "internal error: failed to record evaluation result: internal error: database unavailable"
    );

    let stored = harness.core().evaluations().get(&submitted.id).unwrap();
    assert_eq!(stored.status, EvaluationStatus::Failed);
}
