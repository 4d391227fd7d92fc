use crate::error::{EvaluationError, ProgressMarkError, TaskError};
use crate::evaluations::{EvaluationRepository, EvaluationRunRepository};
use crate::events::EventRepository;
use crate::queue::EvaluationQueue;
use crate::store::Store;
use crate::tasks::TaskRepository;
use crate::types::event::EventBody;
use crate::types::{
    AiSubmission, Assessment, CreateAiEvaluationInput, CreateManagerEvaluationInput,
    CreateTaskInput, CreateWorklogInput, Evaluation, EvaluationFilter, EvaluationId,
    EvaluationPage, EvaluationRun, EvaluationStatus, EvaluationType, EvaluatorOutput,
    NewEvaluation, PageMeta, RunStatus, StartedRun, Task, TaskContext, TaskId, UserId, Verdict,
    Worklog,
};
use crate::validation::{
    validate_ai_input, validate_evaluation_transition, validate_idempotency_key,
    validate_manager_input, validate_page_limit, validate_task_input, validate_worklog_input,
};
use chrono::Utc;
use pm_events::{EventBus, EventRecord, EventSource};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

/// Key under which an AI evaluation's idempotency key is embedded in its context payload.
pub const IDEMPOTENCY_FIELD: &str = "idempotency_key";

const INTERRUPTED_MESSAGE: &str = "evaluation interrupted before completion";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub source: EventSource,
    pub correlation_id: Option<String>,
}

impl RequestContext {
    pub fn new(source: EventSource, correlation_id: Option<String>) -> Self {
        Self {
            source,
            correlation_id,
        }
    }
}

pub struct ProgressMark<S: Store> {
    store: S,
    event_bus: EventBus,
    queue: EvaluationQueue,
}

impl<S: Store> ProgressMark<S> {
    pub fn new(store: S, event_bus: EventBus, queue: EvaluationQueue) -> Self {
        Self {
            store,
            event_bus,
            queue,
        }
    }

    pub fn tasks(&self) -> TasksApi<'_, S> {
        TasksApi { core: self }
    }

    pub fn evaluations(&self) -> EvaluationsApi<'_, S> {
        EvaluationsApi { core: self }
    }

    pub fn events(&self) -> EventsApi<'_, S> {
        EventsApi { core: self }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn with_events<T, F>(&self, ctx: &RequestContext, f: F) -> Result<T, ProgressMarkError>
    where
        F: FnOnce(&S) -> Result<(T, Vec<EventBody>), ProgressMarkError>,
    {
        let (value, records) = self.store.with_tx(|store| {
            let (value, bodies) = f(store)?;
            let mut records = Vec::new();
            for body in bodies {
                let record = build_event_record(ctx, body)?;
                let record = store.events().append(record)?;
                records.push(record);
            }
            Ok((value, records))
        })?;
        for record in records {
            self.event_bus.publish(record);
        }
        Ok(value)
    }

    /// Never fails the caller: a closed queue is only logged.
    fn dispatch(&self, id: &EvaluationId) {
        if let Err(err) = self.queue.dispatch(id.clone()) {
            error!(evaluation_id = %err.id, "failed to dispatch AI evaluation: {err}");
        }
    }
}

fn ensure_task_access<S: Store>(
    store: &S,
    task_id: &TaskId,
    actor: &UserId,
) -> Result<Task, ProgressMarkError> {
    let Some(task) = store.tasks().get(task_id)? else {
        return Err(TaskError::NotFound.into());
    };
    if !store.tasks().has_access(task_id, actor)? {
        return Err(TaskError::AccessDenied.into());
    }
    Ok(task)
}

pub struct TasksApi<'a, S: Store> {
    core: &'a ProgressMark<S>,
}

impl<S: Store> TasksApi<'_, S> {
    pub fn create(
        &self,
        ctx: &RequestContext,
        actor: &UserId,
        input: CreateTaskInput,
    ) -> Result<Task, ProgressMarkError> {
        validate_task_input(&input)?;
        self.core.with_events(ctx, |store| {
            let task = store.tasks().create(input, actor)?;
            Ok((task.clone(), vec![EventBody::TaskCreated { task }]))
        })
    }

    pub fn get(&self, actor: &UserId, id: &TaskId) -> Result<Task, ProgressMarkError> {
        ensure_task_access(&self.core.store, id, actor)
    }

    pub fn add_assignee(
        &self,
        ctx: &RequestContext,
        actor: &UserId,
        id: &TaskId,
        user_id: &UserId,
    ) -> Result<Task, ProgressMarkError> {
        self.core.with_events(ctx, |store| {
            let task = ensure_task_access(store, id, actor)?;
            store.tasks().add_assignee(id, user_id)?;
            Ok((task, Vec::new()))
        })
    }

    pub fn add_worklog(
        &self,
        ctx: &RequestContext,
        actor: &UserId,
        id: &TaskId,
        input: CreateWorklogInput,
    ) -> Result<Worklog, ProgressMarkError> {
        validate_worklog_input(&input)?;
        self.core.with_events(ctx, |store| {
            ensure_task_access(store, id, actor)?;
            let worklog = store.tasks().add_worklog(id, actor, input)?;
            Ok((worklog.clone(), vec![EventBody::WorklogAdded { worklog }]))
        })
    }

    pub fn worklogs(&self, actor: &UserId, id: &TaskId) -> Result<Vec<Worklog>, ProgressMarkError> {
        ensure_task_access(&self.core.store, id, actor)?;
        self.core
            .store
            .tasks()
            .worklogs(id)
            .map_err(ProgressMarkError::from)
    }
}

/// Summary of [`EvaluationsApi::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub failed: Vec<EvaluationId>,
    pub redispatched: Vec<EvaluationId>,
}

pub struct EvaluationsApi<'a, S: Store> {
    core: &'a ProgressMark<S>,
}

impl<S: Store> EvaluationsApi<'_, S> {
    /// Records a manager's score; the evaluation is born `Completed`.
    pub fn create_manager(
        &self,
        ctx: &RequestContext,
        task_id: &TaskId,
        actor: &UserId,
        input: CreateManagerEvaluationInput,
    ) -> Result<Evaluation, ProgressMarkError> {
        let (score_percent, summary) = validate_manager_input(&input)?;
        let assessment = Assessment {
            score_percent,
            summary,
            verdict: Verdict::from_score(score_percent),
        };
        let mut payload = Map::new();
        if let Some(criteria) = input.criteria {
            payload.insert("criteria".to_string(), criteria);
        }

        self.core.with_events(ctx, |store| {
            ensure_task_access(store, task_id, actor)?;
            let evaluation = store.evaluations().create(NewEvaluation {
                task_id: task_id.clone(),
                evaluator_id: Some(actor.clone()),
                evaluation_type: EvaluationType::Manager,
                status: EvaluationStatus::Completed,
                assessment: Some(assessment),
                context_payload: Value::Object(payload),
                idempotency_key: None,
            })?;
            info!(
                evaluation_id = %evaluation.id,
                task_id = %task_id,
                score = score_percent,
                "manager evaluation created"
            );
            Ok((
                evaluation.clone(),
                vec![EventBody::EvaluationCreated { evaluation }],
            ))
        })
    }

    /// Persists a `Pending` AI evaluation and hands it to the worker once committed.
    ///
    /// With an idempotency key, a second submission for the same task returns the
    /// first evaluation untouched and dispatches nothing.
    pub fn create_ai(
        &self,
        ctx: &RequestContext,
        task_id: &TaskId,
        actor: &UserId,
        input: CreateAiEvaluationInput,
        idempotency_key: Option<&str>,
    ) -> Result<AiSubmission, ProgressMarkError> {
        let mut payload = validate_ai_input(&input)?;
        let key = idempotency_key.map(validate_idempotency_key).transpose()?;
        if let Some(key) = &key {
            payload.insert(IDEMPOTENCY_FIELD.to_string(), Value::String(key.clone()));
        }

        let submission = self.core.with_events(ctx, |store| {
            ensure_task_access(store, task_id, actor)?;
            if let Some(key) = &key {
                let existing =
                    store
                        .evaluations()
                        .find_by_idempotency_key(task_id, EvaluationType::Ai, key)?;
                if let Some(evaluation) = existing {
                    return Ok((replayed(evaluation), Vec::new()));
                }
            }

            let created = store.evaluations().create(NewEvaluation {
                task_id: task_id.clone(),
                evaluator_id: Some(actor.clone()),
                evaluation_type: EvaluationType::Ai,
                status: EvaluationStatus::Pending,
                assessment: None,
                context_payload: Value::Object(payload),
                idempotency_key: key.clone(),
            });
            let evaluation = match (created, &key) {
                (Ok(evaluation), _) => evaluation,
                (Err(EvaluationError::Conflict { .. }), Some(key)) => {
                    let existing = store.evaluations().find_by_idempotency_key(
                        task_id,
                        EvaluationType::Ai,
                        key,
                    )?;
                    let Some(evaluation) = existing else {
                        return Err(ProgressMarkError::internal(
                            "idempotency conflict without a matching evaluation",
                        ));
                    };
                    return Ok((replayed(evaluation), Vec::new()));
                }
                (Err(err), _) => return Err(err.into()),
            };
            Ok((
                AiSubmission {
                    evaluation: evaluation.clone(),
                    replayed: false,
                },
                vec![EventBody::EvaluationCreated { evaluation }],
            ))
        })?;

        if submission.replayed {
            info!(
                evaluation_id = %submission.evaluation.id,
                task_id = %task_id,
                "idempotent AI evaluation replayed"
            );
        } else {
            info!(
                evaluation_id = %submission.evaluation.id,
                task_id = %task_id,
                "AI evaluation created"
            );
            self.core.dispatch(&submission.evaluation.id);
        }
        Ok(submission)
    }

    pub fn get(&self, id: &EvaluationId) -> Result<Evaluation, ProgressMarkError> {
        self.core
            .store
            .evaluations()
            .get(id)?
            .ok_or_else(|| EvaluationError::NotFound.into())
    }

    pub fn list_for_task(
        &self,
        task_id: &TaskId,
        actor: &UserId,
        filter: &EvaluationFilter,
    ) -> Result<EvaluationPage, ProgressMarkError> {
        let limit = validate_page_limit(filter.limit)?;
        let store = &self.core.store;
        ensure_task_access(store, task_id, actor)?;

        let mut evaluations = store.evaluations().list_for_task(task_id, filter, limit + 1)?;
        let page_len = usize::try_from(limit).unwrap_or(usize::MAX);
        let has_next_page = evaluations.len() > page_len;
        evaluations.truncate(page_len);
        let next_cursor = if has_next_page {
            evaluations.last().map(|evaluation| evaluation.id.to_string())
        } else {
            None
        };
        let total = store.evaluations().count_for_task(task_id, filter)?;

        Ok(EvaluationPage {
            evaluations,
            meta: PageMeta {
                total,
                has_next_page,
                next_cursor,
            },
        })
    }

    /// Newest first.
    pub fn runs(&self, id: &EvaluationId) -> Result<Vec<EvaluationRun>, ProgressMarkError> {
        let store = &self.core.store;
        if store.evaluations().get(id)?.is_none() {
            return Err(EvaluationError::NotFound.into());
        }
        store.runs().list(id).map_err(ProgressMarkError::from)
    }

    /// First step of a trigger: `Pending -> Running` plus a fresh `Running` run.
    pub fn begin(
        &self,
        ctx: &RequestContext,
        id: &EvaluationId,
    ) -> Result<StartedRun, ProgressMarkError> {
        self.core.with_events(ctx, |store| {
            let Some(evaluation) = store.evaluations().get(id)? else {
                return Err(EvaluationError::NotFound.into());
            };
            if evaluation.evaluation_type != EvaluationType::Ai {
                return Err(EvaluationError::InvalidState {
                    message: "only AI evaluations can be triggered".to_string(),
                }
                .into());
            }
            validate_evaluation_transition(evaluation.status, EvaluationStatus::Running)?;
            let evaluation = store
                .evaluations()
                .set_status(id, EvaluationStatus::Running)?;
            let run = store.runs().start(id)?;
            Ok((
                StartedRun {
                    evaluation: evaluation.clone(),
                    run: run.clone(),
                },
                vec![EventBody::EvaluationStarted { evaluation, run }],
            ))
        })
    }

    pub fn context(&self, evaluation: &Evaluation) -> Result<TaskContext, ProgressMarkError> {
        self.core
            .store
            .tasks()
            .context(&evaluation.task_id)?
            .ok_or_else(|| TaskError::NotFound.into())
    }

    /// Last step of a trigger: settles the run and the evaluation together.
    pub fn finish(
        &self,
        ctx: &RequestContext,
        started: &StartedRun,
        outcome: Result<EvaluatorOutput, EvaluationError>,
    ) -> Result<Evaluation, ProgressMarkError> {
        self.core.with_events(ctx, |store| {
            let id = &started.evaluation.id;
            let Some(current) = store.evaluations().get(id)? else {
                return Err(EvaluationError::NotFound.into());
            };
            match outcome {
                Ok(output) => {
                    validate_evaluation_transition(current.status, EvaluationStatus::Completed)?;
                    let json = serde_json::to_value(&output).map_err(ProgressMarkError::internal)?;
                    let run = store.runs().complete(&started.run.id, &json)?;
                    let evaluation = store.evaluations().set_result(id, &output.assessment)?;
                    info!(
                        evaluation_id = %id,
                        run_id = %run.id,
                        score = output.assessment.score_percent,
                        verdict = output.assessment.verdict.as_str(),
                        attempts = output.attempts,
                        "AI evaluation completed"
                    );
                    Ok((
                        evaluation.clone(),
                        vec![EventBody::EvaluationCompleted { evaluation, run }],
                    ))
                }
                Err(err) => {
                    validate_evaluation_transition(current.status, EvaluationStatus::Failed)?;
                    let message = err.to_string();
                    let run = store.runs().fail(&started.run.id, &message)?;
                    let evaluation = store
                        .evaluations()
                        .set_status(id, EvaluationStatus::Failed)?;
                    error!(evaluation_id = %id, run_id = %run.id, "AI evaluation failed: {message}");
                    Ok((
                        evaluation.clone(),
                        vec![EventBody::EvaluationFailed {
                            evaluation,
                            run: Some(run),
                        }],
                    ))
                }
            }
        })
    }

    /// Startup sweep: fails evaluations a previous process left `Running` and
    /// re-dispatches AI evaluations still `Pending`.
    pub fn recover(&self, ctx: &RequestContext) -> Result<RecoveryReport, ProgressMarkError> {
        let report = self.core.with_events(ctx, |store| {
            let mut report = RecoveryReport::default();
            let mut events = Vec::new();
            for evaluation in store
                .evaluations()
                .list_by_status(EvaluationStatus::Running)?
            {
                let mut closed = None;
                for run in store.runs().list(&evaluation.id)? {
                    if run.status == RunStatus::Running {
                        closed = Some(store.runs().fail(&run.id, INTERRUPTED_MESSAGE)?);
                    }
                }
                let evaluation = store
                    .evaluations()
                    .set_status(&evaluation.id, EvaluationStatus::Failed)?;
                warn!(evaluation_id = %evaluation.id, "interrupted AI evaluation marked failed");
                report.failed.push(evaluation.id.clone());
                events.push(EventBody::EvaluationFailed {
                    evaluation,
                    run: closed,
                });
            }
            report.redispatched = store
                .evaluations()
                .list_by_status(EvaluationStatus::Pending)?
                .into_iter()
                .filter(|evaluation| evaluation.evaluation_type == EvaluationType::Ai)
                .map(|evaluation| evaluation.id)
                .collect();
            Ok((report, events))
        })?;

        for id in &report.redispatched {
            warn!(evaluation_id = %id, "re-dispatching pending AI evaluation");
            self.core.dispatch(id);
        }
        Ok(report)
    }
}

fn replayed(evaluation: Evaluation) -> AiSubmission {
    AiSubmission {
        evaluation,
        replayed: true,
    }
}

pub struct EventsApi<'a, S: Store> {
    core: &'a ProgressMark<S>,
}

impl<S: Store> EventsApi<'_, S> {
    pub fn list(
        &self,
        after: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<EventRecord>, ProgressMarkError> {
        self.core.store.events().list(after, limit)
    }
}

fn build_event_record(
    ctx: &RequestContext,
    body: EventBody,
) -> Result<EventRecord, ProgressMarkError> {
    let value = serde_json::to_value(body).map_err(ProgressMarkError::internal)?;
    Ok(EventRecord {
        id: String::new(),
        seq: 0,
        at: Utc::now(),
        correlation_id: ctx.correlation_id.clone(),
        source: ctx.source,
        body: value,
    })
}
