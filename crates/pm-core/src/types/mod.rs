pub mod enums;
pub mod evaluation;
pub mod event;
pub mod ids;
pub mod io;
pub mod task;

pub use enums::{EvaluationStatus, EvaluationType, Priority, RunStatus, TaskStatus, Verdict};
pub use evaluation::{
    Assessment, Evaluation, EvaluationRun, EvaluatorOutput, Extraction, NewEvaluation, StartedRun,
};
pub use event::EventBody;
pub use ids::{EvaluationId, IdError, RunId, TaskId, UserId, WorklogId};
pub use io::{
    AiSubmission, CreateAiEvaluationInput, CreateManagerEvaluationInput, CreateTaskInput,
    CreateWorklogInput, EvaluationFilter, EvaluationPage, PageMeta,
};
pub use task::{Task, TaskContext, Worklog};
