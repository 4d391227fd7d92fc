use crate::types::evaluation::{Evaluation, EvaluationRun};
use crate::types::task::{Task, Worklog};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", content = "payload")]
pub enum EventBody {
    TaskCreated {
        task: Task,
    },
    WorklogAdded {
        worklog: Worklog,
    },

    EvaluationCreated {
        evaluation: Evaluation,
    },
    EvaluationStarted {
        evaluation: Evaluation,
        run: EvaluationRun,
    },
    EvaluationCompleted {
        evaluation: Evaluation,
        run: EvaluationRun,
    },
    EvaluationFailed {
        evaluation: Evaluation,
        run: Option<EvaluationRun>,
    },
}
