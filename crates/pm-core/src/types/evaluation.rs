use crate::types::enums::{EvaluationStatus, EvaluationType, RunStatus, Verdict};
use crate::types::ids::{EvaluationId, RunId, TaskId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Evaluation {
    pub id: EvaluationId,
    pub task_id: TaskId,
    pub evaluator_id: Option<UserId>,
    #[serde(rename = "type")]
    pub evaluation_type: EvaluationType,
    pub status: EvaluationStatus,
    pub score_percent: Option<u8>,
    pub summary: Option<String>,
    pub verdict: Option<Verdict>,
    #[schema(value_type = Object)]
    pub context_payload: Value,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn assessment(&self) -> Option<Assessment> {
        Some(Assessment {
            score_percent: self.score_percent?,
            summary: self.summary.clone()?,
            verdict: self.verdict?,
        })
    }
}

/// One execution of the AI pipeline for an evaluation. Immutable once it leaves `Running`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EvaluationRun {
    pub id: RunId,
    pub evaluation_id: EvaluationId,
    pub status: RunStatus,
    #[schema(value_type = Option<Object>)]
    pub output_json: Option<Value>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The score/summary/verdict triple every evaluation ends with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Assessment {
    pub score_percent: u8,
    pub summary: String,
    pub verdict: Verdict,
}

impl Assessment {
    /// Builds an assessment from a raw score, clamping to `0..=100` and deriving the verdict.
    pub fn from_score(score: i64, summary: impl Into<String>) -> Self {
        let score_percent = clamp_score(score);
        Self {
            score_percent,
            summary: summary.into(),
            verdict: Verdict::from_score(score_percent),
        }
    }
}

pub fn clamp_score(score: i64) -> u8 {
    u8::try_from(score.clamp(0, 100)).unwrap_or(100)
}

/// Which rung of the parsing ladder produced an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Extraction {
    Template,
    Legacy,
    LastResort,
    Fallback,
}

impl Extraction {
    /// Anything but a clean template match.
    pub fn is_degraded(self) -> bool {
        !matches!(self, Self::Template)
    }
}

/// What an evaluator hands back to the orchestrator; persisted verbatim as the run output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EvaluatorOutput {
    #[serde(flatten)]
    pub assessment: Assessment,
    pub attempts: u32,
    pub structure_valid: bool,
    pub extraction: Extraction,
    pub raw_response: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvaluation {
    pub task_id: TaskId,
    pub evaluator_id: Option<UserId>,
    pub evaluation_type: EvaluationType,
    pub status: EvaluationStatus,
    pub assessment: Option<Assessment>,
    pub context_payload: Value,
    pub idempotency_key: Option<String>,
}

/// An evaluation that has just been moved to `Running`, with its open run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedRun {
    pub evaluation: Evaluation,
    pub run: EvaluationRun,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_score_clamps_and_derives_verdict() {
        let high = Assessment::from_score(150, "over");
        assert_eq!(high.score_percent, 100);
        assert_eq!(high.verdict, Verdict::Pass);

        let low = Assessment::from_score(-20, "under");
        assert_eq!(low.score_percent, 0);
        assert_eq!(low.verdict, Verdict::Fail);

        let mid = Assessment::from_score(65, "mid");
        assert_eq!(mid.verdict, Verdict::Borderline);
    }

    #[test]
    fn evaluator_output_flattens_assessment() {
        let output = EvaluatorOutput {
            assessment: Assessment::from_score(85, "solid"),
            attempts: 1,
            structure_valid: true,
            extraction: Extraction::Template,
            raw_response: "Score: 85%".to_string(),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["score_percent"], 85);
        assert_eq!(json["verdict"], "pass");
        assert_eq!(json["extraction"], "template");
    }

    #[test]
    fn only_template_extraction_is_clean() {
        assert!(!Extraction::Template.is_degraded());
        assert!(Extraction::Legacy.is_degraded());
        assert!(Extraction::LastResort.is_degraded());
        assert!(Extraction::Fallback.is_degraded());
    }
}
