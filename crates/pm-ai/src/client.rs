use crate::generator::{GenerateError, TextGenerator};
use crate::parser::{parse, validate_structure};
use crate::prompt::build_prompt;
use async_trait::async_trait;
use pm_core::TaskEvaluator;
use pm_core::error::EvaluationError;
use pm_core::types::{EvaluatorOutput, TaskContext};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

const PREVIEW_CHARS: usize = 200;

/// Hard ceiling on model calls per evaluation, whatever the policy asks for.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(1000),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` bounded to `1..=MAX_ATTEMPTS`.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_ATTEMPTS)
    }

    /// Linear: the wait after attempt `n` is `n * backoff_base`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI evaluation failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: GenerateError,
    },
}

impl From<AiError> for EvaluationError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::Exhausted { attempts, source } => EvaluationError::ExternalService {
                attempts,
                message: source.to_string(),
            },
        }
    }
}

/// Prompt, call, validate, parse; with retries around the call.
pub struct AiEvaluator {
    generator: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
}

impl AiEvaluator {
    pub fn new(generator: Arc<dyn TextGenerator>, policy: RetryPolicy) -> Self {
        Self { generator, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// A call error is retried until attempts run out. A structurally invalid
    /// answer is retried too, except on the last attempt where it is parsed as is.
    pub async fn assess(&self, context: &TaskContext) -> Result<EvaluatorOutput, AiError> {
        let prompt = build_prompt(context);
        let max_attempts = self.policy.attempts();
        let task_id = &context.task.id;
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(
                task_id = %task_id,
                attempt,
                worklogs = context.worklogs.len(),
                "sending evaluation request"
            );

            match self.call(&prompt).await {
                Ok(text) => {
                    let structure_valid = validate_structure(&text);
                    if !structure_valid {
                        warn!(
                            task_id = %task_id,
                            attempt,
                            response = %preview(&text),
                            "AI response structure invalid"
                        );
                        if attempt < max_attempts {
                            sleep(self.policy.backoff(attempt)).await;
                            continue;
                        }
                        warn!(task_id = %task_id, "attempts exhausted, parsing response anyway");
                    }

                    let parsed = parse(&text);
                    info!(
                        task_id = %task_id,
                        attempt,
                        score = parsed.assessment.score_percent,
                        structure_valid,
                        "AI evaluation response parsed"
                    );
                    return Ok(EvaluatorOutput {
                        assessment: parsed.assessment,
                        attempts: attempt,
                        structure_valid,
                        extraction: parsed.extraction,
                        raw_response: text,
                    });
                }
                Err(err) => {
                    warn!(task_id = %task_id, attempt, "AI call failed: {err}");
                    if attempt >= max_attempts {
                        return Err(AiError::Exhausted {
                            attempts: attempt,
                            source: err,
                        });
                    }
                    sleep(self.policy.backoff(attempt)).await;
                }
            }
        }
    }

    async fn call(&self, prompt: &str) -> Result<String, GenerateError> {
        match timeout(self.policy.call_timeout, self.generator.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(GenerateError::Timeout {
                secs: self.policy.call_timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl TaskEvaluator for AiEvaluator {
    async fn evaluate(&self, context: &TaskContext) -> Result<EvaluatorOutput, EvaluationError> {
        self.assess(context).await.map_err(EvaluationError::from)
    }
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
