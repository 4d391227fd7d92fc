use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("provider unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("request failed: {reason}")]
    Transport { reason: String },
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider response was malformed: {reason}")]
    Malformed { reason: String },
    #[error("provider call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Single-shot text completion with no conversation state.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

/// Offline generator for local development. Answers in the mandated template,
/// scoring from how many work reports the prompt lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubGenerator;

impl StubGenerator {
    const BASE_SCORE: usize = 40;
    const PER_REPORT: usize = 15;

    /// Report lines between the `WORK REPORTS:` and `INSTRUCTIONS:` headers.
    fn count_reports(prompt: &str) -> usize {
        prompt
            .lines()
            .skip_while(|line| line.trim() != "WORK REPORTS:")
            .skip(1)
            .take_while(|line| line.trim() != "INSTRUCTIONS:")
            .filter(|line| line.starts_with("- ") && line.ends_with(" minutes)"))
            .count()
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let reports = Self::count_reports(prompt);
        let score = (Self::BASE_SCORE + Self::PER_REPORT * reports).min(100);
        let verdict = match score {
            80.. => "pass",
            60..=79 => "conditional",
            _ => "fail",
        };
        Ok(format!(
            "Score: {score}%\nSummary: Offline estimate from {reports} work report(s)\nVerdict: {verdict}"
        ))
    }
}

/// Fails every call; evaluations submitted while AI is switched off end `Failed`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerateError> {
        Err(GenerateError::Unavailable {
            reason: "AI evaluation is disabled".to_string(),
        })
    }
}
