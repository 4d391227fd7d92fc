//! Google Gemini `generateContent` client.

use crate::generator::{GenerateError, TextGenerator};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

/// Longest slice of an error body kept in messages.
const ERROR_BODY_LIMIT: usize = 500;

pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Value>,
}

impl GeminiGenerator {
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GenerateError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GenerateError::Unavailable {
                reason: "Gemini API key is empty".to_string(),
            });
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GenerateError::Transport {
                reason: err.to_string(),
            })?;
        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        debug!(model = %self.model, prompt_len = prompt.len(), "calling Gemini");
        let request = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|err| GenerateError::Transport {
                reason: err.without_url().to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| GenerateError::Transport {
                reason: err.without_url().to_string(),
            })?;
        if !status.is_success() {
            return Err(GenerateError::Status {
                status: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|err| GenerateError::Malformed {
                reason: err.to_string(),
            })?;
        extract_text(parsed)
    }
}

/// Concatenates the text parts of the first candidate.
fn extract_text(response: GenerateResponse) -> Result<String, GenerateError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(GenerateError::Malformed {
            reason: "no candidates in response".to_string(),
        });
    };
    let text: String = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        return Err(GenerateError::Malformed {
            reason: "candidate has no text".to_string(),
        });
    }
    Ok(text)
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: Value) -> GenerateResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn request_body_shape() {
        let request = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: "hello" }],
            }],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"contents": [{"role": "user", "parts": [{"text": "hello"}]}]})
        );
    }

    #[test]
    fn joins_text_parts_of_first_candidate() {
        let text = extract_text(response(json!({
            "candidates": [
                {"content": {"parts": [{"text": "Score: 85%\n"}, {"text": "Summary: ok"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        })))
        .unwrap();
        assert_eq!(text, "Score: 85%\nSummary: ok");
    }

    #[test]
    fn missing_candidates_or_text_is_malformed() {
        assert!(matches!(
            extract_text(response(json!({}))),
            Err(GenerateError::Malformed { .. })
        ));
        assert!(matches!(
            extract_text(response(json!({"candidates": [{"finishReason": "SAFETY"}]}))),
            Err(GenerateError::Malformed { .. })
        ));
    }

    #[test]
    fn endpoint_includes_model() {
        let generator = GeminiGenerator::new(
            "key",
            Some("gemini-pro".to_string()),
            Some("http://localhost:9999/v1beta/".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            generator.endpoint(),
            "http://localhost:9999/v1beta/models/gemini-pro:generateContent"
        );
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(GeminiGenerator::new(" ", None, None, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
