pub mod client;
pub mod gemini;
pub mod generator;
pub mod parser;
pub mod prompt;

pub use client::{AiError, AiEvaluator, MAX_ATTEMPTS, RetryPolicy};
pub use gemini::GeminiGenerator;
pub use generator::{DisabledGenerator, GenerateError, StubGenerator, TextGenerator};
pub use parser::ParsedResponse;
