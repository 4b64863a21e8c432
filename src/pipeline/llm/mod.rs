pub mod ollama;

pub use ollama::{MockLlmClient, OllamaClient};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Ollama is not running at {0}")]
    Connection(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("Ollama returned error (status {status}): {body}")]
    Endpoint { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),
}

impl LlmError {
    /// Transient failures worth an automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Connection(_)
                | LlmError::Timeout(_)
                | LlmError::HttpClient(_)
                | LlmError::Endpoint { .. }
        )
    }
}

/// LLM text generation seam, shared by the extractor and the synthesizer.
pub trait LlmClient {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError>;
}
