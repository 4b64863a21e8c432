use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{LlmClient, LlmError};

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    /// Create a new OllamaClient pointing at an Ollama-compatible endpoint.
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        }
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl LlmClient for OllamaClient {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model,
            prompt,
            system,
            stream: false,
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                LlmError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        Ok(parsed.response)
    }
}

/// Mock LLM client for testing — returns configured responses in order,
/// repeating the last one once the queue is exhausted.
pub struct MockLlmClient {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            last: Mutex::new(response.to_string()),
        }
    }

    /// Queue responses to be returned on successive calls.
    pub fn with_responses(responses: &[&str]) -> Self {
        let mut queue: VecDeque<String> = responses.iter().map(|s| s.to_string()).collect();
        let last = queue.back().cloned().unwrap_or_default();
        queue.pop_back();
        Self {
            responses: Mutex::new(queue),
            last: Mutex::new(last),
        }
    }
}

impl LlmClient for MockLlmClient {
    fn generate(&self, _model: &str, _prompt: &str, _system: &str) -> Result<String, LlmError> {
        let mut queue = self.responses.lock().unwrap();
        match queue.pop_front() {
            Some(response) => Ok(response),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}
