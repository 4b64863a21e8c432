pub mod keywords;
pub mod prompt;
pub mod synthesizer;

pub use synthesizer::DecisionSynthesizer;

use thiserror::Error;

use crate::pipeline::llm::LlmError;

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Corroboration LLM call failed: {0}")]
    Llm(#[from] LlmError),
}
