pub mod extractor;
pub mod parser;
pub mod prompt;
pub mod sanitize;
pub mod types;

pub use extractor::PrescriptionExtractor;
pub use types::{Frequency, FrequencyPeriod, StructuredEntry};

use thiserror::Error;

use crate::pipeline::llm::LlmError;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Treatment plan is empty after sanitization")]
    EmptyPlan,

    #[error("Language model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Plan did not yield a valid structured entry after {attempts} attempts: {reason}")]
    SchemaViolation { attempts: u32, reason: String },
}
