use super::parser::parse_extraction_response;
use super::prompt::{build_extraction_prompt, build_retry_prompt, EXTRACTION_SYSTEM_PROMPT};
use super::sanitize::sanitize_plan_text;
use super::types::StructuredEntry;
use super::ExtractionError;
use crate::pipeline::llm::LlmClient;

/// Per-attempt confidence attenuation: an extraction that needed a
/// re-prompt is less trustworthy than one accepted first time.
const RETRY_ATTENUATION: f32 = 0.85;

/// Language-model-backed prescription extractor with schema validation
/// and bounded re-prompting.
pub struct PrescriptionExtractor<'a, L: LlmClient> {
    llm: &'a L,
    model: String,
    confidence_floor: f32,
    max_attempts: u32,
}

impl<'a, L: LlmClient> PrescriptionExtractor<'a, L> {
    pub fn new(llm: &'a L, model: &str, confidence_floor: f32, retries: u32) -> Self {
        Self {
            llm,
            model: model.to_string(),
            confidence_floor,
            max_attempts: 1 + retries,
        }
    }

    pub fn extract(&self, plan_text: &str) -> Result<StructuredEntry, ExtractionError> {
        let sanitized = sanitize_plan_text(plan_text);
        if sanitized.text.is_empty() {
            return Err(ExtractionError::EmptyPlan);
        }

        let mut last_failure = String::new();

        for attempt in 1..=self.max_attempts {
            let prompt = if attempt == 1 {
                build_extraction_prompt(&sanitized.text)
            } else {
                build_retry_prompt(&sanitized.text, &last_failure)
            };

            let response =
                match self.llm.generate(&self.model, &prompt, EXTRACTION_SYSTEM_PROMPT) {
                    Ok(response) => response,
                    Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                        tracing::warn!(attempt, error = %e, "Extraction LLM call failed, retrying");
                        last_failure = "previous call failed".into();
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

            match parse_extraction_response(&response) {
                Ok(mut entry) => {
                    entry.confidence *= RETRY_ATTENUATION.powi(attempt as i32 - 1);
                    entry.low_confidence = entry.confidence < self.confidence_floor;
                    if entry.low_confidence {
                        tracing::warn!(
                            drug = %entry.drug,
                            confidence = entry.confidence,
                            floor = self.confidence_floor,
                            "Low-confidence extraction"
                        );
                    }
                    tracing::debug!(drug = %entry.drug, attempt, "Prescription extracted");
                    return Ok(entry);
                }
                Err(reason) => {
                    tracing::warn!(attempt, %reason, "Extraction response failed schema validation");
                    last_failure = reason;
                }
            }
        }

        Err(ExtractionError::SchemaViolation {
            attempts: self.max_attempts,
            reason: last_failure,
        })
    }
}
