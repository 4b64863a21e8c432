use super::sanitize::wrap_plan_for_prompt;

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"
You are a prescription structuring assistant for a pediatric rheumatology
service. Your ONLY role is to convert one free-text treatment plan into a
structured prescription record. Plans may be written in Spanish or English.

RULES — ABSOLUTE, NO EXCEPTIONS:
1. Extract ONLY what is explicitly stated in the plan.
2. NEVER add clinical interpretation, advice, or a recommended dose.
3. NEVER infer a dose, unit, or frequency that is not written.
4. If a field is not stated, output null for that field.
5. Preserve numeric values exactly as written.
6. Output EXACTLY one JSON object wrapped in ```json``` fences, nothing else.
"#;

/// Build the extraction prompt for one treatment plan.
pub fn build_extraction_prompt(sanitized_plan: &str) -> String {
    format!(
        r#"{plan}

Extract the prescription from the above treatment plan into this exact JSON structure:

```json
{{
  "drug": "drug name as written",
  "dose_value": 0.0,
  "dose_unit": "mg | mg_per_kg | null",
  "frequency": {{
    "times": 1,
    "period": "day | week"
  }},
  "route": "oral | subcutaneous | intravenous | intramuscular | topical | other | null",
  "confidence": 0.0
}}
```

Notes:
- "semanal" / "weekly" means {{"times": 1, "period": "week"}}.
- "cada 8 horas" means {{"times": 3, "period": "day"}}; "cada 12 horas" means {{"times": 2, "period": "day"}}.
- "mg/kg" doses use dose_unit "mg_per_kg".
- "confidence" is your certainty in the whole extraction, between 0.0 and 1.0.
"#,
        plan = wrap_plan_for_prompt(sanitized_plan)
    )
}

/// Re-prompt after a schema failure, naming what was wrong.
pub fn build_retry_prompt(sanitized_plan: &str, failure_reason: &str) -> String {
    format!(
        "Your previous answer was rejected: {failure_reason}.\n\n{}",
        build_extraction_prompt(sanitized_plan)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_contains_plan_text() {
        let prompt = build_extraction_prompt("Metotrexato 15 mg semanal");
        assert!(prompt.contains("Metotrexato 15 mg semanal"));
        assert!(prompt.contains("<TREATMENT_PLAN>"));
        assert!(prompt.contains("</TREATMENT_PLAN>"));
    }

    #[test]
    fn retry_prompt_names_failure() {
        let prompt = build_retry_prompt("Ibuprofeno 10 mg/kg", "dose_value present without dose_unit");
        assert!(prompt.contains("rejected"));
        assert!(prompt.contains("dose_value present without dose_unit"));
        assert!(prompt.contains("Ibuprofeno 10 mg/kg"));
    }

    #[test]
    fn system_prompt_enforces_extraction_only() {
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("ONLY"));
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("NEVER infer"));
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("```json```"));
    }
}
