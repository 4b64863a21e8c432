use serde::Deserialize;

use super::keywords::contains_rejection_language;
use super::prompt::{build_corroboration_prompt, CORROBORATION_SYSTEM_PROMPT};
use super::SynthesisError;
use crate::models::{PatientContext, ValidationVerdict, VerdictStatus};
use crate::pipeline::extract::StructuredEntry;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::retrieve::RetrievalResult;
use crate::pipeline::rules::DoseRule;

/// Reconciles the structured entry, the applicable rule, and the
/// retrieved evidence into a verdict.
///
/// The decision policy is fail-closed: APPROVED requires a satisfied
/// codified rule AND at least one corroborating chunk; every lesser
/// combination degrades to ALERT or REJECTED.
pub struct DecisionSynthesizer<'a, L: LlmClient> {
    llm: &'a L,
    model: String,
    retries: u32,
    backoff_ms: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum Corroboration {
    Corroborated,
    Contradicted,
    Unclear,
}

impl<'a, L: LlmClient> DecisionSynthesizer<'a, L> {
    pub fn new(llm: &'a L, model: &str, retries: u32, backoff_ms: u64) -> Self {
        Self {
            llm,
            model: model.to_string(),
            retries,
            backoff_ms,
        }
    }

    pub fn decide(
        &self,
        entry: &StructuredEntry,
        rule: Option<&DoseRule>,
        evidence: &RetrievalResult,
        patient: &PatientContext,
    ) -> Result<ValidationVerdict, SynthesisError> {
        // 1. Low extraction confidence caps the outcome at ALERT,
        //    regardless of rule and evidence.
        if entry.low_confidence {
            return Ok(ValidationVerdict::new(
                VerdictStatus::Alert,
                "low-confidence extraction",
                vec![],
                None,
                entry.confidence,
            ));
        }

        let chunk_ids: Vec<_> = evidence.hits.iter().map(|h| h.chunk_id).collect();
        let top_score = evidence.hits.first().map(|h| h.score).unwrap_or(0.0);

        if let Some(rule) = rule {
            let prescribed = entry.daily_dose_mg(patient.weight_kg);
            let limit = rule.max_daily_mg(patient.weight_kg);

            // 2. Numeric limit exceeded: rejected no matter the evidence.
            // Same tolerance as the frequency check, so a dose exactly at
            // the limit does not trip on f64 rounding.
            if prescribed > limit + 1e-9 {
                return Ok(ValidationVerdict::new(
                    VerdictStatus::Rejected,
                    format!(
                        "prescribed dose {prescribed:.2} mg/day exceeds the limit {limit:.2} mg/day of rule {}",
                        rule.id
                    ),
                    vec![],
                    Some(rule.id.clone()),
                    entry.confidence,
                ));
            }

            if let Some(max_per_day) = rule.max_doses_per_day {
                if entry.frequency.per_day() > max_per_day as f64 + 1e-9 {
                    return Ok(ValidationVerdict::new(
                        VerdictStatus::Rejected,
                        format!(
                            "administration frequency exceeds the {max_per_day} dose(s) per day allowed by rule {}",
                            rule.id
                        ),
                        vec![],
                        Some(rule.id.clone()),
                        entry.confidence,
                    ));
                }
            }

            // 3. Within limits with corroborating evidence: the only
            //    path to APPROVED.
            if !evidence.is_empty() {
                return Ok(ValidationVerdict::new(
                    VerdictStatus::Approved,
                    format!("within the limit of rule {} with corroborating guideline evidence", rule.id),
                    chunk_ids,
                    Some(rule.id.clone()),
                    entry.confidence.min(top_score),
                ));
            }

            // 4. Within limits but nothing retrieved.
            return Ok(ValidationVerdict::new(
                VerdictStatus::Alert,
                "within numeric limit but no corroborating guideline found",
                vec![],
                Some(rule.id.clone()),
                entry.confidence * 0.75,
            ));
        }

        // 5. No codified rule for this drug.
        if evidence.is_empty() {
            return Ok(ValidationVerdict::new(
                VerdictStatus::Rejected,
                "unknown drug, no evidence",
                vec![],
                None,
                entry.confidence,
            ));
        }

        match self.corroborate(entry, patient, evidence)? {
            Corroboration::Corroborated => Ok(ValidationVerdict::new(
                VerdictStatus::Alert,
                "no codified rule; retrieved guidelines corroborate the stated dose",
                chunk_ids,
                None,
                entry.confidence.min(top_score) * 0.9,
            )),
            Corroboration::Contradicted => Ok(ValidationVerdict::new(
                VerdictStatus::Rejected,
                "retrieved guidelines contradict the stated dose",
                chunk_ids,
                None,
                entry.confidence.min(top_score),
            )),
            Corroboration::Unclear => Ok(ValidationVerdict::new(
                VerdictStatus::Rejected,
                "no codified rule and retrieved guidelines are inconclusive",
                chunk_ids,
                None,
                entry.confidence * 0.5,
            )),
        }
    }

    /// Bounded LLM reasoning step over the retrieved excerpts. Anything
    /// the model cannot answer cleanly is treated as unclear.
    fn corroborate(
        &self,
        entry: &StructuredEntry,
        patient: &PatientContext,
        evidence: &RetrievalResult,
    ) -> Result<Corroboration, SynthesisError> {
        let prompt = build_corroboration_prompt(entry, patient, &evidence.hits);

        let mut attempt = 0;
        let response = loop {
            match self
                .llm
                .generate(&self.model, &prompt, CORROBORATION_SYSTEM_PROMPT)
            {
                Ok(response) => break response,
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "Corroboration call failed, retrying");
                    std::thread::sleep(std::time::Duration::from_millis(
                        self.backoff_ms * attempt as u64,
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        };

        Ok(parse_corroboration(&response))
    }
}

#[derive(Deserialize)]
struct RawAssessment {
    assessment: Option<String>,
    justification: Option<String>,
}

fn parse_corroboration(response: &str) -> Corroboration {
    let json_str = match extract_json_block(response) {
        Some(json) => json,
        None => {
            tracing::warn!("Corroboration response carried no JSON, treating as unclear");
            return Corroboration::Unclear;
        }
    };

    let raw: RawAssessment = match serde_json::from_str(&json_str) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "Corroboration JSON unparseable, treating as unclear");
            return Corroboration::Unclear;
        }
    };

    let assessment = match raw.assessment.as_deref().map(str::trim) {
        Some("corroborated") => Corroboration::Corroborated,
        Some("contradicted") => Corroboration::Contradicted,
        _ => Corroboration::Unclear,
    };

    // The justification can betray the classification: rejection language
    // in the explanation overrides a "corroborated" label.
    if assessment == Corroboration::Corroborated {
        if let Some(justification) = &raw.justification {
            if contains_rejection_language(justification) {
                tracing::warn!(
                    "Corroboration justification contains rejection language, overriding to contradicted"
                );
                return Corroboration::Contradicted;
            }
        }
    }

    assessment
}

fn extract_json_block(response: &str) -> Option<String> {
    if let Some(start) = response.find("```json") {
        let content_start = start + 7;
        let end = response[content_start..].find("```")?;
        return Some(response[content_start..content_start + end].trim().to_string());
    }
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| response[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::{Frequency, FrequencyPeriod};
    use crate::pipeline::index::{QueryVector, SearchHit};
    use crate::pipeline::llm::MockLlmClient;
    use crate::pipeline::rules::{DoseUnit, RuleRegistry};
    use uuid::Uuid;

    fn entry(drug: &str, dose_value: f64, unit: DoseUnit, frequency: Frequency) -> StructuredEntry {
        StructuredEntry {
            drug: drug.into(),
            dose_value,
            dose_unit: unit,
            frequency,
            route: None,
            confidence: 0.9,
            low_confidence: false,
        }
    }

    fn weekly(times: u32) -> Frequency {
        Frequency { times, period: FrequencyPeriod::Week }
    }

    fn patient() -> PatientContext {
        PatientContext { age_months: 96, weight_kg: 30.0 }
    }

    fn evidence(scores: &[f32]) -> RetrievalResult {
        RetrievalResult {
            query_text: "dosis de metotrexato".into(),
            query: QueryVector { model_id: "mock-embedder-v1".into(), vector: vec![1.0] },
            hits: scores
                .iter()
                .map(|&score| SearchHit {
                    chunk_id: Uuid::new_v4(),
                    document_id: Uuid::new_v4(),
                    content: "Dosis habitual 10-15 mg/m2 semanal".into(),
                    section_title: None,
                    score,
                })
                .collect(),
        }
    }

    fn mtx_registry() -> RuleRegistry {
        RuleRegistry::from_json(
            r#"{"version": "test-1", "rules": [
                {"id": "mtx-weekly", "drug": "metotrexato",
                 "max_dose": 20.0, "unit": "mg", "period": "week",
                 "max_doses_per_day": 1}]}"#,
        )
        .unwrap()
    }

    fn synthesizer(llm: &MockLlmClient) -> DecisionSynthesizer<'_, MockLlmClient> {
        DecisionSynthesizer::new(llm, "medgemma", 0, 0)
    }

    #[test]
    fn within_limit_with_evidence_is_approved() {
        let llm = MockLlmClient::new("unused");
        let registry = mtx_registry();
        let rule = registry.lookup("metotrexato", 96, 30.0);
        let e = entry("metotrexato", 15.0, DoseUnit::Mg, weekly(1));
        let ev = evidence(&[0.8]);

        let verdict = synthesizer(&llm).decide(&e, rule, &ev, &patient()).unwrap();
        assert_eq!(verdict.status, VerdictStatus::Approved);
        assert_eq!(verdict.matched_rule_id.as_deref(), Some("mtx-weekly"));
        assert_eq!(verdict.cited_chunk_ids.len(), 1);
    }

    #[test]
    fn exceeding_limit_is_rejected_despite_evidence() {
        let llm = MockLlmClient::new("unused");
        let registry = mtx_registry();
        let rule = registry.lookup("metotrexato", 96, 30.0);
        let e = entry("metotrexato", 25.0, DoseUnit::Mg, weekly(1));
        let ev = evidence(&[0.9]);

        let verdict = synthesizer(&llm).decide(&e, rule, &ev, &patient()).unwrap();
        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert_eq!(verdict.matched_rule_id.as_deref(), Some("mtx-weekly"));
        assert!(verdict.reason.contains("exceeds"));
    }

    #[test]
    fn dose_exactly_at_limit_is_within() {
        let llm = MockLlmClient::new("unused");
        let registry = mtx_registry();
        let rule = registry.lookup("metotrexato", 96, 30.0);
        // 20 mg weekly against a 20 mg/week limit: at the limit, not over
        let e = entry("metotrexato", 20.0, DoseUnit::Mg, weekly(1));

        let verdict = synthesizer(&llm)
            .decide(&e, rule, &evidence(&[0.8]), &patient())
            .unwrap();
        assert_eq!(verdict.status, VerdictStatus::Approved);
    }

    #[test]
    fn excessive_frequency_is_rejected() {
        let llm = MockLlmClient::new("unused");
        let registry = mtx_registry();
        let rule = registry.lookup("metotrexato", 96, 30.0);
        // Tiny dose so the daily limit holds and only the frequency cap trips
        let e = entry(
            "metotrexato",
            0.1,
            DoseUnit::Mg,
            Frequency { times: 3, period: FrequencyPeriod::Day },
        );

        let verdict = synthesizer(&llm)
            .decide(&e, rule, &evidence(&[0.9]), &patient())
            .unwrap();
        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert!(verdict.reason.contains("frequency"));
    }

    #[test]
    fn within_limit_without_evidence_is_alert() {
        let llm = MockLlmClient::new("unused");
        let registry = mtx_registry();
        let rule = registry.lookup("metotrexato", 96, 30.0);
        let e = entry("metotrexato", 15.0, DoseUnit::Mg, weekly(1));

        let verdict = synthesizer(&llm)
            .decide(&e, rule, &evidence(&[]), &patient())
            .unwrap();
        assert_eq!(verdict.status, VerdictStatus::Alert);
        assert_eq!(verdict.reason, "within numeric limit but no corroborating guideline found");
        assert_eq!(verdict.matched_rule_id.as_deref(), Some("mtx-weekly"));
        assert!(verdict.cited_chunk_ids.is_empty());
    }

    #[test]
    fn low_confidence_caps_at_alert_even_when_approvable() {
        let llm = MockLlmClient::new("unused");
        let registry = mtx_registry();
        let rule = registry.lookup("metotrexato", 96, 30.0);
        let mut e = entry("metotrexato", 15.0, DoseUnit::Mg, weekly(1));
        e.confidence = 0.3;
        e.low_confidence = true;

        let verdict = synthesizer(&llm)
            .decide(&e, rule, &evidence(&[0.9]), &patient())
            .unwrap();
        assert_eq!(verdict.status, VerdictStatus::Alert);
        assert_eq!(verdict.reason, "low-confidence extraction");
    }

    #[test]
    fn unknown_drug_without_evidence_is_rejected() {
        let llm = MockLlmClient::new("unused");
        let e = entry("anakinra", 2.0, DoseUnit::MgPerKg, Frequency {
            times: 1,
            period: FrequencyPeriod::Day,
        });

        let verdict = synthesizer(&llm)
            .decide(&e, None, &evidence(&[]), &patient())
            .unwrap();
        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert_eq!(verdict.reason, "unknown drug, no evidence");
    }

    #[test]
    fn corroborated_without_rule_is_alert_never_approved() {
        let llm = MockLlmClient::new(
            r#"```json
{"assessment": "corroborated", "justification": "El extracto [1] indica esta dosis como habitual"}
```"#,
        );
        let e = entry("anakinra", 2.0, DoseUnit::MgPerKg, Frequency {
            times: 1,
            period: FrequencyPeriod::Day,
        });

        let verdict = synthesizer(&llm)
            .decide(&e, None, &evidence(&[0.85]), &patient())
            .unwrap();
        assert_eq!(verdict.status, VerdictStatus::Alert);
        assert_eq!(verdict.cited_chunk_ids.len(), 1);
    }

    #[test]
    fn contradicted_without_rule_is_rejected() {
        let llm = MockLlmClient::new(
            r#"```json
{"assessment": "contradicted", "justification": "La dosis supera lo indicado en [1]"}
```"#,
        );
        let e = entry("anakinra", 20.0, DoseUnit::MgPerKg, Frequency {
            times: 1,
            period: FrequencyPeriod::Day,
        });

        let verdict = synthesizer(&llm)
            .decide(&e, None, &evidence(&[0.85]), &patient())
            .unwrap();
        assert_eq!(verdict.status, VerdictStatus::Rejected);
    }

    #[test]
    fn garbled_corroboration_is_unclear_and_rejected() {
        let llm = MockLlmClient::new("I think it is probably fine");
        let e = entry("anakinra", 2.0, DoseUnit::MgPerKg, Frequency {
            times: 1,
            period: FrequencyPeriod::Day,
        });

        let verdict = synthesizer(&llm)
            .decide(&e, None, &evidence(&[0.85]), &patient())
            .unwrap();
        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert!(verdict.reason.contains("inconclusive"));
    }

    #[test]
    fn rejection_language_overrides_corroborated_label() {
        let llm = MockLlmClient::new(
            r#"```json
{"assessment": "corroborated", "justification": "Aunque la dosis supera el máximo del extracto [1]"}
```"#,
        );
        let e = entry("anakinra", 2.0, DoseUnit::MgPerKg, Frequency {
            times: 1,
            period: FrequencyPeriod::Day,
        });

        let verdict = synthesizer(&llm)
            .decide(&e, None, &evidence(&[0.85]), &patient())
            .unwrap();
        assert_eq!(verdict.status, VerdictStatus::Rejected);
    }
}
