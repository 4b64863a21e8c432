use crate::models::PatientContext;
use crate::pipeline::extract::StructuredEntry;
use crate::pipeline::index::SearchHit;

pub const CORROBORATION_SYSTEM_PROMPT: &str = r#"
You are a prescription safety reviewer for a pediatric rheumatology
service. You are given guideline excerpts and one prescription. Your ONLY
role is to judge whether the excerpts support the prescribed dose for
this patient.

RULES — ABSOLUTE, NO EXCEPTIONS:
1. Base your judgment ONLY on the excerpts provided.
2. NEVER use outside knowledge to fill gaps in the excerpts.
3. If the excerpts do not clearly address this drug and dose, answer "unclear".
4. Output EXACTLY one JSON object wrapped in ```json``` fences, nothing else.
"#;

/// Build the corroboration prompt: prescription, patient, and the
/// retrieved guideline excerpts.
pub fn build_corroboration_prompt(
    entry: &StructuredEntry,
    patient: &PatientContext,
    hits: &[SearchHit],
) -> String {
    let mut excerpts = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let section = hit.section_title.as_deref().unwrap_or("(sin sección)");
        excerpts.push_str(&format!(
            "[{n}] ({section})\n{content}\n\n",
            n = i + 1,
            content = hit.content
        ));
    }

    let unit = match entry.dose_unit {
        crate::pipeline::rules::DoseUnit::Mg => "mg",
        crate::pipeline::rules::DoseUnit::MgPerKg => "mg/kg",
    };
    let period = match entry.frequency.period {
        crate::pipeline::extract::FrequencyPeriod::Day => "day",
        crate::pipeline::extract::FrequencyPeriod::Week => "week",
    };

    format!(
        r#"Guideline excerpts:

{excerpts}Prescription under review:
- drug: {drug}
- dose: {dose} {unit}, {times} time(s) per {period}
- patient: {age} months old, {weight} kg

Do the excerpts support this dose for this patient? Answer in this exact JSON structure:

```json
{{
  "assessment": "corroborated | contradicted | unclear",
  "justification": "one or two sentences citing the excerpt numbers"
}}
```
"#,
        drug = entry.drug,
        dose = entry.dose_value,
        times = entry.frequency.times,
        age = patient.age_months,
        weight = patient.weight_kg,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::{Frequency, FrequencyPeriod};
    use crate::pipeline::rules::DoseUnit;
    use uuid::Uuid;

    #[test]
    fn prompt_contains_prescription_and_excerpts() {
        let entry = StructuredEntry {
            drug: "metotrexato".into(),
            dose_value: 15.0,
            dose_unit: DoseUnit::Mg,
            frequency: Frequency { times: 1, period: FrequencyPeriod::Week },
            route: None,
            confidence: 0.9,
            low_confidence: false,
        };
        let patient = PatientContext { age_months: 96, weight_kg: 30.0 };
        let hits = vec![SearchHit {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            content: "Dosis habitual 10-15 mg/m2 semanal".into(),
            section_title: Some("Dosificación".into()),
            score: 0.9,
        }];

        let prompt = build_corroboration_prompt(&entry, &patient, &hits);
        assert!(prompt.contains("metotrexato"));
        assert!(prompt.contains("Dosis habitual 10-15 mg/m2 semanal"));
        assert!(prompt.contains("[1] (Dosificación)"));
        assert!(prompt.contains("96 months"));
        assert!(prompt.contains("corroborated | contradicted | unclear"));
    }
}
