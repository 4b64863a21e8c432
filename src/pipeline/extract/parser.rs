use serde::Deserialize;

use super::types::{Frequency, FrequencyPeriod, StructuredEntry};
use crate::pipeline::rules::DoseUnit;

/// Parse the model's response into a structured entry.
///
/// The `Err` string names the schema violation and is fed back to the
/// model verbatim on a retry.
pub fn parse_extraction_response(response: &str) -> Result<StructuredEntry, String> {
    let json_str = extract_json_block(response)?;
    let raw: RawEntry =
        serde_json::from_str(&json_str).map_err(|e| format!("invalid JSON: {e}"))?;
    validate_entry(raw)
}

#[derive(Deserialize)]
struct RawEntry {
    drug: Option<String>,
    dose_value: Option<f64>,
    dose_unit: Option<String>,
    frequency: Option<RawFrequency>,
    route: Option<String>,
    confidence: Option<f64>,
}

#[derive(Deserialize)]
struct RawFrequency {
    times: Option<u32>,
    period: Option<String>,
}

/// Pull the JSON object out of the response, with or without fences.
fn extract_json_block(response: &str) -> Result<String, String> {
    if let Some(start) = response.find("```json") {
        let content_start = start + 7;
        let end = response[content_start..]
            .find("```")
            .ok_or("unclosed ```json``` block")?;
        return Ok(response[content_start..content_start + end].trim().to_string());
    }

    // Fall back to the outermost brace pair
    let start = response.find('{').ok_or("no JSON object in response")?;
    let end = response.rfind('}').ok_or("no JSON object in response")?;
    if end <= start {
        return Err("no JSON object in response".into());
    }
    Ok(response[start..=end].to_string())
}

fn validate_entry(raw: RawEntry) -> Result<StructuredEntry, String> {
    let drug = raw
        .drug
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or("drug is missing or empty")?;

    let dose_value = raw.dose_value.ok_or("dose_value is missing")?;
    if !(dose_value > 0.0) || !dose_value.is_finite() {
        return Err(format!("dose_value {dose_value} is not a positive number"));
    }

    // A dose without a unit is internally inconsistent, never guessed at
    let dose_unit = match raw.dose_unit.as_deref().map(str::trim) {
        Some("mg") => DoseUnit::Mg,
        Some("mg_per_kg") | Some("mg/kg") => DoseUnit::MgPerKg,
        Some(other) => return Err(format!("unrecognized dose_unit '{other}'")),
        None => return Err("dose_value present without dose_unit".into()),
    };

    let frequency = raw.frequency.ok_or("frequency is missing")?;
    let times = frequency.times.ok_or("frequency.times is missing")?;
    if times == 0 {
        return Err("frequency.times must be at least 1".into());
    }
    let period = match frequency.period.as_deref().map(str::trim) {
        Some("day") => FrequencyPeriod::Day,
        Some("week") => FrequencyPeriod::Week,
        Some(other) => return Err(format!("unrecognized frequency.period '{other}'")),
        None => return Err("frequency.period is missing".into()),
    };

    let confidence = raw.confidence.unwrap_or(0.0).clamp(0.0, 1.0) as f32;

    let route = raw
        .route
        .map(|r| r.trim().to_lowercase())
        .filter(|r| !r.is_empty() && r != "null");

    Ok(StructuredEntry {
        drug,
        dose_value,
        dose_unit,
        frequency: Frequency { times, period },
        route,
        confidence,
        low_confidence: false,
    })
}
