use serde::{Deserialize, Serialize};

use crate::pipeline::rules::DoseUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyPeriod {
    Day,
    Week,
}

/// Administration frequency: `times` doses per `period`.
/// "cada 8 horas" is 3 per day; "semanal" is 1 per week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frequency {
    pub times: u32,
    pub period: FrequencyPeriod,
}

impl Frequency {
    /// Average administrations per day.
    pub fn per_day(&self) -> f64 {
        match self.period {
            FrequencyPeriod::Day => self.times as f64,
            FrequencyPeriod::Week => self.times as f64 / 7.0,
        }
    }
}

/// A prescription parsed out of a free-text treatment plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredEntry {
    pub drug: String,
    pub dose_value: f64,
    pub dose_unit: DoseUnit,
    pub frequency: Frequency,
    pub route: Option<String>,
    /// Model-reported certainty, attenuated per re-prompt attempt.
    pub confidence: f32,
    /// Set when confidence fell below the configured floor. The entry
    /// still flows through synthesis; the flag caps the verdict at ALERT.
    pub low_confidence: bool,
}

impl StructuredEntry {
    /// Total prescribed milligrams per day for this patient, on the same
    /// axis as [`crate::pipeline::rules::DoseRule::max_daily_mg`].
    pub fn daily_dose_mg(&self, weight_kg: f64) -> f64 {
        let per_administration = match self.dose_unit {
            DoseUnit::Mg => self.dose_value,
            DoseUnit::MgPerKg => self.dose_value * weight_kg,
        };
        per_administration * self.frequency.per_day()
    }
}
