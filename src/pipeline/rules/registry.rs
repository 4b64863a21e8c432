use std::path::Path;

use serde::{Deserialize, Serialize};

use super::normalize_drug_name;
use super::RuleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseUnit {
    /// Absolute milligrams per administration period.
    Mg,
    /// Milligrams per kilogram of body weight per administration period.
    MgPerKg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DosePeriod {
    Day,
    Week,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeBand {
    pub min_months: u32,
    pub max_months: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightBand {
    pub min_kg: f64,
    pub max_kg: f64,
}

/// A codified dose-limit constraint for one drug, optionally restricted
/// to an age or weight band. Read-only at validation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseRule {
    pub id: String,
    pub drug: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub max_dose: f64,
    pub unit: DoseUnit,
    pub period: DosePeriod,
    #[serde(default)]
    pub max_doses_per_day: Option<u32>,
    #[serde(default)]
    pub age_band: Option<AgeBand>,
    #[serde(default)]
    pub weight_band: Option<WeightBand>,
    #[serde(default)]
    pub source: Option<String>,
}

impl DoseRule {
    /// The rule's limit expressed as milligrams per day for this patient.
    /// Weekly limits are averaged over seven days so that prescriptions
    /// stated in different periods compare on the same axis.
    pub fn max_daily_mg(&self, weight_kg: f64) -> f64 {
        let base = match self.unit {
            DoseUnit::Mg => self.max_dose,
            DoseUnit::MgPerKg => self.max_dose * weight_kg,
        };
        match self.period {
            DosePeriod::Day => base,
            DosePeriod::Week => base / 7.0,
        }
    }

    fn matches_bands(&self, age_months: u32, weight_kg: f64) -> bool {
        if let Some(band) = &self.age_band {
            if age_months < band.min_months || age_months > band.max_months {
                return false;
            }
        }
        if let Some(band) = &self.weight_band {
            if weight_kg < band.min_kg || weight_kg > band.max_kg {
                return false;
            }
        }
        true
    }

    fn matches_name(&self, normalized: &str) -> bool {
        normalize_drug_name(&self.drug) == normalized
            || self.aliases.iter().any(|a| normalize_drug_name(a) == normalized)
    }

    /// How restricted this rule is: one point per band present.
    fn specificity(&self) -> u8 {
        self.age_band.is_some() as u8 + self.weight_band.is_some() as u8
    }

    /// Band widths for narrowest-wins tie-breaking; an absent band is
    /// infinitely wide.
    fn band_spans(&self) -> (f64, f64) {
        let age = self
            .age_band
            .map(|b| (b.max_months - b.min_months) as f64)
            .unwrap_or(f64::INFINITY);
        let weight = self
            .weight_band
            .map(|b| b.max_kg - b.min_kg)
            .unwrap_or(f64::INFINITY);
        (age, weight)
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    version: String,
    rules: Vec<DoseRule>,
}

/// Versioned, in-memory table of dose rules loaded from JSON.
///
/// The registry is immutable once loaded; reloading builds a new
/// registry and the caller swaps it in.
pub struct RuleRegistry {
    version: String,
    rules: Vec<DoseRule>,
}

impl RuleRegistry {
    pub fn empty() -> Self {
        Self {
            version: "empty".into(),
            rules: Vec::new(),
        }
    }

    /// The curated pediatric-rheumatology rule set shipped with the engine.
    pub fn bundled() -> Result<Self, RuleError> {
        Self::from_json(include_str!("../../../resources/rules/pediatric_rheumatology.json"))
    }

    pub fn load(path: &Path) -> Result<Self, RuleError> {
        let json = std::fs::read_to_string(path).map_err(|e| RuleError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let registry = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            version = %registry.version,
            rules = registry.len(),
            "Dose rule registry loaded"
        );
        Ok(registry)
    }

    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        let file: RegistryFile = serde_json::from_str(json)?;

        let mut seen_ids: Vec<&str> = Vec::new();
        for rule in &file.rules {
            validate_rule(rule)?;
            if seen_ids.contains(&rule.id.as_str()) {
                return Err(RuleError::InvalidRule {
                    rule_id: rule.id.clone(),
                    reason: "duplicate rule id".into(),
                });
            }
            seen_ids.push(&rule.id);
        }

        Ok(Self {
            version: file.version,
            rules: file.rules,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the rule applicable to a drug and patient.
    ///
    /// Matching is exact on the normalized drug name (aliases included).
    /// Among applicable rules the most specific band wins; an exact
    /// specificity-and-width tie is ambiguous and resolves to no rule
    /// rather than an arbitrary pick.
    pub fn lookup(&self, drug: &str, age_months: u32, weight_kg: f64) -> Option<&DoseRule> {
        let normalized = normalize_drug_name(drug);
        if normalized.is_empty() {
            return None;
        }

        let mut applicable: Vec<&DoseRule> = self
            .rules
            .iter()
            .filter(|r| r.matches_name(&normalized) && r.matches_bands(age_months, weight_kg))
            .collect();

        if applicable.is_empty() {
            return None;
        }
        if applicable.len() == 1 {
            return Some(applicable[0]);
        }

        applicable.sort_by(|a, b| {
            b.specificity()
                .cmp(&a.specificity())
                .then_with(|| {
                    let (a_age, a_weight) = a.band_spans();
                    let (b_age, b_weight) = b.band_spans();
                    a_age
                        .partial_cmp(&b_age)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(
                            a_weight
                                .partial_cmp(&b_weight)
                                .unwrap_or(std::cmp::Ordering::Equal),
                        )
                })
        });

        let best = applicable[0];
        let runner_up = applicable[1];
        if best.specificity() == runner_up.specificity()
            && best.band_spans() == runner_up.band_spans()
        {
            tracing::warn!(
                drug = %normalized,
                rule_a = %best.id,
                rule_b = %runner_up.id,
                "Ambiguous rule match, treating as no rule"
            );
            return None;
        }

        Some(best)
    }
}

fn validate_rule(rule: &DoseRule) -> Result<(), RuleError> {
    let invalid = |reason: &str| RuleError::InvalidRule {
        rule_id: rule.id.clone(),
        reason: reason.into(),
    };

    if rule.id.trim().is_empty() {
        return Err(invalid("empty id"));
    }
    if normalize_drug_name(&rule.drug).is_empty() {
        return Err(invalid("empty drug name"));
    }
    if !(rule.max_dose > 0.0) {
        return Err(invalid("max_dose must be positive"));
    }
    if let Some(band) = &rule.age_band {
        if band.min_months > band.max_months {
            return Err(invalid("age band min exceeds max"));
        }
    }
    if let Some(band) = &rule.weight_band {
        if band.min_kg > band.max_kg {
            return Err(invalid("weight band min exceeds max"));
        }
    }
    if let Some(max) = rule.max_doses_per_day {
        if max == 0 {
            return Err(invalid("max_doses_per_day must be at least 1"));
        }
    }
    Ok(())
}
