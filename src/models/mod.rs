pub mod document;
pub mod verdict;

pub use document::{GuidelineChunk, GuidelineDocument};
pub use verdict::{AuditRecord, ValidationVerdict, VerdictStatus};

use serde::{Deserialize, Serialize};

/// Clinical context for the patient the plan applies to.
/// Input only; never persisted by the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PatientContext {
    pub age_months: u32,
    pub weight_kg: f64,
}
