pub mod normalize;
pub mod registry;

pub use normalize::normalize_drug_name;
pub use registry::{AgeBand, DosePeriod, DoseRule, DoseUnit, RuleRegistry, WeightBand};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Failed to read rule registry at {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Failed to parse rule registry: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid rule '{rule_id}': {reason}")]
    InvalidRule { rule_id: String, reason: String },
}
