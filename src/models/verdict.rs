use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final classification of a prescription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Approved,
    Alert,
    Rejected,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Approved => "APPROVED",
            VerdictStatus::Alert => "ALERT",
            VerdictStatus::Rejected => "REJECTED",
        }
    }
}

/// Outcome of one validation request. Immutable once emitted.
///
/// APPROVED is only ever produced when a codified dose rule was satisfied
/// AND at least one guideline chunk corroborates the prescription; every
/// lesser combination degrades to ALERT or REJECTED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub id: Uuid,
    pub status: VerdictStatus,
    pub reason: String,
    pub cited_chunk_ids: Vec<Uuid>,
    pub matched_rule_id: Option<String>,
    /// Severity/confidence score in [0,1] for downstream UI coloring.
    pub confidence: f32,
    pub created_at: NaiveDateTime,
}

impl ValidationVerdict {
    pub fn new(
        status: VerdictStatus,
        reason: impl Into<String>,
        cited_chunk_ids: Vec<Uuid>,
        matched_rule_id: Option<String>,
        confidence: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            status,
            reason: reason.into(),
            cited_chunk_ids,
            matched_rule_id,
            confidence: confidence.clamp(0.0, 1.0),
            created_at: chrono::Local::now().naive_local(),
        }
    }

    /// Fail-closed verdict for a hard failure in a pipeline stage.
    /// The failing stage is named in the reason so the audit trail shows
    /// why the plan was not approved.
    pub fn fail_closed(stage: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(
            VerdictStatus::Rejected,
            format!("validation failed at {stage}: {detail}"),
            vec![],
            None,
            0.0,
        )
    }
}

/// Durable trace of one decision: the verdict plus the inputs that
/// produced it. Serialized to JSON in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub verdict: ValidationVerdict,
    /// Structured entry as extracted, when extraction succeeded.
    pub structured_entry: Option<serde_json::Value>,
    /// (chunk id, similarity) pairs the retriever returned.
    pub retrieval_summary: Vec<(Uuid, f32)>,
    pub rule_registry_version: Option<String>,
    pub embedding_model_id: String,
    /// Caller-supplied reference (e.g. visit or patient id); opaque here.
    pub patient_ref: Option<String>,
}
