use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One ingested guideline or technical-sheet document.
/// Immutable after ingest; re-ingesting changed content supersedes the
/// row (and its chunks) rather than mutating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidelineDocument {
    pub id: Uuid,
    pub source_path: String,
    pub title: String,
    /// SHA-256 of the raw document bytes, base64-encoded.
    /// Identical content at the same path makes re-ingest a no-op.
    pub content_hash: String,
    pub ingested_at: NaiveDateTime,
}

/// A contiguous span of a document's text — the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidelineChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Position within the document's chunk sequence (insertion order).
    pub seq: usize,
    pub content: String,
    pub section_title: Option<String>,
    /// Character offsets into the source text, for citation.
    pub char_start: usize,
    pub char_end: usize,
}

impl GuidelineChunk {
    /// Rough token estimate (4 chars per token) for context budgeting.
    pub fn estimated_tokens(&self) -> usize {
        self.content.len() / 4
    }
}
