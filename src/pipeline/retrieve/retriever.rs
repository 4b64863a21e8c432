use super::RetrievalError;
use crate::models::PatientContext;
use crate::pipeline::extract::StructuredEntry;
use crate::pipeline::index::{EmbeddingModel, IndexError, IndexSnapshot, QueryVector, SearchHit};

/// Evidence for one structured entry: the query that was run and every
/// hit that cleared the similarity threshold, descending.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub query_text: String,
    pub query: QueryVector,
    pub hits: Vec<SearchHit>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Retrieves guideline evidence for a structured prescription entry.
pub struct EvidenceRetriever<'a, E: EmbeddingModel> {
    embedder: &'a E,
    top_k: usize,
    similarity_threshold: f32,
    retries: u32,
    backoff_ms: u64,
}

impl<'a, E: EmbeddingModel> EvidenceRetriever<'a, E> {
    pub fn new(
        embedder: &'a E,
        top_k: usize,
        similarity_threshold: f32,
        retries: u32,
        backoff_ms: u64,
    ) -> Self {
        Self {
            embedder,
            top_k,
            similarity_threshold,
            retries,
            backoff_ms,
        }
    }

    pub fn retrieve(
        &self,
        entry: &StructuredEntry,
        patient: &PatientContext,
        snapshot: &IndexSnapshot,
    ) -> Result<RetrievalResult, RetrievalError> {
        let query_text = build_query(entry, patient);
        let vector = self.embed_with_retries(&query_text)?;
        let query = QueryVector {
            model_id: self.embedder.model_id().to_string(),
            vector,
        };

        let mut hits = snapshot.search(&query, self.top_k)?;
        let before = hits.len();
        hits.retain(|h| h.score >= self.similarity_threshold);

        tracing::debug!(
            query = %query_text,
            candidates = before,
            above_threshold = hits.len(),
            threshold = self.similarity_threshold,
            "Evidence retrieved"
        );

        Ok(RetrievalResult {
            query_text,
            query,
            hits,
        })
    }

    fn embed_with_retries(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let mut attempt = 0;
        loop {
            match self.embedder.embed(text) {
                Ok(vector) => return Ok(vector),
                Err(e) if is_transient(&e) && attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "Query embedding failed, retrying");
                    std::thread::sleep(std::time::Duration::from_millis(
                        self.backoff_ms * attempt as u64,
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_transient(e: &IndexError) -> bool {
    matches!(e, IndexError::EndpointUnreachable(_) | IndexError::Embedding(_))
}

/// Build the retrieval query from the prescription and patient context.
/// Guideline text is predominantly Spanish, so the query is too.
fn build_query(entry: &StructuredEntry, patient: &PatientContext) -> String {
    let mut query = format!(
        "dosis de {} en paciente pediátrico de {} meses y {} kg",
        entry.drug, patient.age_months, patient.weight_kg
    );
    if let Some(route) = &entry.route {
        query.push_str(&format!(", vía {route}"));
    }
    query
}
