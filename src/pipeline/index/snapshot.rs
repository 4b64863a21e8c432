use std::sync::{Arc, RwLock};

use uuid::Uuid;

use super::IndexError;
use crate::models::GuidelineChunk;

/// A query embedding tagged with the model that produced it.
/// The tag is what makes stale-index detection possible.
#[derive(Debug, Clone)]
pub struct QueryVector {
    pub model_id: String,
    pub vector: Vec<f32>,
}

/// One search result: a chunk and its similarity to the query,
/// cosine normalized to [0,1].
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub section_title: Option<String>,
    pub score: f32,
}

struct IndexEntry {
    chunk: GuidelineChunk,
    vector: Vec<f32>,
}

/// Immutable, versioned index snapshot.
///
/// Entries are kept in insertion order; equal-similarity results keep
/// that order (stable sort), so search is fully deterministic. Mutation
/// happens by building a new snapshot and swapping it into a
/// [`SharedIndex`], never in place.
pub struct IndexSnapshot {
    embedding_model_id: String,
    entries: Vec<IndexEntry>,
}

impl IndexSnapshot {
    pub fn empty(embedding_model_id: &str) -> Self {
        Self {
            embedding_model_id: embedding_model_id.to_string(),
            entries: Vec::new(),
        }
    }

    /// Build a snapshot from chunks and their vectors, preserving order.
    pub fn from_entries(
        embedding_model_id: &str,
        entries: Vec<(GuidelineChunk, Vec<f32>)>,
    ) -> Self {
        Self {
            embedding_model_id: embedding_model_id.to_string(),
            entries: entries
                .into_iter()
                .map(|(chunk, vector)| IndexEntry { chunk, vector })
                .collect(),
        }
    }

    pub fn embedding_model_id(&self) -> &str {
        &self.embedding_model_id
    }

    pub fn chunk_count(&self) -> usize {
        self.entries.len()
    }

    pub fn document_count(&self) -> usize {
        let mut ids: Vec<Uuid> = self.entries.iter().map(|e| e.chunk.document_id).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    pub fn get_chunk(&self, chunk_id: &Uuid) -> Option<&GuidelineChunk> {
        self.entries
            .iter()
            .find(|e| e.chunk.id == *chunk_id)
            .map(|e| &e.chunk)
    }

    /// All chunks belonging to a document, in chunk sequence order.
    /// Used when a re-ingest replaces a document's chunk set.
    pub fn chunks_for_document(&self, document_id: &Uuid) -> Vec<&GuidelineChunk> {
        self.entries
            .iter()
            .filter(|e| e.chunk.document_id == *document_id)
            .map(|e| &e.chunk)
            .collect()
    }

    /// Nearest-neighbor search, descending similarity, ties broken by
    /// insertion order. Fails closed when the query vector was produced
    /// by a different embedding model than the index.
    pub fn search(&self, query: &QueryVector, k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query.model_id != self.embedding_model_id {
            return Err(IndexError::StaleIndex {
                index_model: self.embedding_model_id.clone(),
                query_model: query.model_id.clone(),
            });
        }

        if let Some(entry) = self.entries.first() {
            if entry.vector.len() != query.vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: entry.vector.len(),
                    got: query.vector.len(),
                });
            }
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .map(|entry| SearchHit {
                chunk_id: entry.chunk.id,
                document_id: entry.chunk.document_id,
                content: entry.chunk.content.clone(),
                section_title: entry.chunk.section_title.clone(),
                score: normalized_cosine(&query.vector, &entry.vector),
            })
            .collect();

        // Stable sort: equal scores keep insertion order
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}

/// Cosine similarity rescaled from [-1,1] to [0,1].
fn normalized_cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (((dot / (norm_a * norm_b)) + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Concurrent handle over the current snapshot.
///
/// Readers clone the `Arc` and search without holding any lock; ingestion
/// builds a replacement snapshot and swaps it in atomically, so a reader
/// sees either the old or the fully-replaced chunk set, never a mix.
pub struct SharedIndex {
    inner: RwLock<Arc<IndexSnapshot>>,
}

impl SharedIndex {
    pub fn new(snapshot: IndexSnapshot) -> Self {
        Self {
            inner: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn load(&self) -> Arc<IndexSnapshot> {
        self.inner.read().expect("index lock poisoned").clone()
    }

    pub fn swap(&self, snapshot: IndexSnapshot) {
        let mut guard = self.inner.write().expect("index lock poisoned");
        *guard = Arc::new(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(document_id: Uuid, seq: usize, content: &str) -> GuidelineChunk {
        GuidelineChunk {
            id: Uuid::new_v4(),
            document_id,
            seq,
            content: content.into(),
            section_title: None,
            char_start: 0,
            char_end: content.len(),
        }
    }

    fn snapshot_with(vectors: Vec<Vec<f32>>) -> (IndexSnapshot, Vec<Uuid>) {
        let doc = Uuid::new_v4();
        let entries: Vec<(GuidelineChunk, Vec<f32>)> = vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| (chunk(doc, i, &format!("chunk {i}")), v))
            .collect();
        let ids = entries.iter().map(|(c, _)| c.id).collect();
        (IndexSnapshot::from_entries("mock-embedder-v1", entries), ids)
    }

    fn query(vector: Vec<f32>) -> QueryVector {
        QueryVector {
            model_id: "mock-embedder-v1".into(),
            vector,
        }
    }

    #[test]
    fn search_orders_by_descending_similarity() {
        let (snapshot, ids) = snapshot_with(vec![
            vec![0.0, 1.0],  // orthogonal
            vec![1.0, 0.0],  // identical
            vec![0.7, 0.7],  // in between
        ]);

        let hits = snapshot.search(&query(vec![1.0, 0.0]), 3).unwrap();
        assert_eq!(hits[0].chunk_id, ids[1]);
        assert_eq!(hits[1].chunk_id, ids[2]);
        assert_eq!(hits[2].chunk_id, ids[0]);
        assert!(hits[0].score > hits[1].score && hits[1].score > hits[2].score);
    }

    #[test]
    fn scores_are_in_unit_interval() {
        let (snapshot, _) = snapshot_with(vec![vec![1.0, 0.0], vec![-1.0, 0.0]]);
        let hits = snapshot.search(&query(vec![1.0, 0.0]), 2).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[1].score.abs() < 1e-6);
    }

    #[test]
    fn equal_scores_keep_insertion_order() {
        let (snapshot, ids) = snapshot_with(vec![
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
        ]);

        let hits = snapshot.search(&query(vec![1.0, 0.0]), 3).unwrap();
        assert_eq!(hits[0].chunk_id, ids[0]);
        assert_eq!(hits[1].chunk_id, ids[1]);
        assert_eq!(hits[2].chunk_id, ids[2]);
    }

    #[test]
    fn search_truncates_to_k() {
        let (snapshot, _) = snapshot_with(vec![vec![1.0, 0.0]; 10]);
        let hits = snapshot.search(&query(vec![1.0, 0.0]), 3).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn mismatched_model_is_stale_index() {
        let (snapshot, _) = snapshot_with(vec![vec![1.0, 0.0]]);
        let stale = QueryVector {
            model_id: "mock-embedder-v2".into(),
            vector: vec![1.0, 0.0],
        };
        let result = snapshot.search(&stale, 1);
        assert!(matches!(result, Err(IndexError::StaleIndex { .. })));
    }

    #[test]
    fn mismatched_dimension_rejected() {
        let (snapshot, _) = snapshot_with(vec![vec![1.0, 0.0]]);
        let result = snapshot.search(&query(vec![1.0, 0.0, 0.0]), 1);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn chunks_for_document_filters() {
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let snapshot = IndexSnapshot::from_entries(
            "mock-embedder-v1",
            vec![
                (chunk(doc_a, 0, "a0"), vec![1.0, 0.0]),
                (chunk(doc_b, 0, "b0"), vec![1.0, 0.0]),
                (chunk(doc_a, 1, "a1"), vec![1.0, 0.0]),
            ],
        );

        assert_eq!(snapshot.chunks_for_document(&doc_a).len(), 2);
        assert_eq!(snapshot.chunks_for_document(&doc_b).len(), 1);
        assert_eq!(snapshot.document_count(), 2);
        assert_eq!(snapshot.chunk_count(), 3);
    }

    #[test]
    fn shared_index_swap_is_atomic_for_readers() {
        let shared = SharedIndex::new(IndexSnapshot::empty("mock-embedder-v1"));
        let before = shared.load();

        let (replacement, _) = snapshot_with(vec![vec![1.0, 0.0]]);
        shared.swap(replacement);

        // The old Arc is still fully usable; new readers see the new set
        assert_eq!(before.chunk_count(), 0);
        assert_eq!(shared.load().chunk_count(), 1);
    }
}
