use serde::{Deserialize, Serialize};

use super::IndexError;

/// Embedding model abstraction.
///
/// The model identifier is versioned: it is stored with the index and
/// checked on every query, so a model change can never silently produce
/// wrong-but-plausible similarity results.
pub trait EmbeddingModel {
    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IndexError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize;

    /// Identifier persisted with the index; a mismatch at query time is a
    /// stale-index failure, not a degraded search.
    fn model_id(&self) -> &str;
}

/// Embedder backed by an Ollama-compatible /api/embeddings endpoint.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimension: usize,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, dimension: usize, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
            client,
        }
    }
}

impl EmbeddingModel for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                IndexError::EndpointUnreachable(self.base_url.clone())
            } else {
                IndexError::Embedding(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(IndexError::Embedding(format!(
                "embedding endpoint returned status {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        if parsed.embedding.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: parsed.embedding.len(),
            });
        }

        Ok(l2_normalize(parsed.embedding))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Mock embedding model for testing — deterministic unit vectors.
pub struct MockEmbedder {
    dimension: usize,
    model_id: String,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: 384,
            model_id: "mock-embedder-v1".into(),
        }
    }

    /// Override the model identifier (for stale-index tests).
    pub fn with_model_id(mut self, model_id: &str) -> Self {
        self.model_id = model_id.to_string();
        self
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingModel for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        Ok(deterministic_vector(text, self.dimension))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Generate a deterministic unit vector from text (for testing).
fn deterministic_vector(text: &str, dim: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dim];
    let bytes = text.as_bytes();

    for (i, slot) in vec.iter_mut().enumerate() {
        let byte_idx = i % bytes.len().max(1);
        *slot = (bytes.get(byte_idx).copied().unwrap_or(0) as f32 + i as f32) / 255.0;
    }

    l2_normalize(vec)
}

fn l2_normalize(mut vec: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in &mut vec {
            *val /= norm;
        }
    }
    vec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_embed_returns_correct_dimension() {
        let embedder = MockEmbedder::new();
        let vec = embedder.embed("methotrexate weekly").unwrap();
        assert_eq!(vec.len(), 384);
    }

    #[test]
    fn mock_embed_is_deterministic() {
        let embedder = MockEmbedder::new();
        assert_eq!(
            embedder.embed("same text").unwrap(),
            embedder.embed("same text").unwrap()
        );
    }

    #[test]
    fn mock_embed_different_texts_differ() {
        let embedder = MockEmbedder::new();
        assert_ne!(embedder.embed("text A").unwrap(), embedder.embed("text B").unwrap());
    }

    #[test]
    fn mock_embed_is_l2_normalized() {
        let vec = MockEmbedder::new().embed("test normalization").unwrap();
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01, "norm = {norm}");
    }

    #[test]
    fn model_id_override() {
        let embedder = MockEmbedder::new().with_model_id("mock-embedder-v2");
        assert_eq!(embedder.model_id(), "mock-embedder-v2");
    }

    #[test]
    fn batch_matches_single() {
        let embedder = MockEmbedder::new();
        let batch = embedder.embed_batch(&["a", "b"]).unwrap();
        assert_eq!(batch[0], embedder.embed("a").unwrap());
        assert_eq!(batch[1], embedder.embed("b").unwrap());
    }
}
