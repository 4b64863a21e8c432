pub mod embedder;
pub mod snapshot;

pub use embedder::{EmbeddingModel, MockEmbedder, OllamaEmbedder};
pub use snapshot::{IndexSnapshot, QueryVector, SearchHit, SharedIndex};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error(
        "Stale index: built with embedding model '{index_model}', query used '{query_model}' — full re-ingest required"
    )]
    StaleIndex {
        index_model: String,
        query_model: String,
    },

    #[error("Embedding dimension mismatch: index has {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Embedding endpoint unreachable at {0}")]
    EndpointUnreachable(String),
}
