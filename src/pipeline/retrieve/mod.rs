pub mod retriever;

pub use retriever::{EvidenceRetriever, RetrievalResult};

use thiserror::Error;

use crate::pipeline::index::IndexError;

#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Index or embedding failure. A hard failure, distinct from an
    /// empty result: "no evidence found" is not an error.
    #[error("Evidence retrieval failed: {0}")]
    Index(#[from] IndexError),
}
