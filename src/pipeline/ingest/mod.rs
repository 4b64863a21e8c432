pub mod chunker;
pub mod hash;
pub mod ingestor;

pub use chunker::{ChunkSpan, GuidelineChunker};
pub use ingestor::{IngestOutcome, Ingestor};

use std::path::PathBuf;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::pipeline::index::IndexError;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Unreadable document {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Document produced no chunks: {0}")]
    EmptyDocument(PathBuf),

    #[error("Embedding failed during ingest: {0}")]
    Embedding(#[from] IndexError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
