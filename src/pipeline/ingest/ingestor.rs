use std::path::Path;

use chrono::Local;
use rusqlite::Connection;
use uuid::Uuid;

use super::chunker::GuidelineChunker;
use super::hash::hash_bytes;
use super::IngestionError;
use crate::db::repository;
use crate::db::DatabaseError;
use crate::models::{GuidelineChunk, GuidelineDocument};
use crate::pipeline::index::{EmbeddingModel, IndexError};

/// index_meta keys owned by the ingestor.
pub const META_EMBEDDING_MODEL: &str = "embedding_model_id";
pub const META_LAST_INGEST: &str = "last_ingest_at";

/// Result of ingesting one document path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Same path, same content hash — nothing written.
    Unchanged { document_id: Uuid },
    /// New document indexed.
    Indexed { document_id: Uuid, chunk_count: usize },
    /// Path re-ingested with changed content; prior version superseded.
    Replaced { document_id: Uuid, chunk_count: usize },
}

impl IngestOutcome {
    pub fn chunk_count(&self) -> usize {
        match self {
            IngestOutcome::Unchanged { .. } => 0,
            IngestOutcome::Indexed { chunk_count, .. }
            | IngestOutcome::Replaced { chunk_count, .. } => *chunk_count,
        }
    }
}

/// Ingests guideline documents: read, hash, chunk, embed, persist.
///
/// All writes for one document happen in a single transaction, so a
/// failed ingest leaves the knowledge base exactly as it was.
pub struct Ingestor<'a, E: EmbeddingModel> {
    conn: &'a Connection,
    chunker: &'a GuidelineChunker,
    embedder: &'a E,
}

impl<'a, E: EmbeddingModel> Ingestor<'a, E> {
    pub fn new(conn: &'a Connection, chunker: &'a GuidelineChunker, embedder: &'a E) -> Self {
        Self {
            conn,
            chunker,
            embedder,
        }
    }

    pub fn ingest_path(&self, path: &Path) -> Result<IngestOutcome, IngestionError> {
        let bytes = std::fs::read(path).map_err(|e| IngestionError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let text = String::from_utf8(bytes.clone()).map_err(|_| IngestionError::Unreadable {
            path: path.to_path_buf(),
            reason: "not valid UTF-8 text".into(),
        })?;

        let content_hash = hash_bytes(&bytes);
        let source_path = path.to_string_lossy().to_string();
        let existing = repository::get_document_by_source_path(self.conn, &source_path)?;

        if let Some(prior) = &existing {
            if prior.content_hash == content_hash {
                tracing::debug!(path = %source_path, "Document unchanged, skipping re-ingest");
                return Ok(IngestOutcome::Unchanged {
                    document_id: prior.id,
                });
            }
        }

        self.guard_model_consistency(existing.as_ref())?;

        let spans = self.chunker.chunk(&text);
        if spans.is_empty() {
            return Err(IngestionError::EmptyDocument(path.to_path_buf()));
        }

        let contents: Vec<&str> = spans.iter().map(|s| s.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&contents)?;

        let document = GuidelineDocument {
            id: Uuid::new_v4(),
            source_path: source_path.clone(),
            title: document_title(&text, path),
            content_hash,
            ingested_at: Local::now().naive_local(),
        };

        let chunk_count = spans.len();
        let replaced = existing.is_some();

        let tx = self.conn.unchecked_transaction().map_err(DatabaseError::from)?;
        if let Some(prior) = existing {
            repository::delete_document(&tx, &prior.id)?;
        }
        repository::insert_document(&tx, &document)?;
        for (span, embedding) in spans.into_iter().zip(embeddings.iter()) {
            let chunk = GuidelineChunk {
                id: Uuid::new_v4(),
                document_id: document.id,
                seq: span.seq,
                content: span.content,
                section_title: span.section_title,
                char_start: span.char_start,
                char_end: span.char_end,
            };
            repository::insert_chunk(&tx, &chunk, embedding)?;
        }
        repository::set_index_meta(&tx, META_EMBEDDING_MODEL, self.embedder.model_id())?;
        repository::set_index_meta(
            &tx,
            META_LAST_INGEST,
            &Local::now().naive_local().format("%Y-%m-%d %H:%M:%S").to_string(),
        )?;
        tx.commit().map_err(DatabaseError::from)?;

        tracing::info!(
            path = %source_path,
            document_id = %document.id,
            chunks = chunk_count,
            replaced,
            "Guideline document ingested"
        );

        if replaced {
            Ok(IngestOutcome::Replaced {
                document_id: document.id,
                chunk_count,
            })
        } else {
            Ok(IngestOutcome::Indexed {
                document_id: document.id,
                chunk_count,
            })
        }
    }

    /// Refuse to mix vectors from two embedding models in one index.
    /// If the stored model id differs and other documents' chunks remain,
    /// the whole knowledge base needs a re-ingest first.
    fn guard_model_consistency(
        &self,
        being_replaced: Option<&GuidelineDocument>,
    ) -> Result<(), IngestionError> {
        let stored = repository::get_index_meta(self.conn, META_EMBEDDING_MODEL)?;
        let Some(stored) = stored else { return Ok(()) };
        if stored == self.embedder.model_id() {
            return Ok(());
        }

        let total = repository::count_chunks(self.conn)?;
        let replaced = match being_replaced {
            Some(doc) => repository::count_chunks_for_document(self.conn, &doc.id)?,
            None => 0,
        };
        if total > replaced {
            return Err(IndexError::StaleIndex {
                index_model: stored,
                query_model: self.embedder.model_id().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Title from the first Markdown heading, else the file stem.
fn document_title(text: &str, path: &Path) -> String {
    text.lines()
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "untitled".into())
        })
}
