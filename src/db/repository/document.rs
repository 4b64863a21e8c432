use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::GuidelineDocument;

pub fn insert_document(
    conn: &Connection,
    doc: &GuidelineDocument,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO documents (id, source_path, title, content_hash, ingested_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            doc.id.to_string(),
            doc.source_path,
            doc.title,
            doc.content_hash,
            doc.ingested_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_document(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<GuidelineDocument>, DatabaseError> {
    let doc = conn
        .query_row(
            "SELECT id, source_path, title, content_hash, ingested_at
             FROM documents WHERE id = ?1",
            params![id.to_string()],
            row_to_document,
        )
        .optional()?;
    Ok(doc)
}

/// Find the document previously ingested from the given path, if any.
/// Used by the ingestor to detect no-op re-ingest and supersession.
pub fn get_document_by_source_path(
    conn: &Connection,
    source_path: &str,
) -> Result<Option<GuidelineDocument>, DatabaseError> {
    let doc = conn
        .query_row(
            "SELECT id, source_path, title, content_hash, ingested_at
             FROM documents WHERE source_path = ?1",
            params![source_path],
            row_to_document,
        )
        .optional()?;
    Ok(doc)
}

pub fn list_documents(conn: &Connection) -> Result<Vec<GuidelineDocument>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, source_path, title, content_hash, ingested_at
         FROM documents ORDER BY ingested_at",
    )?;
    let docs = stmt
        .query_map([], row_to_document)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs)
}

pub fn count_documents(conn: &Connection) -> Result<usize, DatabaseError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
    Ok(count as usize)
}

/// Delete a document. Chunks cascade, but are deleted explicitly for logging.
pub fn delete_document(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let id_str = id.to_string();
    let chunks = conn.execute(
        "DELETE FROM guideline_chunks WHERE document_id = ?1",
        params![id_str],
    )?;
    conn.execute("DELETE FROM documents WHERE id = ?1", params![id_str])?;
    tracing::debug!(document_id = %id, chunks, "Deleted document and its chunks");
    Ok(())
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<GuidelineDocument> {
    let id: String = row.get(0)?;
    let ingested_at: String = row.get(4)?;
    Ok(GuidelineDocument {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        source_path: row.get(1)?,
        title: row.get(2)?,
        content_hash: row.get(3)?,
        ingested_at: NaiveDateTime::parse_from_str(&ingested_at, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
    })
}

/// Read a value from the engine-owned index metadata table.
pub fn get_index_meta(conn: &Connection, key: &str) -> Result<Option<String>, DatabaseError> {
    let value = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn set_index_meta(conn: &Connection, key: &str, value: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}
