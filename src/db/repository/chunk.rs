use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::GuidelineChunk;

/// Insert a chunk together with its embedding vector.
/// Vectors are stored as little-endian f32 blobs.
pub fn insert_chunk(
    conn: &Connection,
    chunk: &GuidelineChunk,
    embedding: &[f32],
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO guideline_chunks
         (id, document_id, seq, content, section_title, char_start, char_end, embedding)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            chunk.id.to_string(),
            chunk.document_id.to_string(),
            chunk.seq as i64,
            chunk.content,
            chunk.section_title,
            chunk.char_start as i64,
            chunk.char_end as i64,
            vector_to_blob(embedding),
        ],
    )?;
    Ok(())
}

/// Load every chunk with its embedding, in insertion order.
/// Feeds the in-memory index snapshot on engine startup.
pub fn load_all_chunks(
    conn: &Connection,
) -> Result<Vec<(GuidelineChunk, Vec<f32>)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, document_id, seq, content, section_title, char_start, char_end, embedding
         FROM guideline_chunks ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let document_id: String = row.get(1)?;
            let blob: Vec<u8> = row.get(7)?;
            Ok((
                GuidelineChunk {
                    id: Uuid::parse_str(&id).unwrap_or_default(),
                    document_id: Uuid::parse_str(&document_id).unwrap_or_default(),
                    seq: row.get::<_, i64>(2)? as usize,
                    content: row.get(3)?,
                    section_title: row.get(4)?,
                    char_start: row.get::<_, i64>(5)? as usize,
                    char_end: row.get::<_, i64>(6)? as usize,
                },
                blob,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(chunk, blob)| {
            let id = chunk.id;
            blob_to_vector(&blob)
                .map(|v| (chunk, v))
                .ok_or(DatabaseError::MalformedEmbedding(id))
        })
        .collect()
}

pub fn count_chunks(conn: &Connection) -> Result<usize, DatabaseError> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM guideline_chunks", [], |row| row.get(0))?;
    Ok(count as usize)
}

pub fn count_chunks_for_document(
    conn: &Connection,
    document_id: &Uuid,
) -> Result<usize, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM guideline_chunks WHERE document_id = ?1",
        params![document_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::insert_document;
    use crate::db::sqlite::open_memory_database;
    use crate::models::GuidelineDocument;

    fn insert_test_document(conn: &Connection) -> Uuid {
        let doc = GuidelineDocument {
            id: Uuid::new_v4(),
            source_path: "/guides/mtx.md".into(),
            title: "MTX".into(),
            content_hash: "h".into(),
            ingested_at: chrono::Local::now().naive_local(),
        };
        insert_document(conn, &doc).unwrap();
        doc.id
    }

    fn make_chunk(document_id: Uuid, seq: usize) -> GuidelineChunk {
        GuidelineChunk {
            id: Uuid::new_v4(),
            document_id,
            seq,
            content: format!("Chunk {seq} about methotrexate dosing"),
            section_title: Some("Dosing".into()),
            char_start: seq * 100,
            char_end: seq * 100 + 90,
        }
    }

    #[test]
    fn vector_blob_round_trip() {
        let v = vec![0.25f32, -1.5, 0.0, 3.75];
        let blob = vector_to_blob(&v);
        assert_eq!(blob_to_vector(&blob).unwrap(), v);
    }

    #[test]
    fn malformed_blob_rejected() {
        assert!(blob_to_vector(&[1, 2, 3]).is_none());
    }

    #[test]
    fn insert_and_load_chunks_in_order() {
        let conn = open_memory_database().unwrap();
        let doc_id = insert_test_document(&conn);

        for seq in 0..3 {
            insert_chunk(&conn, &make_chunk(doc_id, seq), &[seq as f32, 1.0]).unwrap();
        }

        let loaded = load_all_chunks(&conn).unwrap();
        assert_eq!(loaded.len(), 3);
        for (i, (chunk, embedding)) in loaded.iter().enumerate() {
            assert_eq!(chunk.seq, i);
            assert_eq!(embedding[0], i as f32);
        }
        assert_eq!(count_chunks(&conn).unwrap(), 3);
        assert_eq!(count_chunks_for_document(&conn, &doc_id).unwrap(), 3);
    }

    #[test]
    fn deleting_document_cascades_to_chunks() {
        let conn = open_memory_database().unwrap();
        let doc_id = insert_test_document(&conn);
        insert_chunk(&conn, &make_chunk(doc_id, 0), &[1.0, 0.0]).unwrap();

        crate::db::repository::delete_document(&conn, &doc_id).unwrap();
        assert_eq!(count_chunks(&conn).unwrap(), 0);
    }
}
