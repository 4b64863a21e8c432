use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::AuditRecord;

/// Persist the audit record for one validation decision.
/// Written for every verdict, including fail-closed rejections, so the
/// trail survives even when a pipeline stage failed.
pub fn insert_audit_record(
    conn: &Connection,
    record: &AuditRecord,
) -> Result<(), DatabaseError> {
    let payload = serde_json::to_string(record).unwrap_or_else(|_| "{}".into());
    conn.execute(
        "INSERT INTO audit_log (id, created_at, patient_ref, status, payload)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.verdict.id.to_string(),
            record
                .verdict
                .created_at
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            record.patient_ref,
            record.verdict.status.as_str(),
            payload,
        ],
    )?;
    Ok(())
}

/// Recent audit payloads for a caller-supplied patient reference,
/// newest first.
pub fn query_audit_by_patient(
    conn: &Connection,
    patient_ref: &str,
    limit: usize,
) -> Result<Vec<AuditRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT payload FROM audit_log
         WHERE patient_ref = ?1
         ORDER BY created_at DESC LIMIT ?2",
    )?;
    let payloads = stmt
        .query_map(params![patient_ref, limit as i64], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(payloads
        .iter()
        .filter_map(|p| serde_json::from_str(p).ok())
        .collect())
}

pub fn get_audit_record(
    conn: &Connection,
    verdict_id: &Uuid,
) -> Result<Option<AuditRecord>, DatabaseError> {
    use rusqlite::OptionalExtension;
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload FROM audit_log WHERE id = ?1",
            params![verdict_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(payload.and_then(|p| serde_json::from_str(&p).ok()))
}
