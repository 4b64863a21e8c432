use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{self, EngineConfig};
use crate::db::repository;
use crate::db::sqlite::open_database;
use crate::db::DatabaseError;
use crate::models::{AuditRecord, PatientContext, ValidationVerdict};
use crate::pipeline::extract::PrescriptionExtractor;
use crate::pipeline::index::{
    EmbeddingModel, IndexSnapshot, OllamaEmbedder, SharedIndex,
};
use crate::pipeline::ingest::ingestor::META_LAST_INGEST;
use crate::pipeline::ingest::{GuidelineChunker, Ingestor};
use crate::pipeline::llm::{LlmClient, OllamaClient};
use crate::pipeline::retrieve::EvidenceRetriever;
use crate::pipeline::rules::{RuleError, RuleRegistry};
use crate::pipeline::synthesis::DecisionSynthesizer;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Rule registry error: {0}")]
    Rules(#[from] RuleError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a batch ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub documents_indexed: usize,
    pub documents_failed: usize,
    /// Total chunks in the index after the batch.
    pub chunk_count: usize,
}

/// Snapshot of the index for callers and dashboards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStatus {
    pub embedding_model_id: String,
    pub document_count: usize,
    pub chunk_count: usize,
    pub last_ingest: Option<String>,
}

/// The validation engine: the only externally exposed entry point.
///
/// Owns the knowledge base, the in-memory index snapshot, and the rule
/// registry. Validation requests read a consistent snapshot of both and
/// never observe a half-replaced index.
pub struct ValidationEngine<E: EmbeddingModel, L: LlmClient> {
    config: EngineConfig,
    conn: Mutex<Connection>,
    index: SharedIndex,
    registry: RwLock<RuleRegistry>,
    embedder: E,
    llm: L,
}

impl ValidationEngine<OllamaEmbedder, OllamaClient> {
    /// Open the engine with its default Ollama-backed components, the
    /// on-disk knowledge base, and the rule registry from the data
    /// directory (falling back to the bundled rule set).
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        std::fs::create_dir_all(config::data_dir())?;
        let conn = open_database(&config::database_path())?;

        let rules_path = config::rules_path();
        let registry = if rules_path.exists() {
            RuleRegistry::load(&rules_path)?
        } else {
            RuleRegistry::bundled()?
        };

        let embedder = OllamaEmbedder::new(
            &config.ollama_base_url,
            &config.embedding_model,
            config.embedding_dimension,
            config.llm_timeout_secs,
        );
        let llm = OllamaClient::new(&config.ollama_base_url, config.llm_timeout_secs);

        Self::with_components(config, conn, embedder, llm, registry)
    }
}

impl<E: EmbeddingModel, L: LlmClient> ValidationEngine<E, L> {
    /// Assemble an engine from explicit components. The index snapshot is
    /// rebuilt from whatever the knowledge base already holds.
    pub fn with_components(
        config: EngineConfig,
        conn: Connection,
        embedder: E,
        llm: L,
        registry: RuleRegistry,
    ) -> Result<Self, EngineError> {
        let snapshot = build_snapshot(&conn, embedder.model_id())?;
        tracing::info!(
            embedding_model = snapshot.embedding_model_id(),
            documents = snapshot.document_count(),
            chunks = snapshot.chunk_count(),
            rules = registry.len(),
            "Validation engine ready"
        );

        Ok(Self {
            config,
            conn: Mutex::new(conn),
            index: SharedIndex::new(snapshot),
            registry: RwLock::new(registry),
            embedder,
            llm,
        })
    }

    /// Batch-ingest guideline documents. A failing document is logged and
    /// skipped; it never aborts the rest of the batch. The index snapshot
    /// is swapped once, after all documents committed.
    pub fn ingest(&self, paths: &[PathBuf]) -> Result<IngestReport, EngineError> {
        let chunker = GuidelineChunker::default();
        let mut documents_indexed = 0;
        let mut documents_failed = 0;

        for path in paths {
            // Lock per document: audit writes from in-flight validations
            // interleave between documents instead of waiting out the batch
            let conn = self.conn.lock().expect("database lock poisoned");
            let ingestor = Ingestor::new(&conn, &chunker, &self.embedder);
            match ingestor.ingest_path(path) {
                Ok(outcome) => {
                    documents_indexed += 1;
                    tracing::debug!(path = %path.display(), ?outcome, "Document processed");
                }
                Err(e) => {
                    documents_failed += 1;
                    tracing::error!(path = %path.display(), error = %e, "Document ingest failed, skipping");
                }
            }
        }

        let snapshot = {
            let conn = self.conn.lock().expect("database lock poisoned");
            build_snapshot(&conn, self.embedder.model_id())?
        };
        let chunk_count = snapshot.chunk_count();
        self.index.swap(snapshot);

        Ok(IngestReport {
            documents_indexed,
            documents_failed,
            chunk_count,
        })
    }

    /// Validate one treatment plan. Always returns a verdict: every hard
    /// failure inside the pipeline is converted to a fail-closed REJECTED
    /// naming the failing stage, and every verdict is audited.
    pub fn validate(&self, plan_text: &str, patient: &PatientContext) -> ValidationVerdict {
        self.validate_with_ref(plan_text, patient, None)
    }

    /// Like [`validate`](Self::validate), with an opaque caller reference
    /// (visit or record id) stored on the audit record.
    pub fn validate_with_ref(
        &self,
        plan_text: &str,
        patient: &PatientContext,
        patient_ref: Option<&str>,
    ) -> ValidationVerdict {
        let mut structured_entry = None;
        let mut retrieval_summary = Vec::new();

        let verdict = match self.run_pipeline(
            plan_text,
            patient,
            &mut structured_entry,
            &mut retrieval_summary,
        ) {
            Ok(verdict) => verdict,
            Err(verdict) => verdict,
        };

        tracing::info!(
            status = verdict.status.as_str(),
            reason = %verdict.reason,
            rule = ?verdict.matched_rule_id,
            citations = verdict.cited_chunk_ids.len(),
            "Validation verdict"
        );

        self.write_audit(&verdict, structured_entry, retrieval_summary, patient_ref);
        verdict
    }

    fn run_pipeline(
        &self,
        plan_text: &str,
        patient: &PatientContext,
        structured_entry: &mut Option<serde_json::Value>,
        retrieval_summary: &mut Vec<(Uuid, f32)>,
    ) -> Result<ValidationVerdict, ValidationVerdict> {
        let extractor = PrescriptionExtractor::new(
            &self.llm,
            &self.config.llm_model,
            self.config.confidence_floor,
            self.config.extraction_retries as u32,
        );
        let entry = extractor.extract(plan_text).map_err(|e| {
            tracing::error!(error = %e, "Extraction failed");
            ValidationVerdict::fail_closed("extraction", e)
        })?;
        *structured_entry = serde_json::to_value(&entry).ok();

        let rule = {
            let registry = self.registry.read().expect("registry lock poisoned");
            registry
                .lookup(&entry.drug, patient.age_months, patient.weight_kg)
                .cloned()
        };

        let snapshot = self.index.load();
        let retriever = EvidenceRetriever::new(
            &self.embedder,
            self.config.top_k,
            self.config.similarity_threshold,
            self.config.llm_retries as u32,
            self.config.retry_backoff_ms,
        );
        let evidence = retriever.retrieve(&entry, patient, &snapshot).map_err(|e| {
            tracing::error!(error = %e, "Retrieval failed");
            ValidationVerdict::fail_closed("retrieval", e)
        })?;
        *retrieval_summary = evidence.hits.iter().map(|h| (h.chunk_id, h.score)).collect();

        let synthesizer = DecisionSynthesizer::new(
            &self.llm,
            &self.config.llm_model,
            self.config.llm_retries as u32,
            self.config.retry_backoff_ms,
        );
        synthesizer
            .decide(&entry, rule.as_ref(), &evidence, patient)
            .map_err(|e| {
                tracing::error!(error = %e, "Synthesis failed");
                ValidationVerdict::fail_closed("synthesis", e)
            })
    }

    fn write_audit(
        &self,
        verdict: &ValidationVerdict,
        structured_entry: Option<serde_json::Value>,
        retrieval_summary: Vec<(Uuid, f32)>,
        patient_ref: Option<&str>,
    ) {
        let record = AuditRecord {
            verdict: verdict.clone(),
            structured_entry,
            retrieval_summary,
            rule_registry_version: Some(
                self.registry
                    .read()
                    .expect("registry lock poisoned")
                    .version()
                    .to_string(),
            ),
            embedding_model_id: self.embedder.model_id().to_string(),
            patient_ref: patient_ref.map(String::from),
        };

        let conn = self.conn.lock().expect("database lock poisoned");
        if let Err(e) = repository::insert_audit_record(&conn, &record) {
            // The verdict stands; a lost audit row is logged, not fatal
            tracing::error!(error = %e, verdict_id = %verdict.id, "Failed to persist audit record");
        }
    }

    pub fn index_status(&self) -> IndexStatus {
        let snapshot = self.index.load();
        let last_ingest = {
            let conn = self.conn.lock().expect("database lock poisoned");
            repository::get_index_meta(&conn, META_LAST_INGEST).unwrap_or(None)
        };

        IndexStatus {
            embedding_model_id: snapshot.embedding_model_id().to_string(),
            document_count: snapshot.document_count(),
            chunk_count: snapshot.chunk_count(),
            last_ingest,
        }
    }

    /// Recent audit records for a caller-supplied reference, newest first.
    pub fn audit_history(
        &self,
        patient_ref: &str,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, EngineError> {
        let conn = self.conn.lock().expect("database lock poisoned");
        Ok(repository::query_audit_by_patient(&conn, patient_ref, limit)?)
    }

    /// Swap in a new rule registry from disk without touching the index.
    pub fn reload_rules(&self, path: &Path) -> Result<(), EngineError> {
        let registry = RuleRegistry::load(path)?;
        *self.registry.write().expect("registry lock poisoned") = registry;
        Ok(())
    }

    pub fn rules_version(&self) -> String {
        self.registry
            .read()
            .expect("registry lock poisoned")
            .version()
            .to_string()
    }
}

/// Rebuild the in-memory snapshot from the knowledge base. The snapshot
/// carries the model id the vectors were produced with, so queries from
/// a different model fail closed instead of returning plausible noise.
fn build_snapshot(conn: &Connection, current_model_id: &str) -> Result<IndexSnapshot, DatabaseError> {
    let stored_model = repository::get_index_meta(conn, crate::pipeline::ingest::ingestor::META_EMBEDDING_MODEL)?;
    let model_id = stored_model.as_deref().unwrap_or(current_model_id);

    if model_id != current_model_id {
        tracing::warn!(
            index_model = model_id,
            configured_model = current_model_id,
            "Index was built with a different embedding model; validation will fail closed until re-ingest"
        );
    }

    let entries = repository::load_all_chunks(conn)?;
    Ok(IndexSnapshot::from_entries(model_id, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::VerdictStatus;
    use crate::pipeline::index::MockEmbedder;
    use crate::pipeline::llm::MockLlmClient;

    const MTX_GUIDE: &str = "# Guía metotrexato en AIJ\n\n## Dosificación\n\nDosis de metotrexato en paciente pediátrico: 10-15 mg/m2 una vez por semana, máximo 20 mg semanales, vía oral o subcutánea.\n\n## Seguimiento\n\nControl de transaminasas y hemograma cada 4-8 semanas durante el tratamiento.";

    const MTX_EXTRACTION: &str = r#"```json
{"drug": "Metotrexato", "dose_value": 15.0, "dose_unit": "mg",
 "frequency": {"times": 1, "period": "week"},
 "route": "subcutaneous", "confidence": 0.9}
```"#;

    const UNKNOWN_EXTRACTION: &str = r#"```json
{"drug": "canakinumab", "dose_value": 4.0, "dose_unit": "mg_per_kg",
 "frequency": {"times": 1, "period": "week"}, "confidence": 0.9}
```"#;

    fn test_config() -> EngineConfig {
        EngineConfig {
            retry_backoff_ms: 0,
            ..EngineConfig::default()
        }
    }

    fn test_registry() -> RuleRegistry {
        RuleRegistry::from_json(
            r#"{"version": "test-1", "rules": [
                {"id": "mtx-weekly", "drug": "metotrexato",
                 "aliases": ["methotrexate", "mtx"],
                 "max_dose": 20.0, "unit": "mg", "period": "week"}]}"#,
        )
        .unwrap()
    }

    fn engine_with(
        llm: MockLlmClient,
    ) -> ValidationEngine<MockEmbedder, MockLlmClient> {
        ValidationEngine::with_components(
            test_config(),
            open_memory_database().unwrap(),
            MockEmbedder::new(),
            llm,
            test_registry(),
        )
        .unwrap()
    }

    fn write_guide(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("mtx.md");
        std::fs::write(&path, MTX_GUIDE).unwrap();
        path
    }

    fn patient() -> PatientContext {
        PatientContext { age_months: 96, weight_kg: 30.0 }
    }

    #[test]
    fn end_to_end_metotrexato_plan_is_approved() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(MockLlmClient::new(MTX_EXTRACTION));

        let report = engine.ingest(&[write_guide(&dir)]).unwrap();
        assert_eq!(report.documents_indexed, 1);
        assert!(report.chunk_count >= 1);

        let verdict = engine.validate("Metotrexato 15 mg subcutáneo semanal", &patient());
        assert_eq!(verdict.status, VerdictStatus::Approved);
        assert_eq!(verdict.matched_rule_id.as_deref(), Some("mtx-weekly"));
        assert!(!verdict.cited_chunk_ids.is_empty());
    }

    #[test]
    fn dose_over_limit_is_rejected_despite_evidence() {
        let over = r#"```json
{"drug": "Metotrexato", "dose_value": 25.0, "dose_unit": "mg",
 "frequency": {"times": 1, "period": "week"}, "confidence": 0.9}
```"#;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(MockLlmClient::new(over));
        engine.ingest(&[write_guide(&dir)]).unwrap();

        let verdict = engine.validate("Metotrexato 25 mg semanal", &patient());
        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert_eq!(verdict.matched_rule_id.as_deref(), Some("mtx-weekly"));
    }

    #[test]
    fn unknown_drug_empty_index_fails_closed() {
        let engine = engine_with(MockLlmClient::new(UNKNOWN_EXTRACTION));

        let verdict = engine.validate("Canakinumab 4 mg/kg semanal", &patient());
        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert_eq!(verdict.reason, "unknown drug, no evidence");
    }

    #[test]
    fn extraction_failure_becomes_rejected_verdict_and_is_audited() {
        let engine = engine_with(MockLlmClient::new("not a prescription"));

        let verdict = engine.validate("???", &patient());
        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert!(verdict.reason.contains("extraction"));

        let conn = engine.conn.lock().unwrap();
        let record = repository::get_audit_record(&conn, &verdict.id).unwrap();
        assert!(record.is_some(), "fail-closed verdicts must still be audited");
    }

    #[test]
    fn audit_record_carries_pipeline_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(MockLlmClient::new(MTX_EXTRACTION));
        engine.ingest(&[write_guide(&dir)]).unwrap();

        let verdict = engine.validate_with_ref(
            "Metotrexato 15 mg subcutáneo semanal",
            &patient(),
            Some("visit-42"),
        );

        let conn = engine.conn.lock().unwrap();
        let record = repository::get_audit_record(&conn, &verdict.id).unwrap().unwrap();
        assert_eq!(record.patient_ref.as_deref(), Some("visit-42"));
        assert_eq!(record.rule_registry_version.as_deref(), Some("test-1"));
        assert!(record.structured_entry.is_some());
        assert!(!record.retrieval_summary.is_empty());
    }

    #[test]
    fn reingesting_same_document_does_not_duplicate_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_guide(&dir);
        let engine = engine_with(MockLlmClient::new(MTX_EXTRACTION));

        let first = engine.ingest(&[path.clone()]).unwrap();
        let second = engine.ingest(&[path]).unwrap();
        assert_eq!(first.chunk_count, second.chunk_count);
    }

    #[test]
    fn failing_document_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_guide(&dir);
        let missing = dir.path().join("missing.md");
        let engine = engine_with(MockLlmClient::new(MTX_EXTRACTION));

        let report = engine.ingest(&[missing, good]).unwrap();
        assert_eq!(report.documents_failed, 1);
        assert_eq!(report.documents_indexed, 1);
        assert!(report.chunk_count >= 1);
    }

    #[test]
    fn validations_complete_while_batch_ingest_runs() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..6)
            .map(|i| {
                let path = dir.path().join(format!("guia-{i}.md"));
                std::fs::write(&path, format!("{MTX_GUIDE}\n\nRevisión {i}.")).unwrap();
                path
            })
            .collect();
        let engine = engine_with(MockLlmClient::new(MTX_EXTRACTION));

        std::thread::scope(|scope| {
            let ingesting = scope.spawn(|| engine.ingest(&paths).unwrap());
            for _ in 0..4 {
                let verdict = engine.validate("Metotrexato 15 mg semanal", &patient());
                assert!(matches!(
                    verdict.status,
                    VerdictStatus::Approved | VerdictStatus::Alert
                ));
            }
            let report = ingesting.join().unwrap();
            assert_eq!(report.documents_indexed, 6);
        });
    }

    #[test]
    fn audit_history_returns_patient_records_only() {
        let engine = engine_with(MockLlmClient::new(MTX_EXTRACTION));

        engine.validate_with_ref("Metotrexato 15 mg semanal", &patient(), Some("visit-9"));
        engine.validate_with_ref("Metotrexato 15 mg semanal", &patient(), Some("visit-9"));
        engine.validate_with_ref("Metotrexato 15 mg semanal", &patient(), Some("visit-10"));

        let records = engine.audit_history("visit-9", 10).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.patient_ref.as_deref() == Some("visit-9")));
        assert!(engine.audit_history("visit-99", 10).unwrap().is_empty());
    }

    #[test]
    fn index_status_reflects_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(MockLlmClient::new(MTX_EXTRACTION));

        let before = engine.index_status();
        assert_eq!(before.chunk_count, 0);
        assert!(before.last_ingest.is_none());

        engine.ingest(&[write_guide(&dir)]).unwrap();
        let after = engine.index_status();
        assert_eq!(after.embedding_model_id, "mock-embedder-v1");
        assert_eq!(after.document_count, 1);
        assert!(after.chunk_count >= 1);
        assert!(after.last_ingest.is_some());
    }

    #[test]
    fn model_change_without_reingest_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("kb.db");

        {
            let engine = ValidationEngine::with_components(
                test_config(),
                open_database(&db_path).unwrap(),
                MockEmbedder::new(),
                MockLlmClient::new(MTX_EXTRACTION),
                test_registry(),
            )
            .unwrap();
            engine.ingest(&[write_guide(&dir)]).unwrap();
        }

        let engine = ValidationEngine::with_components(
            test_config(),
            open_database(&db_path).unwrap(),
            MockEmbedder::new().with_model_id("mock-embedder-v2"),
            MockLlmClient::new(MTX_EXTRACTION),
            test_registry(),
        )
        .unwrap();

        let verdict = engine.validate("Metotrexato 15 mg semanal", &patient());
        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert!(verdict.reason.contains("retrieval"));
    }

    #[test]
    fn rules_reload_swaps_registry() {
        let dir = tempfile::tempdir().unwrap();
        let rules = dir.path().join("rules.json");
        std::fs::write(
            &rules,
            r#"{"version": "test-2", "rules": [
                {"id": "npx-daily", "drug": "naproxeno",
                 "max_dose": 15.0, "unit": "mg_per_kg", "period": "day"}]}"#,
        )
        .unwrap();

        let engine = engine_with(MockLlmClient::new(MTX_EXTRACTION));
        assert_eq!(engine.rules_version(), "test-1");
        engine.reload_rules(&rules).unwrap();
        assert_eq!(engine.rules_version(), "test-2");
    }
}
