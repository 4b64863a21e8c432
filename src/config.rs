use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Veridose";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the engine data directory.
/// ~/Veridose/ on all platforms (user-visible, per design requirement).
pub fn data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Veridose")
}

/// Default location of the knowledge-base database.
pub fn database_path() -> PathBuf {
    data_dir().join("knowledge.db")
}

/// Default location of the dose rule registry file.
pub fn rules_path() -> PathBuf {
    data_dir().join("dose_rules.json")
}

/// Runtime configuration for the validation engine.
///
/// Every operational knob is externally configurable through `VERIDOSE_*`
/// environment variables; the defaults below apply when a variable is unset
/// or unparseable.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the Ollama-compatible endpoint used for both
    /// embeddings and text generation.
    pub ollama_base_url: String,
    /// Embedding model name. Doubles as the embedding-model identifier
    /// stored with the index; changing it invalidates stored vectors.
    pub embedding_model: String,
    /// Expected embedding vector length; responses of any other length
    /// are rejected.
    pub embedding_dimension: usize,
    /// LLM used for extraction and corroboration.
    pub llm_model: String,
    /// Number of chunks fetched per retrieval.
    pub top_k: usize,
    /// Minimum similarity (cosine, normalized to [0,1]) for a chunk to
    /// count as evidence.
    pub similarity_threshold: f32,
    /// Extraction confidence below this floor forces at minimum an ALERT.
    pub confidence_floor: f32,
    /// Per-request timeout for LLM and embedding calls.
    pub llm_timeout_secs: u64,
    /// Automatic retries for transient LLM/embedding failures.
    pub llm_retries: usize,
    /// Re-prompt attempts when extraction output fails schema validation.
    pub extraction_retries: usize,
    /// Backoff between retries, in milliseconds (linear).
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ollama_base_url: "http://localhost:11434".into(),
            embedding_model: "nomic-embed-text".into(),
            embedding_dimension: 768,
            llm_model: "medgemma".into(),
            top_k: 5,
            similarity_threshold: 0.6,
            confidence_floor: 0.5,
            llm_timeout_secs: 120,
            llm_retries: 2,
            extraction_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Build a config from `VERIDOSE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            ollama_base_url: env_string("VERIDOSE_OLLAMA_URL", d.ollama_base_url),
            embedding_model: env_string("VERIDOSE_EMBEDDING_MODEL", d.embedding_model),
            embedding_dimension: env_parse("VERIDOSE_EMBEDDING_DIM", d.embedding_dimension),
            llm_model: env_string("VERIDOSE_LLM_MODEL", d.llm_model),
            top_k: env_parse("VERIDOSE_TOP_K", d.top_k),
            similarity_threshold: env_parse("VERIDOSE_SIMILARITY_THRESHOLD", d.similarity_threshold),
            confidence_floor: env_parse("VERIDOSE_CONFIDENCE_FLOOR", d.confidence_floor),
            llm_timeout_secs: env_parse("VERIDOSE_LLM_TIMEOUT_SECS", d.llm_timeout_secs),
            llm_retries: env_parse("VERIDOSE_LLM_RETRIES", d.llm_retries),
            extraction_retries: env_parse("VERIDOSE_EXTRACTION_RETRIES", d.extraction_retries),
            retry_backoff_ms: env_parse("VERIDOSE_RETRY_BACKOFF_MS", d.retry_backoff_ms),
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
