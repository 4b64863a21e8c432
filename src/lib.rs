pub mod config;
pub mod models;
pub mod db;
pub mod pipeline;
pub mod engine;

use tracing_subscriber::EnvFilter;

pub use engine::{IndexStatus, IngestReport, ValidationEngine};
pub use models::verdict::{ValidationVerdict, VerdictStatus};
pub use models::PatientContext;

/// Initialize tracing for binaries embedding the engine.
/// Honors `RUST_LOG`; defaults to info-level output for this crate.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("veridose=info")),
        )
        .init();

    tracing::info!("Veridose engine v{}", config::APP_VERSION);
}
