pub mod ingest;
pub mod index;
pub mod rules;
pub mod llm;
pub mod extract;
pub mod retrieve;
pub mod synthesis;
