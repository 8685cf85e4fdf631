//! Ingestion and query orchestration

pub mod fusion;
pub mod ingest;
pub mod query;

pub use ingest::{IngestionPipeline, IngestionQueue};
pub use query::{QueryOutcome, QueryPipeline};
