//! Document-Grounded Question Answering
//!
//! A service that ingests uploaded documents into a searchable form and
//! answers natural-language questions with citations back to source
//! passages:
//! - Hierarchical chunking (parent context windows, child retrieval units)
//! - Dual indexing: BM25 lexical search and pgvector nearest-neighbor search
//! - Reciprocal-rank fusion, cross-encoder reranking, small-to-big expansion
//! - Grounded generation against an Ollama-style chat endpoint
//!
//! # Example
//!
//! ```rust,no_run
//! use docqa::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::from_env()?;
//!     println!("Serving on {}:{}", settings.server.host, settings.server.port);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod lexical;
pub mod parser;
pub mod pipeline;
pub mod reranker;
pub mod store;
pub mod types;

// Re-export main types
pub use api::{create_router, start_server, AppState};
pub use chunker::{chunk_hash, centered_window, ChunkSet, Chunker};
pub use config::Settings;
pub use embedder::{Embedder, FastembedEmbedder};
pub use error::{IngestError, LlmError, Result, SearchError, ServiceError, StorageError};
pub use generator::{Generator, OllamaGenerator};
pub use lexical::{KeywordHit, LexicalIndex, TantivyLexicalIndex};
pub use pipeline::{IngestionPipeline, IngestionQueue, QueryOutcome, QueryPipeline};
pub use reranker::{FastembedReranker, Reranker};
pub use store::{document_key, BlobStore, FsBlobStore, MetadataStore, PgMetadataStore};
pub use types::{
    ChildChunk, ChildHit, ChunkEmbedding, Citation, Document, DocumentStatus, LexicalRecord,
    Page, ParentChunk, ParentHit,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
