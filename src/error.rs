//! Error handling for the document QA service

use thiserror::Error;

/// Result type alias for the service
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Errors related to model operations (generation, embedding, reranking)
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Model initialization failed: {0}")]
    ModelInit(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Reranking failed: {0}")]
    RerankFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: operation took too long")]
    Timeout,
}

/// Errors related to the metadata and blob stores
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("Storage failed: {0}")]
    StorageFailed(String),
}

/// Errors related to the lexical index
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Indexing failed: {0}")]
    IndexingFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

/// Errors raised while turning raw bytes into chunks
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Parse failed: {0}")]
    Parse(String),

    #[error("Document bytes missing from blob store: {0}")]
    MissingBlob(String),
}

impl ServiceError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Llm(LlmError::Timeout)
                | ServiceError::Llm(LlmError::ConnectionFailed(_))
                | ServiceError::Http(_)
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            ServiceError::Llm(_) => "llm",
            ServiceError::Storage(_) => "storage",
            ServiceError::Search(_) => "search",
            ServiceError::Ingest(_) => "ingest",
            ServiceError::Config(_) => "config",
            ServiceError::Validation(_) => "validation",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Io(_) => "io",
            ServiceError::Serialization(_) => "serialization",
            ServiceError::Http(_) => "http",
            ServiceError::Database(_) => "database",
            ServiceError::Generic(_) => "generic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let timeout_error = ServiceError::Llm(LlmError::Timeout);
        assert!(timeout_error.is_retryable());

        let config_error = ServiceError::Config("invalid config".to_string());
        assert!(!config_error.is_retryable());
    }

    #[test]
    fn test_error_category() {
        let llm_error = ServiceError::Llm(LlmError::Timeout);
        assert_eq!(llm_error.category(), "llm");

        let storage_error = ServiceError::Storage(StorageError::StorageFailed("x".into()));
        assert_eq!(storage_error.category(), "storage");

        let not_found = ServiceError::NotFound("doc".into());
        assert_eq!(not_found.category(), "not_found");
    }
}
