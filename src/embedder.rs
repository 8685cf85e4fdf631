//! Dense embedding of chunk and query texts
//!
//! Inference is CPU-bound and must never run on the async scheduler: every
//! call goes through `spawn_blocking`, and the ONNX model is initialized
//! lazily behind a mutex so the first caller pays the load cost and later
//! calls are serialized through the blocking pool.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::{debug, info};

use crate::config::EmbeddingSettings;
use crate::error::{LlmError, Result, ServiceError};

/// Trait for dense text embedding
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; the output has the same length and every
    /// vector has the deployment's fixed dimension.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query (a one-text batch)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Name of the encoder that produced the vectors
    fn model_name(&self) -> &str;

    /// Vector dimension
    fn dimension(&self) -> usize;
}

/// fastembed-backed embedder (ONNX, local CPU inference)
pub struct FastembedEmbedder {
    model: Arc<Mutex<Option<TextEmbedding>>>,
    settings: EmbeddingSettings,
}

impl FastembedEmbedder {
    pub fn new(settings: EmbeddingSettings) -> Self {
        Self {
            model: Arc::new(Mutex::new(None)),
            settings,
        }
    }

    /// Map the configured model name to a fastembed model id
    fn resolve_model(name: &str) -> std::result::Result<EmbeddingModel, LlmError> {
        match name {
            "BAAI/bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
            "BAAI/bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
            "sentence-transformers/all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
            other => Err(LlmError::ModelInit(format!(
                "Unsupported embedding model: {}",
                other
            ))),
        }
    }

    fn embed_blocking(
        model_slot: &Mutex<Option<TextEmbedding>>,
        settings: &EmbeddingSettings,
        texts: Vec<String>,
    ) -> std::result::Result<Vec<Vec<f32>>, LlmError> {
        let mut guard = model_slot
            .lock()
            .map_err(|e| LlmError::ModelInit(format!("Model lock poisoned: {}", e)))?;

        if guard.is_none() {
            info!("Initializing embedding model {}", settings.model_name);
            let model_id = Self::resolve_model(&settings.model_name)?;
            let model = TextEmbedding::try_new(
                InitOptions::new(model_id).with_show_download_progress(false),
            )
            .map_err(|e| LlmError::ModelInit(e.to_string()))?;
            *guard = Some(model);
        }

        let model = guard
            .as_mut()
            .ok_or_else(|| LlmError::ModelInit("Embedding model not initialized".to_string()))?;

        let vectors = model
            .embed(texts, Some(settings.batch_size))
            .map_err(|e| LlmError::EmbeddingFailed(e.to_string()))?;

        for vector in &vectors {
            if vector.len() != settings.dimension {
                return Err(LlmError::EmbeddingFailed(format!(
                    "Model produced dimension {} but deployment expects {}",
                    vector.len(),
                    settings.dimension
                )));
            }
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for FastembedEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} texts", texts.len());

        let model_slot = Arc::clone(&self.model);
        let settings = self.settings.clone();
        let texts = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            Self::embed_blocking(&model_slot, &settings, texts)
        })
        .await
        .map_err(|e| ServiceError::Llm(LlmError::EmbeddingFailed(e.to_string())))??;

        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| LlmError::EmbeddingFailed("Empty embedding batch".to_string()).into())
    }

    fn model_name(&self) -> &str {
        &self.settings.model_name
    }

    fn dimension(&self) -> usize {
        self.settings.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_models() {
        assert!(FastembedEmbedder::resolve_model("BAAI/bge-small-en-v1.5").is_ok());
        assert!(FastembedEmbedder::resolve_model("sentence-transformers/all-MiniLM-L6-v2").is_ok());
    }

    #[test]
    fn test_resolve_unknown_model_fails() {
        let err = FastembedEmbedder::resolve_model("acme/imaginary-encoder").unwrap_err();
        assert!(matches!(err, LlmError::ModelInit(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_short_circuits() {
        // Must not touch (or initialize) the model
        let embedder = FastembedEmbedder::new(EmbeddingSettings::default());
        let vectors = embedder.embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    #[test]
    fn test_reports_configured_model() {
        let embedder = FastembedEmbedder::new(EmbeddingSettings::default());
        assert_eq!(embedder.model_name(), "BAAI/bge-small-en-v1.5");
        assert_eq!(embedder.dimension(), 384);
    }
}
