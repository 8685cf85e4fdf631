//! Cross-encoder scoring of (query, candidate) pairs
//!
//! Same execution model as the embedder: a single lazily-initialized model
//! behind a mutex, every invocation posted to the blocking pool.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RerankerSettings;
use crate::error::{LlmError, Result, ServiceError};

/// Trait for cross-encoder reranking
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score every `(query, candidate_text)` pair and return
    /// `(candidate_id, score)` sorted by score descending. Candidates with
    /// equal scores keep their input order. Empty input yields empty output.
    async fn rerank(&self, query: &str, candidates: &[(Uuid, String)])
        -> Result<Vec<(Uuid, f32)>>;
}

/// fastembed-backed cross-encoder reranker
pub struct FastembedReranker {
    model: Arc<Mutex<Option<TextRerank>>>,
    settings: RerankerSettings,
}

impl FastembedReranker {
    pub fn new(settings: RerankerSettings) -> Self {
        Self {
            model: Arc::new(Mutex::new(None)),
            settings,
        }
    }

    fn resolve_model(name: &str) -> std::result::Result<RerankerModel, LlmError> {
        match name {
            "BAAI/bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
            "jinaai/jina-reranker-v1-turbo-en" => Ok(RerankerModel::JINARerankerV1TurboEn),
            other => Err(LlmError::ModelInit(format!(
                "Unsupported reranker model: {}",
                other
            ))),
        }
    }

    fn rerank_blocking(
        model_slot: &Mutex<Option<TextRerank>>,
        settings: &RerankerSettings,
        query: String,
        candidates: Vec<(Uuid, String)>,
    ) -> std::result::Result<Vec<(Uuid, f32)>, LlmError> {
        let mut guard = model_slot
            .lock()
            .map_err(|e| LlmError::ModelInit(format!("Model lock poisoned: {}", e)))?;

        if guard.is_none() {
            info!("Initializing reranker model {}", settings.model_name);
            let model_id = Self::resolve_model(&settings.model_name)?;
            let model = TextRerank::try_new(
                RerankInitOptions::new(model_id).with_show_download_progress(false),
            )
            .map_err(|e| LlmError::ModelInit(e.to_string()))?;
            *guard = Some(model);
        }

        let model = guard
            .as_mut()
            .ok_or_else(|| LlmError::ModelInit("Reranker model not initialized".to_string()))?;

        let documents: Vec<&str> = candidates.iter().map(|(_, text)| text.as_str()).collect();
        let results = model
            .rerank(query.as_str(), documents, false, None)
            .map_err(|e| LlmError::RerankFailed(e.to_string()))?;

        // Re-establish input order first, then sort by score with a stable
        // sort so equal scores keep that order
        let mut scored: Vec<(usize, Uuid, f32)> = results
            .into_iter()
            .map(|r| (r.index, candidates[r.index].0, r.score))
            .collect();
        scored.sort_by_key(|(index, _, _)| *index);
        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored.into_iter().map(|(_, id, score)| (id, score)).collect())
    }
}

#[async_trait]
impl Reranker for FastembedReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[(Uuid, String)],
    ) -> Result<Vec<(Uuid, f32)>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Reranking {} candidates", candidates.len());

        let model_slot = Arc::clone(&self.model);
        let settings = self.settings.clone();
        let query = query.to_string();
        let candidates = candidates.to_vec();

        let ranked = tokio::task::spawn_blocking(move || {
            Self::rerank_blocking(&model_slot, &settings, query, candidates)
        })
        .await
        .map_err(|e| ServiceError::Llm(LlmError::RerankFailed(e.to_string())))??;

        Ok(ranked)
    }
}
