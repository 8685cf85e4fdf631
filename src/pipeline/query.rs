//! Query pipeline: expand, retrieve, fuse, rerank, expand to parents,
//! generate, cite
//!
//! Retrieval fans out to the lexical and vector indexes concurrently, the
//! lists are fused by reciprocal rank, a cross-encoder re-scores the fused
//! children against the *original* question, and the survivors are expanded
//! small-to-big into parent windows for generation. Every stage is
//! deterministic for identical inputs: stable sorts everywhere, ties resolve
//! to the earlier list position.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunker::centered_window;
use crate::config::{GeneratorSettings, RetrievalSettings};
use crate::embedder::Embedder;
use crate::error::Result;
use crate::generator::{
    self, answer_system_prompt, answer_user_prompt, hyde_system_prompt, parse_citation_markers,
    stitch_fallback, truncate_chars, Generator,
};
use crate::lexical::LexicalIndex;
use crate::reranker::Reranker;
use crate::store::MetadataStore;
use crate::types::{ChildChunk, Citation, ParentHit};

/// Final answer plus its source references. `citations` is empty only when
/// retrieval found nothing at all.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Orchestrates hybrid retrieval and grounded generation
pub struct QueryPipeline {
    store: Arc<dyn MetadataStore>,
    lexical: Arc<dyn LexicalIndex>,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    generator: Arc<dyn Generator>,
    retrieval: RetrievalSettings,
    answer_timeout: Duration,
    expansion_timeout: Duration,
}

impl QueryPipeline {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        lexical: Arc<dyn LexicalIndex>,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        generator: Arc<dyn Generator>,
        retrieval: RetrievalSettings,
        generator_settings: &GeneratorSettings,
    ) -> Self {
        Self {
            store,
            lexical,
            embedder,
            reranker,
            generator,
            retrieval,
            answer_timeout: Duration::from_secs(generator_settings.timeout_secs),
            expansion_timeout: Duration::from_secs(generator_settings.expansion_timeout_secs),
        }
    }

    /// Answer `question` over the READY corpus, optionally restricted to
    /// `doc_ids`
    pub async fn answer(
        &self,
        question: &str,
        top_k: usize,
        doc_ids: Option<Vec<Uuid>>,
    ) -> Result<QueryOutcome> {
        // Stage 1: optional hypothetical-answer expansion; fails open to the
        // original question. The expanded form drives both retrievals, the
        // original question drives the reranker.
        let retrieval_query = if self.retrieval.hyde_enabled {
            self.expand_query(question).await
        } else {
            question.to_string()
        };

        // Stage 2: embed the retrieval query
        let query_vector = self.embedder.embed_query(&retrieval_query).await?;

        // Stage 3: dual retrieval, concurrently; both honor the filter
        let doc_filter = doc_ids.as_deref();
        let (keyword_hits, vector_ids) = tokio::join!(
            self.lexical.search_keyword(
                &retrieval_query,
                self.retrieval.keyword_top_k,
                doc_filter,
            ),
            self.store
                .vector_search(&query_vector, self.retrieval.vector_top_k, doc_filter),
        );
        let keyword_ids: Vec<Uuid> = keyword_hits?.into_iter().map(|hit| hit.child_id).collect();
        let vector_ids = vector_ids?;

        // Stage 4: reciprocal-rank fusion
        let merge_limit = self.retrieval.merge_top_k.max(top_k);
        let fused = super::fusion::reciprocal_rank_fusion(
            &keyword_ids,
            &vector_ids,
            self.retrieval.rrf_k,
            merge_limit,
        );
        debug!(
            "Retrieved {} keyword + {} vector candidates, {} fused",
            keyword_ids.len(),
            vector_ids.len(),
            fused.len()
        );
        if fused.is_empty() {
            return Ok(QueryOutcome {
                answer: generator::NO_RELEVANT_CHUNKS.to_string(),
                citations: Vec::new(),
            });
        }

        // Stage 5: load child metadata in fused order (READY documents only)
        let children = self.store.get_children_with_documents(&fused).await?;
        if children.is_empty() {
            return Ok(QueryOutcome {
                answer: generator::NO_RELEVANT_CHUNKS.to_string(),
                citations: Vec::new(),
            });
        }

        // Stage 6: cross-encoder rerank against the original question
        let candidates: Vec<(Uuid, String)> = children
            .iter()
            .map(|hit| (hit.chunk.id, hit.chunk.text.clone()))
            .collect();
        let mut ranked = self.reranker.rerank(question, &candidates).await?;
        ranked.truncate(self.retrieval.rerank_top_n);

        // Stage 7: small-to-big — collect each surviving child's parent once,
        // remembering the first (best-ranked) child as that parent's anchor
        let child_by_id: HashMap<Uuid, &ChildChunk> = children
            .iter()
            .map(|hit| (hit.chunk.id, &hit.chunk))
            .collect();
        let max_parents = self.retrieval.max_parent_chunks_for_llm.max(top_k);
        let mut parent_ids: Vec<Uuid> = Vec::new();
        let mut anchors: HashMap<Uuid, ChildChunk> = HashMap::new();
        for (child_id, _score) in &ranked {
            let Some(child) = child_by_id.get(child_id) else {
                continue;
            };
            if !anchors.contains_key(&child.parent_id) {
                parent_ids.push(child.parent_id);
                anchors.insert(child.parent_id, (*child).clone());
                if parent_ids.len() >= max_parents {
                    break;
                }
            }
        }

        // Stage 8: load parent rows in collection order
        let parents = self.store.get_parents_with_documents(&parent_ids).await?;
        if parents.is_empty() {
            return Ok(QueryOutcome {
                answer: generator::NO_RELEVANT_CHUNKS.to_string(),
                citations: Vec::new(),
            });
        }

        // Stage 9: extract a bounded window from each parent, centered on
        // its anchor child
        let windows: Vec<String> = parents
            .iter()
            .map(|parent| self.extract_window(parent, anchors.get(&parent.chunk.id)))
            .collect();

        // Stage 10: generation with the [P<i>] citation contract
        let outcome = self.generate(question, &parents, &windows).await;
        info!(
            "Answered with {} citations from {} windows",
            outcome.citations.len(),
            windows.len()
        );
        Ok(outcome)
    }

    /// HyDE expansion: generate a hypothetical short answer and append it to
    /// the question. Any failure or empty response falls back to the
    /// original question.
    async fn expand_query(&self, question: &str) -> String {
        match self
            .generator
            .chat(hyde_system_prompt(), question, self.expansion_timeout)
            .await
        {
            Ok(hypothetical) if !hypothetical.trim().is_empty() => {
                debug!("HyDE expansion produced {} chars", hypothetical.len());
                format!("{}\n\n{}", question, hypothetical.trim())
            }
            Ok(_) => question.to_string(),
            Err(e) => {
                warn!("HyDE expansion failed, using original question: {}", e);
                question.to_string()
            }
        }
    }

    fn extract_window(&self, parent: &ParentHit, anchor: Option<&ChildChunk>) -> String {
        let span = anchor.map(|child| {
            (
                child.char_start.saturating_sub(parent.chunk.char_start),
                child.char_end.saturating_sub(parent.chunk.char_start),
            )
        });
        centered_window(
            &parent.chunk.text,
            span,
            self.retrieval.max_parent_chunk_chars_for_llm,
        )
    }

    async fn generate(
        &self,
        question: &str,
        parents: &[ParentHit],
        windows: &[String],
    ) -> QueryOutcome {
        let system = answer_system_prompt();
        let user = answer_user_prompt(question, windows);

        match self
            .generator
            .chat(&system, &user, self.answer_timeout)
            .await
        {
            Ok(answer) => {
                let markers: Vec<usize> = parse_citation_markers(&answer)
                    .into_iter()
                    .filter(|&i| i >= 1 && i <= windows.len())
                    .collect();

                let citations = if markers.is_empty() {
                    // The model cited nothing recognizable; fall back to the
                    // first context chunk
                    vec![Self::citation(&parents[0], &windows[0])]
                } else {
                    markers
                        .into_iter()
                        .map(|i| Self::citation(&parents[i - 1], &windows[i - 1]))
                        .collect()
                };

                QueryOutcome { answer, citations }
            }
            Err(e) => {
                warn!("Generator failed, stitching fallback answer: {}", e);
                let take = self
                    .retrieval
                    .max_parent_chunks_for_llm
                    .min(windows.len())
                    .max(1);
                let answer = stitch_fallback(windows, take);
                let citations = parents
                    .iter()
                    .zip(windows)
                    .take(take)
                    .map(|(parent, window)| Self::citation(parent, window))
                    .collect();
                QueryOutcome { answer, citations }
            }
        }
    }

    fn citation(parent: &ParentHit, window: &str) -> Citation {
        Citation {
            document_id: parent.chunk.doc_id,
            filename: parent.filename.clone(),
            page_start: Some(parent.chunk.page_start),
            page_end: Some(parent.chunk.page_end),
            excerpt: truncate_chars(window, generator::EXCERPT_CHARS),
            chunk_id: parent.chunk.id,
        }
    }
}
