//! Ingestion pipeline: parse, chunk, persist, embed, index
//!
//! Runs detached from the upload handler, behind a bounded worker pool; its
//! failure never fails the upload response. Every run ends with the document
//! in a terminal status (`READY`/`FAILED`) or leaves it exactly as it was
//! found.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunker::Chunker;
use crate::config::IngestSettings;
use crate::embedder::Embedder;
use crate::error::Result;
use crate::lexical::LexicalIndex;
use crate::parser;
use crate::store::{BlobStore, MetadataStore};
use crate::types::{ChunkEmbedding, DocumentStatus, LexicalRecord};

/// Orchestrates one document's journey from raw blob to searchable chunks
pub struct IngestionPipeline {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    lexical: Arc<dyn LexicalIndex>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        lexical: Arc<dyn LexicalIndex>,
        embedder: Arc<dyn Embedder>,
        chunker: Chunker,
    ) -> Self {
        Self {
            store,
            blobs,
            lexical,
            embedder,
            chunker,
        }
    }

    /// Ingest a document end to end. Any failure transitions the document to
    /// `FAILED`; this method itself never returns an error because nothing
    /// upstream is waiting for one.
    pub async fn ingest(&self, doc_id: Uuid) {
        if let Err(e) = self.run(doc_id).await {
            error!("Ingestion of {} failed ({}): {}", doc_id, e.category(), e);
            self.mark_failed(doc_id).await;
        }
    }

    async fn run(&self, doc_id: Uuid) -> Result<()> {
        let Some(document) = self.store.get_document(doc_id).await? else {
            warn!("Ingestion requested for unknown document {}", doc_id);
            return Ok(());
        };

        // Only UPLOADED documents enter the pipeline: READY/FAILED are
        // terminal and a PROCESSING document belongs to another run
        if document.status != DocumentStatus::Uploaded {
            debug!(
                "Skipping ingestion of {} in status {}",
                doc_id, document.status
            );
            return Ok(());
        }

        self.store
            .update_status(doc_id, DocumentStatus::Processing)
            .await?;

        let bytes = self
            .blobs
            .get(&document.blob_bucket, &document.blob_key)
            .await
            .map_err(|e| match e {
                crate::error::ServiceError::NotFound(key) => {
                    crate::error::IngestError::MissingBlob(key).into()
                }
                other => other,
            })?;
        let pages = parser::parse_pages(&bytes, &document.content_type)?;

        let chunks = self.chunker.chunk_document(doc_id, &pages);
        info!(
            "Document {}: {} pages -> {} parents / {} children",
            doc_id,
            pages.len(),
            chunks.parents.len(),
            chunks.children.len()
        );

        // Parents and children land together, before embeddings, so the
        // embedding upserts can reference the child rows
        self.store
            .insert_chunks(&chunks.parents, &chunks.children)
            .await?;

        if !chunks.children.is_empty() {
            let texts: Vec<String> = chunks
                .children
                .iter()
                .map(|child| child.text.clone())
                .collect();
            let vectors = self.embedder.embed_batch(&texts).await?;

            let now = Utc::now();
            let embeddings: Vec<ChunkEmbedding> = chunks
                .children
                .iter()
                .zip(vectors)
                .map(|(child, vector)| ChunkEmbedding {
                    child_id: child.id,
                    vector,
                    model_name: self.embedder.model_name().to_string(),
                    created_at: now,
                })
                .collect();
            self.store.upsert_embeddings(&embeddings).await?;

            let records: Vec<LexicalRecord> = chunks
                .children
                .iter()
                .map(|child| LexicalRecord::from_child(child, &document))
                .collect();
            self.lexical.index_chunks(records).await?;
        }

        self.store
            .update_status(doc_id, DocumentStatus::Ready)
            .await?;
        info!("Document {} is READY", doc_id);
        Ok(())
    }

    /// Terminal-status escape hatch: the status write runs on a fresh pooled
    /// connection, independent of whatever failed mid-ingest. If even this
    /// write fails the document stays PROCESSING and the error is logged.
    async fn mark_failed(&self, doc_id: Uuid) {
        if let Err(e) = self
            .store
            .update_status(doc_id, DocumentStatus::Failed)
            .await
        {
            error!("Could not mark document {} as FAILED: {}", doc_id, e);
        }
    }
}

/// Bounded worker pool feeding the ingestion pipeline.
///
/// The upload handler enqueues and returns; a fixed set of workers drains
/// the queue, so a burst of uploads cannot spawn an unbounded number of
/// concurrent ingestions. Ingestion is best-effort: a full queue drops the
/// job (the document stays `UPLOADED`) rather than blocking the upload
/// response, and per-document failures land in the terminal `FAILED` status.
pub struct IngestionQueue {
    tx: flume::Sender<Uuid>,
}

impl IngestionQueue {
    /// Spawn `settings.workers` drain tasks over a queue of
    /// `settings.queue_capacity` entries
    pub fn start(pipeline: Arc<IngestionPipeline>, settings: &IngestSettings) -> Self {
        let (tx, rx) = flume::bounded(settings.queue_capacity.max(1));

        for worker_id in 0..settings.workers.max(1) {
            let rx = rx.clone();
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                while let Ok(doc_id) = rx.recv_async().await {
                    debug!("Ingest worker {} picked up {}", worker_id, doc_id);
                    pipeline.ingest(doc_id).await;
                }
                debug!("Ingest worker {} shutting down", worker_id);
            });
        }

        Self { tx }
    }

    /// Enqueue a document for ingestion. Returns `false` when the queue is
    /// full and the job was dropped.
    pub fn enqueue(&self, doc_id: Uuid) -> bool {
        match self.tx.try_send(doc_id) {
            Ok(()) => true,
            Err(e) => {
                warn!("Ingestion queue full, dropping {}: {}", doc_id, e);
                false
            }
        }
    }
}
