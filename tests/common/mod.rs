//! Test fakes and helpers for the docqa test suite
//!
//! The metadata and blob stores are replaced by in-memory fakes that honor
//! the trait contracts (READY filtering, status state machine, upsert
//! semantics, brute-force cosine ordering). The lexical index is the real
//! tantivy implementation in a temp directory. Embedder and reranker are
//! deterministic stubs so tests never download models.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use uuid::Uuid;

use docqa::chunker::Chunker;
use docqa::config::{ChunkingSettings, GeneratorSettings, RetrievalSettings};
use docqa::embedder::Embedder;
use docqa::error::{LlmError, Result, ServiceError, StorageError};
use docqa::generator::Generator;
use docqa::lexical::{LexicalIndex, TantivyLexicalIndex};
use docqa::pipeline::{IngestionPipeline, QueryPipeline};
use docqa::reranker::Reranker;
use docqa::store::{document_key, BlobStore, MetadataStore};
use docqa::types::{
    ChildChunk, ChildHit, ChunkEmbedding, Document, DocumentStatus, ParentChunk, ParentHit,
};

pub const STUB_DIMENSION: usize = 32;

/// In-memory metadata store honoring the trait contract
#[derive(Default)]
pub struct InMemoryMetadataStore {
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    documents: HashMap<Uuid, Document>,
    parents: HashMap<Uuid, ParentChunk>,
    children: HashMap<Uuid, ChildChunk>,
    embeddings: HashMap<Uuid, ChunkEmbedding>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 1.0;
        }
        1.0 - dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.inner.lock().unwrap().documents.get(&id).cloned())
    }

    async fn find_by_tenant_and_hash(
        &self,
        tenant_tag: &str,
        content_hash: &str,
    ) -> Result<Option<Document>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .documents
            .values()
            .find(|d| d.tenant_tag == tenant_tag && d.content_hash == content_hash)
            .cloned())
    }

    async fn update_status(&self, id: Uuid, status: DocumentStatus) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(document) = inner.documents.get_mut(&id) else {
            return Err(ServiceError::NotFound(format!("document {}", id)));
        };
        if !document.status.can_transition(status) {
            return Err(StorageError::IllegalTransition {
                from: document.status.as_str().to_string(),
                to: status.as_str().to_string(),
            }
            .into());
        }
        document.status = status;
        Ok(())
    }

    async fn insert_chunks(&self, parents: &[ParentChunk], children: &[ChildChunk]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for parent in parents {
            inner.parents.insert(parent.id, parent.clone());
        }
        for child in children {
            inner.children.insert(child.id, child.clone());
        }
        Ok(())
    }

    async fn upsert_embeddings(&self, embeddings: &[ChunkEmbedding]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for embedding in embeddings {
            if embedding.vector.len() != STUB_DIMENSION {
                return Err(StorageError::InvalidDimension {
                    expected: STUB_DIMENSION,
                    actual: embedding.vector.len(),
                }
                .into());
            }
            inner.embeddings.insert(embedding.child_id, embedding.clone());
        }
        Ok(())
    }

    async fn vector_search(
        &self,
        query: &[f32],
        limit: usize,
        doc_ids: Option<&[Uuid]>,
    ) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().unwrap();
        let filter: Option<HashSet<Uuid>> = doc_ids.map(|ids| ids.iter().copied().collect());

        let mut scored: Vec<(f32, Uuid)> = inner
            .embeddings
            .values()
            .filter_map(|embedding| {
                let child = inner.children.get(&embedding.child_id)?;
                let document = inner.documents.get(&child.doc_id)?;
                if document.status != DocumentStatus::Ready {
                    return None;
                }
                if let Some(filter) = &filter {
                    if !filter.contains(&child.doc_id) {
                        return None;
                    }
                }
                Some((
                    Self::cosine_distance(query, &embedding.vector),
                    embedding.child_id,
                ))
            })
            .collect();

        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, id)| id).collect())
    }

    async fn get_children_with_documents(&self, ids: &[Uuid]) -> Result<Vec<ChildHit>> {
        let inner = self.inner.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                let chunk = inner.children.get(id)?.clone();
                let document = inner.documents.get(&chunk.doc_id)?;
                if document.status != DocumentStatus::Ready {
                    return None;
                }
                Some(ChildHit {
                    chunk,
                    filename: document.filename.clone(),
                })
            })
            .collect())
    }

    async fn get_parents_with_documents(&self, ids: &[Uuid]) -> Result<Vec<ParentHit>> {
        let inner = self.inner.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                let chunk = inner.parents.get(id)?.clone();
                let document = inner.documents.get(&chunk.doc_id)?;
                if document.status != DocumentStatus::Ready {
                    return None;
                }
                Some(ParentHit {
                    chunk,
                    filename: document.filename.clone(),
                })
            })
            .collect())
    }

    async fn count_chunks(&self, doc_id: Uuid) -> Result<(usize, usize)> {
        let inner = self.inner.lock().unwrap();
        let parents = inner.parents.values().filter(|p| p.doc_id == doc_id).count();
        let children = inner.children.values().filter(|c| c.doc_id == doc_id).count();
        Ok((parents, children))
    }
}

impl InMemoryMetadataStore {
    pub fn embedding_count(&self, doc_id: Uuid) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .embeddings
            .values()
            .filter(|e| {
                inner
                    .children
                    .get(&e.child_id)
                    .map(|c| c.doc_id == doc_id)
                    .unwrap_or(false)
            })
            .count()
    }
}

/// In-memory blob store
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn ensure_bucket(&self, _bucket: &str) -> Result<()> {
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, body: &[u8], _content_type: &str) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), body.to_vec());
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("blob {}/{}", bucket, key)))
    }
}

/// Deterministic bag-of-words embedder: each lowercase token is hashed into
/// one of `STUB_DIMENSION` buckets, so texts sharing words land near each
/// other under cosine distance.
pub struct StubEmbedder;

impl StubEmbedder {
    fn embed_one(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; STUB_DIMENSION];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let digest = Sha256::digest(token.as_bytes());
            let bucket = (digest[0] as usize + 256 * digest[1] as usize) % STUB_DIMENSION;
            vector[bucket] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::embed_one(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::embed_one(text))
    }

    fn model_name(&self) -> &str {
        "stub-encoder"
    }

    fn dimension(&self) -> usize {
        STUB_DIMENSION
    }
}

/// Deterministic reranker: score is the count of query tokens found in the
/// candidate text, ties keep input order (stable sort).
pub struct StubReranker;

#[async_trait]
impl Reranker for StubReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[(Uuid, String)],
    ) -> Result<Vec<(Uuid, f32)>> {
        let tokens: Vec<String> = query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        let mut scored: Vec<(Uuid, f32)> = candidates
            .iter()
            .map(|(id, text)| {
                let haystack = text.to_lowercase();
                let score = tokens.iter().filter(|t| haystack.contains(*t)).count() as f32;
                (*id, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored)
    }
}

/// Scripted generator: returns a fixed answer, or errors to trigger the
/// stitched fallback path.
pub enum GeneratorScript {
    Answer(String),
    Fail,
}

pub struct ScriptedGenerator {
    script: GeneratorScript,
}

impl ScriptedGenerator {
    pub fn answering(answer: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            script: GeneratorScript::Answer(answer.into()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            script: GeneratorScript::Fail,
        })
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn chat(&self, _system: &str, _user: &str, _timeout: Duration) -> Result<String> {
        match &self.script {
            GeneratorScript::Answer(answer) => Ok(answer.clone()),
            GeneratorScript::Fail => {
                Err(LlmError::ConnectionFailed("scripted outage".to_string()).into())
            }
        }
    }
}

/// A fully wired service over fakes, with the real tantivy lexical index
pub struct TestService {
    pub store: Arc<InMemoryMetadataStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub lexical: Arc<dyn LexicalIndex>,
    pub ingestion: Arc<IngestionPipeline>,
    retrieval: RetrievalSettings,
    _lexical_dir: TempDir,
}

impl TestService {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryMetadataStore::new());
        let blobs = Arc::new(InMemoryBlobStore::default());
        let lexical_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let lexical: Arc<dyn LexicalIndex> = Arc::new(
            TantivyLexicalIndex::open(lexical_dir.path(), "chunks").expect("open lexical index"),
        );
        lexical.ensure_index().await.expect("ensure lexical index");

        // Small windows so short fixtures produce several chunks
        let chunking = ChunkingSettings {
            parent_chunk_chars: 200,
            parent_overlap_chars: 20,
            child_chunk_chars: 80,
            child_overlap_chars: 10,
        };

        let ingestion = Arc::new(IngestionPipeline::new(
            store.clone() as Arc<dyn MetadataStore>,
            blobs.clone() as Arc<dyn BlobStore>,
            Arc::clone(&lexical),
            Arc::new(StubEmbedder),
            Chunker::new(chunking),
        ));

        Self {
            store,
            blobs,
            lexical,
            ingestion,
            retrieval: RetrievalSettings::default(),
            _lexical_dir: lexical_dir,
        }
    }

    /// Build a query pipeline wired to this service's stores and the given
    /// generator
    pub fn query_pipeline(&self, generator: Arc<dyn Generator>) -> QueryPipeline {
        QueryPipeline::new(
            self.store.clone() as Arc<dyn MetadataStore>,
            Arc::clone(&self.lexical),
            Arc::new(StubEmbedder),
            Arc::new(StubReranker),
            generator,
            self.retrieval.clone(),
            &GeneratorSettings::default(),
        )
    }

    /// Mirror the upload handler: hash, dedupe, blob write, metadata row.
    /// Returns the document id and whether it was newly created.
    pub async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> (Uuid, bool) {
        let content_hash = format!("{:x}", Sha256::digest(bytes));
        if let Some(existing) = self
            .store
            .find_by_tenant_and_hash("default", &content_hash)
            .await
            .unwrap()
        {
            return (existing.id, false);
        }

        let key = document_key(filename);
        self.blobs
            .put("documents", &key, bytes, content_type)
            .await
            .unwrap();

        let document = Document {
            id: Uuid::new_v4(),
            tenant_tag: "default".to_string(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            blob_bucket: "documents".to_string(),
            blob_key: key,
            content_hash,
            status: DocumentStatus::Uploaded,
            created_at: Utc::now(),
        };
        self.store.insert_document(&document).await.unwrap();
        (document.id, true)
    }

    /// Upload and run ingestion to completion
    pub async fn upload_and_ingest(
        &self,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Uuid {
        let (id, created) = self.upload(filename, content_type, bytes).await;
        if created {
            self.ingestion.ingest(id).await;
        }
        id
    }

    pub async fn status(&self, id: Uuid) -> DocumentStatus {
        self.store.get_document(id).await.unwrap().unwrap().status
    }
}
