//! Durable document, chunk, and embedding metadata in Postgres
//!
//! The embedding column uses the pgvector extension, so approximate
//! nearest-neighbor search happens server-side in the same store that owns
//! the rows. Writes that must be observed together (parents + children of
//! one ingestion) share a transaction; `update_status` enforces the
//! one-way document state machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, ServiceError, StorageError};
use crate::types::{
    ChildChunk, ChildHit, ChunkEmbedding, Document, DocumentStatus, ParentChunk, ParentHit,
};

/// Trait for the metadata store
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Idempotent schema bootstrap; called at startup
    async fn ensure_schema(&self) -> Result<()>;

    async fn insert_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// Duplicate-upload lookup: `(tenant_tag, content_hash)` is unique
    async fn find_by_tenant_and_hash(&self, tenant_tag: &str, content_hash: &str)
        -> Result<Option<Document>>;

    /// Move a document along `UPLOADED -> PROCESSING -> (READY | FAILED)`.
    /// Illegal edges are rejected. Always runs on a fresh pooled connection,
    /// so it stays usable after a failed ingestion transaction.
    async fn update_status(&self, id: Uuid, status: DocumentStatus) -> Result<()>;

    /// Insert one ingestion's parent and child rows in a single transaction
    async fn insert_chunks(&self, parents: &[ParentChunk], children: &[ChildChunk]) -> Result<()>;

    /// Upsert embeddings by `child_id`; on conflict the newest vector wins
    async fn upsert_embeddings(&self, embeddings: &[ChunkEmbedding]) -> Result<()>;

    /// Nearest-neighbor child ids by ascending cosine distance, restricted to
    /// READY documents and (optionally) to `doc_ids`. Filtering and ordering
    /// happen server-side in one query.
    async fn vector_search(
        &self,
        query: &[f32],
        limit: usize,
        doc_ids: Option<&[Uuid]>,
    ) -> Result<Vec<Uuid>>;

    /// Load child chunks (of READY documents) joined with document fields,
    /// preserving the order of `ids`
    async fn get_children_with_documents(&self, ids: &[Uuid]) -> Result<Vec<ChildHit>>;

    /// Load parent chunks joined with document fields, preserving the order
    /// of `ids`
    async fn get_parents_with_documents(&self, ids: &[Uuid]) -> Result<Vec<ParentHit>>;

    /// `(parent_count, child_count)` for one document
    async fn count_chunks(&self, doc_id: Uuid) -> Result<(usize, usize)>;
}

/// Postgres implementation of [`MetadataStore`]
pub struct PgMetadataStore {
    pool: PgPool,
    dimension: usize,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    /// Connect a pool and wrap it
    pub async fn connect(url: &str, max_connections: u32, dimension: usize) -> Result<Self> {
        info!("Connecting metadata store");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool, dimension))
    }

    fn row_to_document(row: &PgRow) -> Result<Document> {
        let status_text: String = row.try_get("status")?;
        let status = DocumentStatus::parse(&status_text).ok_or_else(|| {
            StorageError::StorageFailed(format!("Unknown document status: {}", status_text))
        })?;

        Ok(Document {
            id: row.try_get("id")?,
            tenant_tag: row.try_get("tenant_tag")?,
            filename: row.try_get("filename")?,
            content_type: row.try_get("content_type")?,
            blob_bucket: row.try_get("blob_bucket")?,
            blob_key: row.try_get("blob_key")?,
            content_hash: row.try_get("content_hash")?,
            status,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }

    fn row_to_parent(row: &PgRow) -> Result<ParentChunk> {
        Ok(ParentChunk {
            id: row.try_get("id")?,
            doc_id: row.try_get("doc_id")?,
            page_start: row.try_get::<i32, _>("page_start")? as u32,
            page_end: row.try_get::<i32, _>("page_end")? as u32,
            char_start: row.try_get::<i64, _>("char_start")? as usize,
            char_end: row.try_get::<i64, _>("char_end")? as usize,
            text: row.try_get("text")?,
            chunk_hash: row.try_get("chunk_hash")?,
        })
    }

    fn row_to_child(row: &PgRow) -> Result<ChildChunk> {
        Ok(ChildChunk {
            id: row.try_get("id")?,
            doc_id: row.try_get("doc_id")?,
            parent_id: row.try_get("parent_id")?,
            page_start: row.try_get::<i32, _>("page_start")? as u32,
            page_end: row.try_get::<i32, _>("page_end")? as u32,
            char_start: row.try_get::<i64, _>("char_start")? as usize,
            char_end: row.try_get::<i64, _>("char_end")? as usize,
            text: row.try_get("text")?,
            chunk_hash: row.try_get("chunk_hash")?,
        })
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn ensure_schema(&self) -> Result<()> {
        info!("Ensuring metadata schema");

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id UUID PRIMARY KEY,
                tenant_tag TEXT NOT NULL,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                blob_bucket TEXT NOT NULL,
                blob_key TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_tenant_hash \
             ON documents (tenant_tag, content_hash)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS parent_chunks (
                id UUID PRIMARY KEY,
                doc_id UUID NOT NULL REFERENCES documents(id),
                page_start INT NOT NULL,
                page_end INT NOT NULL,
                char_start BIGINT NOT NULL,
                char_end BIGINT NOT NULL,
                text TEXT NOT NULL,
                chunk_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS child_chunks (
                id UUID PRIMARY KEY,
                doc_id UUID NOT NULL REFERENCES documents(id),
                parent_id UUID NOT NULL REFERENCES parent_chunks(id),
                page_start INT NOT NULL,
                page_end INT NOT NULL,
                char_start BIGINT NOT NULL,
                char_end BIGINT NOT NULL,
                text TEXT NOT NULL,
                chunk_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_child_chunks_doc ON child_chunks (doc_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS chunk_embeddings (
                child_id UUID PRIMARY KEY REFERENCES child_chunks(id),
                embedding vector({}) NOT NULL,
                model_name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            self.dimension
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunk_embeddings_ann \
             ON chunk_embeddings USING hnsw (embedding vector_cosine_ops)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, tenant_tag, filename, content_type, blob_bucket, blob_key,
                 content_hash, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(document.id)
        .bind(&document.tenant_tag)
        .bind(&document.filename)
        .bind(&document.content_type)
        .bind(&document.blob_bucket)
        .bind(&document.blob_key)
        .bind(&document.content_hash)
        .bind(document.status.as_str())
        .bind(document.created_at)
        .execute(&self.pool)
        .await?;

        debug!("Inserted document {}", document.id);
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn find_by_tenant_and_hash(
        &self,
        tenant_tag: &str,
        content_hash: &str,
    ) -> Result<Option<Document>> {
        let row =
            sqlx::query("SELECT * FROM documents WHERE tenant_tag = $1 AND content_hash = $2")
                .bind(tenant_tag)
                .bind(content_hash)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn update_status(&self, id: Uuid, status: DocumentStatus) -> Result<()> {
        let allowed_from: Vec<String> = [
            DocumentStatus::Uploaded,
            DocumentStatus::Processing,
            DocumentStatus::Ready,
            DocumentStatus::Failed,
        ]
        .iter()
        .filter(|from| from.can_transition(status))
        .map(|from| from.as_str().to_string())
        .collect();

        if allowed_from.is_empty() {
            return Err(StorageError::IllegalTransition {
                from: "*".to_string(),
                to: status.as_str().to_string(),
            }
            .into());
        }

        let result = sqlx::query("UPDATE documents SET status = $1 WHERE id = $2 AND status = ANY($3)")
            .bind(status.as_str())
            .bind(id)
            .bind(&allowed_from)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return match self.get_document(id).await? {
                Some(document) => Err(StorageError::IllegalTransition {
                    from: document.status.as_str().to_string(),
                    to: status.as_str().to_string(),
                }
                .into()),
                None => Err(ServiceError::NotFound(format!("document {}", id))),
            };
        }

        debug!("Document {} -> {}", id, status);
        Ok(())
    }

    async fn insert_chunks(&self, parents: &[ParentChunk], children: &[ChildChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for parent in parents {
            sqlx::query(
                r#"
                INSERT INTO parent_chunks
                    (id, doc_id, page_start, page_end, char_start, char_end, text, chunk_hash)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(parent.id)
            .bind(parent.doc_id)
            .bind(parent.page_start as i32)
            .bind(parent.page_end as i32)
            .bind(parent.char_start as i64)
            .bind(parent.char_end as i64)
            .bind(&parent.text)
            .bind(&parent.chunk_hash)
            .execute(&mut *tx)
            .await?;
        }

        for child in children {
            sqlx::query(
                r#"
                INSERT INTO child_chunks
                    (id, doc_id, parent_id, page_start, page_end, char_start, char_end,
                     text, chunk_hash)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(child.id)
            .bind(child.doc_id)
            .bind(child.parent_id)
            .bind(child.page_start as i32)
            .bind(child.page_end as i32)
            .bind(child.char_start as i64)
            .bind(child.char_end as i64)
            .bind(&child.text)
            .bind(&child.chunk_hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "Inserted {} parents and {} children",
            parents.len(),
            children.len()
        );
        Ok(())
    }

    async fn upsert_embeddings(&self, embeddings: &[ChunkEmbedding]) -> Result<()> {
        for embedding in embeddings {
            if embedding.vector.len() != self.dimension {
                return Err(StorageError::InvalidDimension {
                    expected: self.dimension,
                    actual: embedding.vector.len(),
                }
                .into());
            }
        }

        let mut tx = self.pool.begin().await?;
        for embedding in embeddings {
            sqlx::query(
                r#"
                INSERT INTO chunk_embeddings (child_id, embedding, model_name, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (child_id) DO UPDATE SET
                    embedding = EXCLUDED.embedding,
                    model_name = EXCLUDED.model_name,
                    created_at = EXCLUDED.created_at
                "#,
            )
            .bind(embedding.child_id)
            .bind(Vector::from(embedding.vector.clone()))
            .bind(&embedding.model_name)
            .bind(embedding.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Upserted {} embeddings", embeddings.len());
        Ok(())
    }

    async fn vector_search(
        &self,
        query: &[f32],
        limit: usize,
        doc_ids: Option<&[Uuid]>,
    ) -> Result<Vec<Uuid>> {
        if query.len() != self.dimension {
            return Err(StorageError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            }
            .into());
        }

        let doc_ids: Option<Vec<Uuid>> = doc_ids.map(|ids| ids.to_vec());
        let rows = sqlx::query(
            r#"
            SELECT ce.child_id
            FROM chunk_embeddings ce
            JOIN child_chunks cc ON cc.id = ce.child_id
            JOIN documents d ON d.id = cc.doc_id
            WHERE d.status = 'READY'
              AND ($2::uuid[] IS NULL OR cc.doc_id = ANY($2::uuid[]))
            ORDER BY ce.embedding <=> $1
            LIMIT $3
            "#,
        )
        .bind(Vector::from(query.to_vec()))
        .bind(doc_ids)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("child_id").map_err(Into::into))
            .collect()
    }

    async fn get_children_with_documents(&self, ids: &[Uuid]) -> Result<Vec<ChildHit>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT cc.*, d.filename
            FROM child_chunks cc
            JOIN documents d ON d.id = cc.doc_id
            WHERE cc.id = ANY($1) AND d.status = 'READY'
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_id: HashMap<Uuid, ChildHit> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let chunk = Self::row_to_child(row)?;
            let filename: String = row.try_get("filename")?;
            by_id.insert(chunk.id, ChildHit { chunk, filename });
        }

        // Hand results back in the caller's (fused) order
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn get_parents_with_documents(&self, ids: &[Uuid]) -> Result<Vec<ParentHit>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT pc.*, d.filename
            FROM parent_chunks pc
            JOIN documents d ON d.id = pc.doc_id
            WHERE pc.id = ANY($1) AND d.status = 'READY'
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_id: HashMap<Uuid, ParentHit> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let chunk = Self::row_to_parent(row)?;
            let filename: String = row.try_get("filename")?;
            by_id.insert(chunk.id, ParentHit { chunk, filename });
        }

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn count_chunks(&self, doc_id: Uuid) -> Result<(usize, usize)> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM parent_chunks WHERE doc_id = $1) AS parents,
                (SELECT COUNT(*) FROM child_chunks WHERE doc_id = $1) AS children
            "#,
        )
        .bind(doc_id)
        .fetch_one(&self.pool)
        .await?;

        let parents: i64 = row.try_get("parents")?;
        let children: i64 = row.try_get("children")?;
        Ok((parents as usize, children as usize))
    }
}
