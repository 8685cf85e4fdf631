//! Core domain types: documents, chunks, embeddings, citations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of an uploaded document.
///
/// Transitions are one-way: `Uploaded -> Processing -> (Ready | Failed)`.
/// `Ready` and `Failed` are terminal; a failed document is only re-ingested
/// through operator intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    /// Storage representation used in database rows and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "UPLOADED",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Ready => "READY",
            DocumentStatus::Failed => "FAILED",
        }
    }

    /// Parse the storage representation back into the enum.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UPLOADED" => Some(DocumentStatus::Uploaded),
            "PROCESSING" => Some(DocumentStatus::Processing),
            "READY" => Some(DocumentStatus::Ready),
            "FAILED" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition(&self, to: DocumentStatus) -> bool {
        matches!(
            (self, to),
            (DocumentStatus::Uploaded, DocumentStatus::Processing)
                | (DocumentStatus::Processing, DocumentStatus::Ready)
                | (DocumentStatus::Processing, DocumentStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Ready | DocumentStatus::Failed)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded document and its durable metadata.
///
/// `(tenant_tag, content_hash)` is unique: uploading the same bytes twice
/// under the same tenant returns the original row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub tenant_tag: String,
    pub filename: String,
    pub content_type: String,
    pub blob_bucket: String,
    pub blob_key: String,
    /// SHA-256 of the raw upload bytes, lowercase hex
    pub content_hash: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

/// One page of extracted text. Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

impl Page {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

/// Large text window used as generation context.
///
/// Character offsets are in the document-global coordinate space built by the
/// chunker (Unicode scalar offsets over page texts joined with `'\n'`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentChunk {
    pub id: Uuid,
    pub doc_id: Uuid,
    pub page_start: u32,
    pub page_end: u32,
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
    /// SHA-256 of `text`, lowercase hex
    pub chunk_hash: String,
}

/// Small retrieval-unit window. Belongs to exactly one parent of the same
/// document; offsets are document-global and lie inside the parent's range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildChunk {
    pub id: Uuid,
    pub doc_id: Uuid,
    pub parent_id: Uuid,
    pub page_start: u32,
    pub page_end: u32,
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
    pub chunk_hash: String,
}

/// Dense vector for one child chunk, upserted by `child_id` (newest wins).
#[derive(Debug, Clone)]
pub struct ChunkEmbedding {
    pub child_id: Uuid,
    pub vector: Vec<f32>,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
}

/// Denormalized record written to the lexical index, keyed by `child_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalRecord {
    pub child_id: Uuid,
    pub parent_id: Uuid,
    pub doc_id: Uuid,
    pub tenant_tag: String,
    pub text: String,
    pub page_start: u32,
    pub page_end: u32,
    pub filename: String,
    pub chunk_hash: String,
}

impl LexicalRecord {
    /// Build the index record for a child chunk of `document`.
    pub fn from_child(child: &ChildChunk, document: &Document) -> Self {
        Self {
            child_id: child.id,
            parent_id: child.parent_id,
            doc_id: child.doc_id,
            tenant_tag: document.tenant_tag.clone(),
            text: child.text.clone(),
            page_start: child.page_start,
            page_end: child.page_end,
            filename: document.filename.clone(),
            chunk_hash: child.chunk_hash.clone(),
        }
    }
}

/// A child chunk joined with the fields of its (READY) document that the
/// query pipeline needs downstream.
#[derive(Debug, Clone)]
pub struct ChildHit {
    pub chunk: ChildChunk,
    pub filename: String,
}

/// A parent chunk joined with its document fields.
#[derive(Debug, Clone)]
pub struct ParentHit {
    pub chunk: ParentChunk,
    pub filename: String,
}

/// Source reference attached to an answer. `chunk_id` is the parent chunk
/// whose window was offered to the generator.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Citation {
    pub document_id: Uuid,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,
    pub excerpt: String,
    pub chunk_id: Uuid,
}
