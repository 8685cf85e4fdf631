//! BM25 lexical index over child-chunk text
//!
//! Backed by an embedded tantivy index on disk. Records are keyed by
//! `child_id` and upserted as delete-then-add; the text field is tokenized
//! for BM25 scoring while ids and filenames are stored raw for filtering.
//! Tantivy calls are blocking and run on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SearchError, ServiceError};
use crate::types::LexicalRecord;

/// Heap budget for the tantivy writer
const WRITER_MEMORY_BYTES: usize = 50_000_000;

/// One lexical search hit, best first
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub child_id: Uuid,
    pub parent_id: Uuid,
    pub doc_id: Uuid,
    pub filename: String,
    pub score: f32,
}

/// Trait for the lexical (BM25) index
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Idempotent index creation; called at startup
    async fn ensure_index(&self) -> Result<()>;

    /// Bulk upsert by `child_id`. Each record is atomic (delete-then-add),
    /// the batch as a whole is not transactional.
    async fn index_chunks(&self, records: Vec<LexicalRecord>) -> Result<()>;

    /// BM25 match on chunk text, optionally restricted to `doc_ids`, in
    /// descending relevance
    async fn search_keyword(
        &self,
        query: &str,
        size: usize,
        doc_ids: Option<&[Uuid]>,
    ) -> Result<Vec<KeywordHit>>;
}

#[derive(Debug, Clone, Copy)]
struct LexicalFields {
    child_id: Field,
    parent_id: Field,
    doc_id: Field,
    tenant_tag: Field,
    text: Field,
    page_start: Field,
    page_end: Field,
    filename: Field,
    chunk_hash: Field,
}

/// Embedded tantivy implementation of [`LexicalIndex`]
pub struct TantivyLexicalIndex {
    index: Index,
    writer: Arc<Mutex<IndexWriter>>,
    reader: IndexReader,
    fields: LexicalFields,
    path: PathBuf,
}

impl TantivyLexicalIndex {
    /// Open (or create) the index under `dir/index_name`
    pub fn open(dir: &Path, index_name: &str) -> Result<Self> {
        let path = dir.join(index_name);
        std::fs::create_dir_all(&path)?;

        let (schema, fields) = Self::build_schema();
        let directory = MmapDirectory::open(&path)
            .map_err(|e| SearchError::IndexUnavailable(e.to_string()))?;
        let index = Index::open_or_create(directory, schema)
            .map_err(|e| SearchError::IndexUnavailable(e.to_string()))?;

        let writer = index
            .writer(WRITER_MEMORY_BYTES)
            .map_err(|e| SearchError::IndexUnavailable(e.to_string()))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: tantivy::TantivyError| SearchError::IndexUnavailable(e.to_string()))?;

        info!("Lexical index open at {}", path.display());

        Ok(Self {
            index,
            writer: Arc::new(Mutex::new(writer)),
            reader,
            fields,
            path,
        })
    }

    fn build_schema() -> (Schema, LexicalFields) {
        let mut builder = Schema::builder();
        let fields = LexicalFields {
            child_id: builder.add_text_field("child_id", STRING | STORED),
            parent_id: builder.add_text_field("parent_id", STRING | STORED),
            doc_id: builder.add_text_field("doc_id", STRING | STORED),
            tenant_tag: builder.add_text_field("tenant_tag", STRING | STORED),
            text: builder.add_text_field("text", TEXT | STORED),
            page_start: builder.add_u64_field("page_start", STORED),
            page_end: builder.add_u64_field("page_end", STORED),
            filename: builder.add_text_field("filename", STRING | STORED),
            chunk_hash: builder.add_text_field("chunk_hash", STRING | STORED),
        };
        (builder.build(), fields)
    }

    /// Path the index lives at
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_uuid(doc: &TantivyDocument, field: Field) -> Option<Uuid> {
        doc.get_first(field)
            .and_then(|value| value.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[async_trait]
impl LexicalIndex for TantivyLexicalIndex {
    async fn ensure_index(&self) -> Result<()> {
        // Creation happened in `open`; make the existing segments visible
        self.reader
            .reload()
            .map_err(|e| SearchError::IndexUnavailable(e.to_string()))?;
        debug!(
            "Lexical index ready with {} documents",
            self.reader.searcher().num_docs()
        );
        Ok(())
    }

    async fn index_chunks(&self, records: Vec<LexicalRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let writer = Arc::clone(&self.writer);
        let reader = self.reader.clone();
        let fields = self.fields;
        let count = records.len();

        tokio::task::spawn_blocking(move || -> std::result::Result<(), SearchError> {
            let mut writer = writer
                .lock()
                .map_err(|e| SearchError::IndexingFailed(format!("Writer lock poisoned: {}", e)))?;

            let mut result = Ok(());
            for record in &records {
                let child_id = record.child_id.to_string();
                writer.delete_term(Term::from_field_text(fields.child_id, &child_id));

                let add = writer.add_document(doc!(
                    fields.child_id => child_id,
                    fields.parent_id => record.parent_id.to_string(),
                    fields.doc_id => record.doc_id.to_string(),
                    fields.tenant_tag => record.tenant_tag.clone(),
                    fields.text => record.text.clone(),
                    fields.page_start => record.page_start as u64,
                    fields.page_end => record.page_end as u64,
                    fields.filename => record.filename.clone(),
                    fields.chunk_hash => record.chunk_hash.clone(),
                ));
                if let Err(e) = add {
                    result = Err(SearchError::IndexingFailed(e.to_string()));
                    break;
                }
            }

            if result.is_err() {
                // Abandon the half-built batch; committed state is untouched
                let _ = writer.rollback();
                return result;
            }

            writer
                .commit()
                .map_err(|e| SearchError::IndexingFailed(e.to_string()))?;
            reader
                .reload()
                .map_err(|e| SearchError::IndexingFailed(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| ServiceError::Search(SearchError::IndexingFailed(e.to_string())))??;

        debug!("Indexed {} lexical records", count);
        Ok(())
    }

    async fn search_keyword(
        &self,
        query: &str,
        size: usize,
        doc_ids: Option<&[Uuid]>,
    ) -> Result<Vec<KeywordHit>> {
        if size == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let reader = self.reader.clone();
        let index = self.index.clone();
        let fields = self.fields;
        let query = query.to_string();
        let doc_ids: Option<Vec<Uuid>> = doc_ids.map(|ids| ids.to_vec());

        let hits = tokio::task::spawn_blocking(
            move || -> std::result::Result<Vec<KeywordHit>, SearchError> {
                let searcher = reader.searcher();
                let parser = QueryParser::for_index(&index, vec![fields.text]);
                // Lenient parsing: user questions are not tantivy query syntax
                let (text_query, _errors) = parser.parse_query_lenient(&query);

                let final_query: Box<dyn Query> = match doc_ids {
                    Some(ids) if !ids.is_empty() => {
                        let id_clauses: Vec<(Occur, Box<dyn Query>)> = ids
                            .iter()
                            .map(|id| {
                                let term =
                                    Term::from_field_text(fields.doc_id, &id.to_string());
                                (
                                    Occur::Should,
                                    Box::new(TermQuery::new(term, IndexRecordOption::Basic))
                                        as Box<dyn Query>,
                                )
                            })
                            .collect();
                        Box::new(BooleanQuery::new(vec![
                            (Occur::Must, text_query),
                            (Occur::Must, Box::new(BooleanQuery::new(id_clauses))),
                        ]))
                    }
                    _ => text_query,
                };

                let top_docs = searcher
                    .search(&final_query, &TopDocs::with_limit(size))
                    .map_err(|e| SearchError::QueryFailed(e.to_string()))?;

                let mut hits = Vec::with_capacity(top_docs.len());
                for (score, address) in top_docs {
                    let doc: TantivyDocument = searcher
                        .doc(address)
                        .map_err(|e| SearchError::QueryFailed(e.to_string()))?;

                    let Some(child_id) = Self::read_uuid(&doc, fields.child_id) else {
                        warn!("Skipping lexical hit with malformed child_id");
                        continue;
                    };
                    let Some(parent_id) = Self::read_uuid(&doc, fields.parent_id) else {
                        warn!("Skipping lexical hit with malformed parent_id");
                        continue;
                    };
                    let Some(doc_id) = Self::read_uuid(&doc, fields.doc_id) else {
                        warn!("Skipping lexical hit with malformed doc_id");
                        continue;
                    };
                    let filename = doc
                        .get_first(fields.filename)
                        .and_then(|value| value.as_str())
                        .unwrap_or_default()
                        .to_string();

                    hits.push(KeywordHit {
                        child_id,
                        parent_id,
                        doc_id,
                        filename,
                        score,
                    });
                }
                Ok(hits)
            },
        )
        .await
        .map_err(|e| ServiceError::Search(SearchError::QueryFailed(e.to_string())))??;

        Ok(hits)
    }
}
