//! REST API server for the document QA service
//!
//! Provides HTTP endpoints for:
//! - Document upload and status lookup
//! - Question answering with citations
//! - Health and OpenAPI metadata

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{LlmError, Result, ServiceError};
use crate::pipeline::ingest::IngestionQueue;
use crate::pipeline::QueryPipeline;
use crate::store::{document_key, BlobStore, MetadataStore};
use crate::types::{Citation, Document, DocumentStatus};

/// Maximum accepted upload size
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Document and chunk metadata
    pub store: Arc<dyn MetadataStore>,
    /// Raw file storage
    pub blobs: Arc<dyn BlobStore>,
    /// Bounded ingestion worker pool
    pub ingestion: Arc<IngestionQueue>,
    /// Hybrid retrieval + generation
    pub query: Arc<QueryPipeline>,
    /// Service configuration
    pub settings: Arc<Settings>,
}

/// Response to a document upload
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Document id (the existing id when the same bytes were seen before)
    pub id: Uuid,
}

/// Document status response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub filename: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

/// Request to answer a question
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct QueryRequest {
    /// The natural-language question
    #[schema(example = "What is the capital of France?")]
    pub question: String,
    /// Maximum citations to aim for
    #[serde(default = "default_top_k")]
    #[schema(example = 10)]
    pub top_k: usize,
    /// Optional restriction to these document ids
    #[serde(default)]
    pub document_ids: Option<Vec<Uuid>>,
}

fn default_top_k() -> usize {
    10
}

/// Answer with its source citations
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Custom error type for API responses
#[derive(Debug)]
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ServiceError::Validation(msg) | ServiceError::Config(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ServiceError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ServiceError::Llm(LlmError::ConnectionFailed(_)) | ServiceError::Llm(LlmError::Timeout) => {
                (StatusCode::BAD_GATEWAY, self.0.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
        };

        if status.is_server_error() {
            error!("Request failed ({}): {}", self.0.category(), self.0);
        }

        let body = Json(ErrorResponse {
            error: message.clone(),
            detail: Some(message),
        });

        (status, body).into_response()
    }
}

/// Convert Result<T> to Result<T, ApiError>
type ApiResult<T> = std::result::Result<T, ApiError>;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        upload_document_handler,
        get_document_handler,
        query_handler,
    ),
    components(
        schemas(
            UploadResponse,
            DocumentResponse,
            QueryRequest,
            QueryResponse,
            Citation,
            DocumentStatus,
            HealthResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "documents", description = "Document upload and status"),
        (name = "query", description = "Question answering")
    ),
    info(
        title = "Document QA API",
        version = "0.2.0",
        description = "Upload documents, then ask questions answered from their content with citations."
    )
)]
struct ApiDoc;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/documents/upload", post(upload_document_handler))
        .route("/documents/{id}", get(get_document_handler))
        .route("/query", post(query_handler))
        .route("/api-docs/openapi.json", get(openapi_spec_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Upload a document and enqueue its ingestion.
///
/// The response is sent once the blob and the metadata row are durable;
/// ingestion runs as a detached task and its failure is reported through the
/// document status, never through this endpoint.
#[utoipa::path(
    post,
    path = "/documents/upload",
    tag = "documents",
    responses(
        (status = 201, description = "Document accepted", body = UploadResponse),
        (status = 200, description = "Duplicate content, existing document returned", body = UploadResponse),
        (status = 400, description = "Missing file or filename", body = ErrorResponse)
    )
)]
async fn upload_document_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut upload: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Validation(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ServiceError::Validation("Uploaded file needs a filename".to_string()))?;
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServiceError::Validation(format!("Could not read upload: {}", e)))?;

        upload = Some((filename, content_type, bytes.to_vec()));
        break;
    }

    let Some((filename, content_type, bytes)) = upload else {
        return Err(ServiceError::Validation("Missing multipart field 'file'".to_string()).into());
    };

    let content_hash = format!("{:x}", Sha256::digest(&bytes));
    let tenant_tag = state.settings.tenant_tag.clone();

    // Duplicate upload: same bytes under the same tenant return the existing
    // document without re-ingesting
    if let Some(existing) = state
        .store
        .find_by_tenant_and_hash(&tenant_tag, &content_hash)
        .await?
    {
        info!("Duplicate upload of {} -> {}", filename, existing.id);
        return Ok((StatusCode::OK, Json(UploadResponse { id: existing.id })));
    }

    let bucket = state.settings.blob.bucket.clone();
    let key = document_key(&filename);
    state.blobs.put(&bucket, &key, &bytes, &content_type).await?;

    let document = Document {
        id: Uuid::new_v4(),
        tenant_tag,
        filename,
        content_type,
        blob_bucket: bucket,
        blob_key: key,
        content_hash,
        status: DocumentStatus::Uploaded,
        created_at: Utc::now(),
    };
    state.store.insert_document(&document).await?;

    // The upload is complete once blob + metadata are durable; ingestion is
    // best-effort through the bounded worker pool with a terminal status
    state.ingestion.enqueue(document.id);

    info!("Accepted document {} ({})", document.id, document.filename);
    Ok((StatusCode::CREATED, Json(UploadResponse { id: document.id })))
}

/// Fetch a document's status
#[utoipa::path(
    get,
    path = "/documents/{id}",
    tag = "documents",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Document found", body = DocumentResponse),
        (status = 404, description = "No such document", body = ErrorResponse)
    )
)]
async fn get_document_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DocumentResponse>> {
    let document = state
        .store
        .get_document(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("document {}", id)))?;

    Ok(Json(DocumentResponse {
        id: document.id,
        filename: document.filename,
        status: document.status,
        created_at: document.created_at,
    }))
}

/// Answer a question from the ingested corpus
#[utoipa::path(
    post,
    path = "/query",
    tag = "query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Answer with citations", body = QueryResponse),
        (status = 400, description = "Empty question", body = ErrorResponse),
        (status = 404, description = "No relevant chunks found", body = ErrorResponse)
    )
)]
async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    if request.question.trim().is_empty() {
        return Err(ServiceError::Validation("Question cannot be empty".to_string()).into());
    }

    let outcome = state
        .query
        .answer(&request.question, request.top_k, request.document_ids)
        .await?;

    // Citations are empty exactly when retrieval came back empty
    if outcome.citations.is_empty() {
        return Err(ServiceError::NotFound("No relevant chunks found".to_string()).into());
    }

    Ok(Json(QueryResponse {
        answer: outcome.answer,
        citations: outcome.citations,
    }))
}

/// Serve the OpenAPI specification
async fn openapi_spec_handler() -> Json<serde_json::Value> {
    Json(serde_json::to_value(ApiDoc::openapi()).unwrap_or_default())
}

/// Start the API server
pub async fn start_server(state: AppState, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    info!("Starting API server on {}", addr);

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServiceError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| ServiceError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
