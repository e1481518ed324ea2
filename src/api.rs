//! HTTP surface for the knowledge base service.
//!
//! This module exposes an Axum router over the three pipelines:
//!
//! - `POST /documents` – Register an uploaded document and start ingestion in the
//!   background. Returns `202` with the document id.
//! - `GET /documents/{id}` / `GET /documents` / `DELETE /documents/{id}` – Inspect,
//!   list (optionally by category), and remove knowledge base documents.
//! - `POST /query` – Answer a natural-language question grounded on the knowledge
//!   base. Requires the `x-user-id` header.
//! - `GET /query/history` / `GET /query/statistics` – Per-user query log and
//!   usage aggregates.
//! - `GET /query/{id}` / `DELETE /query/{id}` – Inspect and remove a single
//!   query record.
//! - `POST /analyses` / `GET /analyses` / `GET /analyses/{id}` /
//!   `DELETE /analyses/{id}` – Start, list, inspect, and remove document
//!   compliance analyses.
//! - `GET /metrics` – Pipeline counters for observability dashboards.
//!
//! Upstream provider errors never leak through this surface; callers see either
//! a well-formed result envelope or a generic error status.

use crate::analysis::{AnalysisError, AnalysisService};
use crate::deadline::Deadline;
use crate::ingest::{IngestError, IngestionPipeline};
use crate::metrics::PipelineMetrics;
use crate::model::{
    AnalysisKind, AnalysisRecord, Document, DocumentCategory, DocumentUpload, QueryKind, SourceRef,
    Status, TokenUsage, ValidationError,
};
use crate::query::history::QueryHistory;
use crate::query::{QueryError, QueryRequest, QueryService};
use crate::store::records::RecordRepository;
use crate::store::StoreError;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const PIPELINE_BUDGET: Duration = Duration::from_secs(300);
const DEFAULT_PAGE_SIZE: usize = 50;

/// Shared state behind every handler.
pub struct AppServices {
    /// Document ingestion pipeline.
    pub ingestion: Arc<IngestionPipeline>,
    /// Query pipeline.
    pub query: Arc<QueryService>,
    /// Query history and statistics reader.
    pub history: Arc<QueryHistory>,
    /// Document analysis pipeline.
    pub analysis: Arc<AnalysisService>,
    /// Typed record repository, used by the read-only document routes.
    pub records: Arc<RecordRepository>,
    /// Pipeline counters.
    pub metrics: Arc<PipelineMetrics>,
}

/// Build the HTTP router over the assembled services.
pub fn create_router(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/documents", post(register_document).get(list_documents))
        .route(
            "/documents/:id",
            get(get_document).delete(delete_document),
        )
        .route("/query", post(run_query))
        .route("/query/history", get(query_history))
        .route("/query/statistics", get(query_statistics))
        .route("/query/:id", get(get_query).delete(delete_query))
        .route("/analyses", post(start_analysis).get(list_analyses))
        .route("/analyses/:id", get(get_analysis).delete(delete_analysis))
        .route("/metrics", get(get_metrics))
        .with_state(services)
}

fn user_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::Validation(ValidationError::single("x-user-id header is required"))
        })
}

/// Request body for `POST /documents`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterDocumentRequest {
    filename: String,
    content_type: String,
    size: u64,
    category: String,
    storage_key: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

/// Accepted response for `POST /documents`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterDocumentResponse {
    document_id: String,
    status: Status,
}

async fn register_document(
    State(services): State<Arc<AppServices>>,
    Json(request): Json<RegisterDocumentRequest>,
) -> Result<Response, AppError> {
    let category: DocumentCategory = request.category.parse().map_err(AppError::Validation)?;
    let upload = DocumentUpload {
        filename: request.filename,
        content_type: request.content_type,
        size: request.size,
        category,
        storage_key: request.storage_key,
        metadata: request.metadata,
    };
    let document = services.ingestion.register(upload).await?;

    let pipeline = services.ingestion.clone();
    let document_id = document.id.clone();
    tokio::spawn(async move {
        pipeline
            .run(&document_id, Some(Deadline::after(PIPELINE_BUDGET)))
            .await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(RegisterDocumentResponse {
            document_id: document.id,
            status: document.status,
        }),
    )
        .into_response())
}

async fn get_document(
    State(services): State<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    services
        .records
        .get_document(&id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

#[derive(Deserialize)]
struct ListDocumentsParams {
    category: Option<String>,
    limit: Option<usize>,
    cursor: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    documents: Vec<Document>,
    next_cursor: Option<String>,
}

async fn list_documents(
    State(services): State<Arc<AppServices>>,
    Query(params): Query<ListDocumentsParams>,
) -> Result<Json<ListDocumentsResponse>, AppError> {
    let category = params
        .category
        .as_deref()
        .map(str::parse::<DocumentCategory>)
        .transpose()
        .map_err(AppError::Validation)?;
    let page = services
        .records
        .list_documents(
            category,
            params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            params.cursor.as_deref(),
        )
        .await?;
    Ok(Json(ListDocumentsResponse {
        documents: page.items,
        next_cursor: page.next_cursor,
    }))
}

async fn delete_document(
    State(services): State<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if services.records.get_document(&id).await?.is_none() {
        return Err(AppError::NotFound);
    }
    services.ingestion.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Request body for `POST /query`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunQueryRequest {
    query_text: String,
    #[serde(default)]
    kind: QueryKind,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    threshold: Option<f32>,
}

/// Result envelope for `POST /query`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunQueryResponse {
    query_id: String,
    response: String,
    sources: Vec<SourceRef>,
    confidence_score: f32,
    token_usage: TokenUsage,
    degraded: bool,
}

async fn run_query(
    State(services): State<Arc<AppServices>>,
    headers: HeaderMap,
    Json(request): Json<RunQueryRequest>,
) -> Result<Json<RunQueryResponse>, AppError> {
    let user_id = user_id(&headers)?;
    let outcome = services
        .query
        .answer(QueryRequest {
            user_id,
            query_text: request.query_text,
            kind: request.kind,
            max_results: request.max_results,
            threshold: request.threshold,
        })
        .await?;
    let record = outcome.record;
    Ok(Json(RunQueryResponse {
        query_id: record.query_id,
        response: record.response_text.unwrap_or_default(),
        sources: record.sources,
        confidence_score: record.confidence_score,
        token_usage: record.token_usage,
        degraded: outcome.degraded,
    }))
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
    cursor: Option<String>,
}

async fn query_history(
    State(services): State<Arc<AppServices>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    let page = services
        .history
        .list(
            &user_id,
            params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            params.cursor.as_deref(),
        )
        .await?;
    Ok(Json(page).into_response())
}

#[derive(Deserialize)]
struct StatisticsParams {
    days: Option<u32>,
}

async fn query_statistics(
    State(services): State<Arc<AppServices>>,
    headers: HeaderMap,
    Query(params): Query<StatisticsParams>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    let statistics = services.history.statistics(&user_id, params.days).await?;
    Ok(Json(statistics).into_response())
}

async fn get_query(
    State(services): State<Arc<AppServices>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    services
        .records
        .get_query_record(&user_id, &id)
        .await?
        .map(|record| Json(record).into_response())
        .ok_or(AppError::NotFound)
}

async fn delete_query(
    State(services): State<Arc<AppServices>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user_id = user_id(&headers)?;
    if services
        .records
        .get_query_record(&user_id, &id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound);
    }
    services.records.delete_query_record(&user_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Request body for `POST /analyses`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartAnalysisRequest {
    document_id: String,
    filename: String,
    #[serde(default)]
    kind: AnalysisKind,
}

/// Accepted response for `POST /analyses`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartAnalysisResponse {
    analysis_id: String,
    status: Status,
}

async fn start_analysis(
    State(services): State<Arc<AppServices>>,
    headers: HeaderMap,
    Json(request): Json<StartAnalysisRequest>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    let record = services
        .analysis
        .start(&user_id, &request.document_id, &request.filename, request.kind)
        .await?;

    let analysis = services.analysis.clone();
    let spawned = record.clone();
    tokio::spawn(async move {
        analysis
            .run(spawned, Some(Deadline::after(PIPELINE_BUDGET)))
            .await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartAnalysisResponse {
            analysis_id: record.analysis_id,
            status: record.status,
        }),
    )
        .into_response())
}

async fn get_analysis(
    State(services): State<Arc<AppServices>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    services
        .records
        .get_analysis(&user_id, &id)
        .await?
        .map(|record| Json(record).into_response())
        .ok_or(AppError::NotFound)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListAnalysesResponse {
    analyses: Vec<AnalysisRecord>,
    next_cursor: Option<String>,
}

async fn list_analyses(
    State(services): State<Arc<AppServices>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<ListAnalysesResponse>, AppError> {
    let user_id = user_id(&headers)?;
    let page = services
        .records
        .list_analyses(
            &user_id,
            params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            params.cursor.as_deref(),
        )
        .await?;
    Ok(Json(ListAnalysesResponse {
        analyses: page.items,
        next_cursor: page.next_cursor,
    }))
}

async fn delete_analysis(
    State(services): State<Arc<AppServices>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user_id = user_id(&headers)?;
    if services
        .records
        .get_analysis(&user_id, &id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound);
    }
    services.records.delete_analysis(&user_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_metrics(State(services): State<Arc<AppServices>>) -> Response {
    Json(services.metrics.snapshot()).into_response()
}

/// Error surface shared by every handler.
enum AppError {
    Validation(ValidationError),
    RateLimited(usize, usize),
    NotFound,
    Storage,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(error) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "errors": error.messages })),
            )
                .into_response(),
            Self::RateLimited(count, limit) => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "rate limit exceeded",
                    "hourlyCount": count,
                    "hourlyLimit": limit,
                })),
            )
                .into_response(),
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not found" })),
            )
                .into_response(),
            Self::Storage => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        tracing::error!(error = %error, "Storage error in request handler");
        Self::Storage
    }
}

impl From<IngestError> for AppError {
    fn from(error: IngestError) -> Self {
        match error {
            IngestError::Validation(inner) => Self::Validation(inner),
            IngestError::Store(inner) => inner.into(),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::RateLimited(count, limit) => Self::RateLimited(count, limit),
            QueryError::Validation(inner) => Self::Validation(inner),
            QueryError::Store(inner) => inner.into(),
        }
    }
}

impl From<AnalysisError> for AppError {
    fn from(error: AnalysisError) -> Self {
        match error {
            AnalysisError::Validation(inner) => Self::Validation(inner),
            AnalysisError::Store(inner) => inner.into(),
        }
    }
}
