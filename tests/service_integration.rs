//! End-to-end pipeline tests over in-memory backends.
//!
//! Exercises ingestion, retrieval-grounded querying, rate limiting, and analysis
//! through the assembled services, with scripted embedding and generation
//! providers standing in for the HTTP gateways.

use async_trait::async_trait;
use kbrag::analysis::{upload_key, AnalysisService, AnalysisSettings};
use kbrag::embedding::{EmbeddingClient, EmbeddingError, EmbeddingGateway};
use kbrag::extract::PlainTextExtractor;
use kbrag::generation::{GenerationClient, GenerationError, GenerationOutput};
use kbrag::ingest::{IngestionPipeline, IngestionSettings};
use kbrag::metrics::PipelineMetrics;
use kbrag::model::{
    AnalysisKind, DocumentCategory, DocumentUpload, QueryKind, Status, TokenUsage,
};
use kbrag::query::{QueryError, QueryRequest, QueryService, QuerySettings};
use kbrag::ratelimit::RateLimiter;
use kbrag::search::LinearScanSearch;
use kbrag::store::chunks::ChunkStore;
use kbrag::store::memory::{MemoryBlobStore, MemoryRecordStore};
use kbrag::store::records::RecordRepository;
use kbrag::store::BlobStore;
use serde_json::Map;
use std::sync::Arc;

/// Embeds text onto one of two axes so retrieval is deterministic: anything
/// mentioning badges lands on the first axis, everything else on the second.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingClient for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.to_lowercase().contains("badge") {
            Ok(vec![1.0, 0.0])
        } else {
            Ok(vec![0.0, 1.0])
        }
    }
}

struct ScriptedGeneration {
    fail: bool,
    text: &'static str,
}

#[async_trait]
impl GenerationClient for ScriptedGeneration {
    async fn generate(
        &self,
        _prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<GenerationOutput, GenerationError> {
        if self.fail {
            Err(GenerationError::Status(503))
        } else {
            Ok(GenerationOutput {
                text: self.text.to_string(),
                usage: TokenUsage {
                    input_tokens: 20,
                    output_tokens: 10,
                },
            })
        }
    }
}

struct Services {
    blobs: Arc<MemoryBlobStore>,
    records: Arc<RecordRepository>,
    ingestion: Arc<IngestionPipeline>,
    query: QueryService,
    analysis: AnalysisService,
    metrics: Arc<PipelineMetrics>,
}

fn build(generation_fails: bool, hourly_limit: usize) -> Services {
    let blobs = Arc::new(MemoryBlobStore::new());
    let records = Arc::new(RecordRepository::new(Arc::new(MemoryRecordStore::new())));
    let metrics = Arc::new(PipelineMetrics::new());
    let embeddings = Arc::new(EmbeddingGateway::new(Arc::new(KeywordEmbedder), 2));
    let generation: Arc<dyn GenerationClient> = Arc::new(ScriptedGeneration {
        fail: generation_fails,
        text: "Badges must be worn at all times.",
    });
    let search = Arc::new(LinearScanSearch::new(ChunkStore::new(blobs.clone())));

    let ingestion = Arc::new(IngestionPipeline::new(
        blobs.clone(),
        ChunkStore::new(blobs.clone()),
        records.clone(),
        embeddings.clone(),
        Arc::new(PlainTextExtractor),
        metrics.clone(),
        IngestionSettings {
            chunk_max_size: 200,
            chunk_overlap: 40,
            dimension: 2,
            max_document_bytes: 4096,
        },
    ));
    let query = QueryService::new(
        RateLimiter::new(records.clone(), hourly_limit, 500),
        records.clone(),
        embeddings.clone(),
        search.clone(),
        generation.clone(),
        metrics.clone(),
        QuerySettings {
            default_threshold: 0.5,
            max_context_sources: 5,
            max_response_tokens: 1500,
        },
    );
    let analysis = AnalysisService::new(
        blobs.clone(),
        records.clone(),
        embeddings,
        search,
        generation,
        Arc::new(PlainTextExtractor),
        metrics.clone(),
        AnalysisSettings {
            chunk_max_size: 200,
            chunk_overlap: 40,
            similarity_threshold: 0.5,
            max_analysis_tokens: 2000,
        },
    );
    Services {
        blobs,
        records,
        ingestion,
        query,
        analysis,
        metrics,
    }
}

async fn ingest_policy(services: &Services, key: &str, body: &str) -> String {
    services.blobs.put(key, body.as_bytes().to_vec()).await.unwrap();
    let document = services
        .ingestion
        .register(DocumentUpload {
            filename: "badge-policy.txt".into(),
            content_type: "text/plain".into(),
            size: body.len() as u64,
            category: DocumentCategory::Policies,
            storage_key: key.into(),
            metadata: Map::new(),
        })
        .await
        .unwrap();
    services.ingestion.run(&document.id, None).await;
    document.id
}

fn request(text: &str) -> QueryRequest {
    QueryRequest {
        user_id: "user-1".into(),
        query_text: text.into(),
        kind: QueryKind::Policy,
        max_results: None,
        threshold: None,
    }
}

#[tokio::test]
async fn ingest_then_query_grounds_the_answer() {
    let services = build(false, 100);
    let document_id = ingest_policy(
        &services,
        "kb/badge-policy.txt",
        "Visitor badge policy. Badges must be displayed at all times on site.",
    )
    .await;

    let stored = services
        .records
        .get_document(&document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, Status::Completed);

    let outcome = services
        .query
        .answer(request("Do visitors need a badge?"))
        .await
        .unwrap();
    assert!(!outcome.degraded);
    assert_eq!(outcome.record.status, Status::Completed);
    assert!(!outcome.record.sources.is_empty());
    assert_eq!(outcome.record.sources[0].document_id, document_id);
    assert_eq!(outcome.record.sources[0].document_name, "badge-policy.txt");
    assert!(outcome.record.confidence_score > 0.0);
    assert_eq!(outcome.record.token_usage.total(), 30);

    let snapshot = services.metrics.snapshot();
    assert_eq!(snapshot.documents_ingested, 1);
    assert_eq!(snapshot.queries_processed, 1);
}

#[tokio::test]
async fn query_against_empty_knowledge_base_succeeds_without_sources() {
    let services = build(false, 100);
    let outcome = services
        .query
        .answer(request("Do visitors need a badge?"))
        .await
        .unwrap();
    assert_eq!(outcome.record.status, Status::Completed);
    assert!(outcome.record.sources.is_empty());
    assert_eq!(outcome.record.confidence_score, 0.0);
    assert!(outcome.record.response_text.is_some());
}

#[tokio::test]
async fn unrelated_query_retrieves_nothing() {
    let services = build(false, 100);
    ingest_policy(
        &services,
        "kb/badge-policy.txt",
        "Visitor badge policy. Badges must be displayed at all times.",
    )
    .await;

    let outcome = services
        .query
        .answer(request("What is the lunch menu?"))
        .await
        .unwrap();
    // Query embeds onto the other axis, so nothing clears the threshold.
    assert!(outcome.record.sources.is_empty());
    assert_eq!(outcome.record.confidence_score, 0.0);
}

#[tokio::test]
async fn generation_outage_degrades_the_answer_but_not_the_request() {
    let services = build(true, 100);
    ingest_policy(
        &services,
        "kb/badge-policy.txt",
        "Visitor badge policy. Badges must be displayed.",
    )
    .await;

    let outcome = services
        .query
        .answer(request("Do visitors need a badge?"))
        .await
        .unwrap();
    assert!(outcome.degraded);
    assert_eq!(outcome.record.status, Status::Completed);
    assert!(outcome.record.sources.is_empty());
    assert_eq!(outcome.record.token_usage, TokenUsage::zero());
}

#[tokio::test]
async fn rate_limit_blocks_after_the_hourly_ceiling() {
    let services = build(false, 2);
    for _ in 0..2 {
        services.query.answer(request("badge?")).await.unwrap();
    }
    let rejected = services.query.answer(request("badge?")).await;
    assert!(matches!(rejected, Err(QueryError::RateLimited(2, 2))));

    // Other users are unaffected.
    let mut other = request("badge?");
    other.user_id = "user-2".into();
    assert!(services.query.answer(other).await.is_ok());
}

#[tokio::test]
async fn analysis_grounds_on_ingested_policies() {
    let services = build(false, 100);
    ingest_policy(
        &services,
        "kb/badge-policy.txt",
        "Visitor badge policy. Badges must be displayed at all times.",
    )
    .await;

    services
        .blobs
        .put(
            &upload_key("doc-7", "visitor-plan.txt"),
            b"Our visitors will receive a badge at the front desk.".to_vec(),
        )
        .await
        .unwrap();
    let record = services
        .analysis
        .start("user-1", "doc-7", "visitor-plan.txt", AnalysisKind::Compliance)
        .await
        .unwrap();
    services.analysis.run(record.clone(), None).await;

    let stored = services
        .records
        .get_analysis("user-1", &record.analysis_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, Status::Completed);
    // Scripted generation output is not JSON, so the fixed fallback applies.
    let report = stored.report.unwrap();
    assert_eq!(report.overall_score, 0.5);
    assert_eq!(services.metrics.snapshot().analyses_completed, 1);
}
