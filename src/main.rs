use kbrag::analysis::{AnalysisService, AnalysisSettings};
use kbrag::api::{self, AppServices};
use kbrag::embedding::http::HttpEmbeddingClient;
use kbrag::embedding::EmbeddingGateway;
use kbrag::extract::PlainTextExtractor;
use kbrag::generation::http::HttpGenerationClient;
use kbrag::ingest::{IngestionPipeline, IngestionSettings};
use kbrag::metrics::PipelineMetrics;
use kbrag::query::history::QueryHistory;
use kbrag::query::{QueryService, QuerySettings};
use kbrag::ratelimit::RateLimiter;
use kbrag::search::LinearScanSearch;
use kbrag::store::chunks::ChunkStore;
use kbrag::store::fs::FsBlobStore;
use kbrag::store::memory::MemoryRecordStore;
use kbrag::store::records::RecordRepository;
use kbrag::store::BlobStore;
use kbrag::{config, logging};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    config::init_config();
    logging::init_tracing();
    let app = api::create_router(build_services().expect("Failed to assemble services"));

    let (listener, port) = bind_listener().await.expect("Failed to bind listener");
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.unwrap();
}

fn build_services() -> Result<Arc<AppServices>, kbrag::store::StoreError> {
    let config = config::get_config();
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.data_dir.clone())?);
    let records = Arc::new(RecordRepository::new(Arc::new(MemoryRecordStore::new())));
    let metrics = Arc::new(PipelineMetrics::new());

    let embeddings = Arc::new(EmbeddingGateway::new(
        Arc::new(HttpEmbeddingClient::new(
            &config.embedding_url,
            &config.embedding_model,
            config.embedding_api_key.clone(),
        )),
        config.embedding_dimension,
    ));
    let generation = Arc::new(HttpGenerationClient::new(
        &config.generation_url,
        &config.generation_model,
        config.generation_api_key.clone(),
    ));
    let search = Arc::new(LinearScanSearch::new(ChunkStore::new(blobs.clone())));

    let ingestion = Arc::new(IngestionPipeline::new(
        blobs.clone(),
        ChunkStore::new(blobs.clone()),
        records.clone(),
        embeddings.clone(),
        Arc::new(PlainTextExtractor),
        metrics.clone(),
        IngestionSettings {
            chunk_max_size: config.chunk_max_size,
            chunk_overlap: config.chunk_overlap,
            dimension: config.embedding_dimension,
            max_document_bytes: config.max_document_bytes,
        },
    ));
    let query = Arc::new(QueryService::new(
        RateLimiter::new(
            records.clone(),
            config.hourly_query_limit,
            config.daily_query_limit,
        ),
        records.clone(),
        embeddings.clone(),
        search.clone(),
        generation.clone(),
        metrics.clone(),
        QuerySettings {
            default_threshold: config.default_similarity_threshold,
            max_context_sources: config.max_context_sources,
            max_response_tokens: config.max_response_tokens,
        },
    ));
    let analysis = Arc::new(AnalysisService::new(
        blobs,
        records.clone(),
        embeddings,
        search,
        generation,
        Arc::new(PlainTextExtractor),
        metrics.clone(),
        AnalysisSettings {
            chunk_max_size: config.chunk_max_size,
            chunk_overlap: config.chunk_overlap,
            similarity_threshold: config.default_similarity_threshold,
            max_analysis_tokens: config.max_analysis_tokens,
        },
    ));

    Ok(Arc::new(AppServices {
        ingestion,
        query,
        history: Arc::new(QueryHistory::new(records.clone())),
        analysis,
        records,
        metrics,
    }))
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
