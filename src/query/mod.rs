//! Retrieval-augmented query pipeline.
//!
//! Admits a query through the rate limiter, retrieves grounding chunks, asks the
//! generation provider for an answer, and logs the terminal record. A generation
//! failure degrades the answer instead of failing the query; the caller always
//! gets a well-formed result envelope.

pub mod history;
pub mod prompt;

use crate::embedding::EmbeddingGateway;
use crate::generation::GenerationClient;
use crate::metrics::PipelineMetrics;
use crate::model::{
    QueryKind, QueryRecord, SourceRef, TokenUsage, ValidationError, MAX_QUERY_CHARS,
    MAX_RESULTS_RANGE,
};
use crate::ratelimit::{RateLimitDecision, RateLimiter};
use crate::search::{SearchMatch, SimilaritySearch};
use crate::store::records::RecordRepository;
use crate::store::StoreError;
use std::sync::Arc;
use thiserror::Error;

const TEMPERATURE: f32 = 0.1;
const DEFAULT_MAX_RESULTS: usize = 5;
const EXCERPT_CHARS: usize = 200;

/// Text returned when the generation provider is unavailable.
const DEGRADED_ANSWER: &str =
    "I apologize, but I am unable to generate a response right now. Please try again later.";

/// Errors that reject a query before any answer is attempted.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The user exceeded a rate limit window.
    #[error("rate limit exceeded: {0} of {1} queries this hour")]
    RateLimited(usize, usize),
    /// The request failed input validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The query record could not be admitted.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A validated query request.
#[derive(Clone, Debug)]
pub struct QueryRequest {
    /// Requesting user.
    pub user_id: String,
    /// Natural-language question.
    pub query_text: String,
    /// Prompting kind.
    pub kind: QueryKind,
    /// Retrieval breadth override, `1..=20`.
    pub max_results: Option<usize>,
    /// Similarity threshold override, `[0, 1]`.
    pub threshold: Option<f32>,
}

/// The completed record plus whether the answer was degraded.
#[derive(Clone, Debug)]
pub struct QueryOutcome {
    /// Terminal query record, always `completed`.
    pub record: QueryRecord,
    /// True when the generation provider failed and a stock answer was used.
    pub degraded: bool,
    /// Rate limit counts observed at admission.
    pub rate_limit: RateLimitDecision,
}

/// Tunables for the query pipeline.
#[derive(Clone, Copy, Debug)]
pub struct QuerySettings {
    /// Similarity threshold applied when the request has no override.
    pub default_threshold: f32,
    /// Chunks included in the generation context.
    pub max_context_sources: usize,
    /// Token ceiling for generated answers.
    pub max_response_tokens: u32,
}

/// Orchestrator for the query pipeline.
pub struct QueryService {
    limiter: RateLimiter,
    records: Arc<RecordRepository>,
    embeddings: Arc<EmbeddingGateway>,
    search: Arc<dyn SimilaritySearch>,
    generation: Arc<dyn GenerationClient>,
    metrics: Arc<PipelineMetrics>,
    settings: QuerySettings,
}

impl QueryService {
    /// Assemble the service from its collaborators.
    pub fn new(
        limiter: RateLimiter,
        records: Arc<RecordRepository>,
        embeddings: Arc<EmbeddingGateway>,
        search: Arc<dyn SimilaritySearch>,
        generation: Arc<dyn GenerationClient>,
        metrics: Arc<PipelineMetrics>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            limiter,
            records,
            embeddings,
            search,
            generation,
            metrics,
            settings,
        }
    }

    fn validate(&self, request: &QueryRequest) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        let text = request.query_text.trim();
        if text.is_empty() {
            errors.push("Query text is required".to_string());
        } else if text.chars().count() > MAX_QUERY_CHARS {
            errors.push(format!("Query too long (max {MAX_QUERY_CHARS} characters)"));
        }
        if let Some(max_results) = request.max_results {
            if !MAX_RESULTS_RANGE.contains(&max_results) {
                errors.push(format!(
                    "maxResults must be between {} and {}",
                    MAX_RESULTS_RANGE.start(),
                    MAX_RESULTS_RANGE.end()
                ));
            }
        }
        if let Some(threshold) = request.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                errors.push("threshold must be between 0 and 1".to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(errors))
        }
    }

    /// Answer a query end to end, returning the terminal record.
    pub async fn answer(&self, request: QueryRequest) -> Result<QueryOutcome, QueryError> {
        let decision = self.limiter.check(&request.user_id).await;
        if !decision.allowed {
            tracing::info!(
                user_id = %request.user_id,
                hourly = decision.hourly_count,
                daily = decision.daily_count,
                "Query rejected by rate limit"
            );
            return Err(QueryError::RateLimited(
                decision.hourly_count,
                decision.hourly_limit,
            ));
        }
        self.validate(&request)?;

        let mut record =
            QueryRecord::pending(&request.user_id, request.query_text.trim(), request.kind);
        self.records.insert_query_record(&record).await?;

        let embedding = self.embeddings.embed(&record.query_text).await;
        if embedding.degraded {
            // A zero query vector scores 0 against everything; retrieval will
            // come back empty and the answer is grounded on nothing.
            tracing::warn!(query_id = %record.query_id, "Query embedding degraded");
        }

        let top_k = request.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        let threshold = request
            .threshold
            .unwrap_or(self.settings.default_threshold);
        let matches = match self.search.search(&embedding.vector, top_k, threshold).await {
            Ok(matches) => matches,
            Err(error) => {
                tracing::error!(query_id = %record.query_id, error = %error, "Retrieval failed");
                Vec::new()
            }
        };

        let context = prompt::compose_context(&matches, self.settings.max_context_sources);
        let full_prompt = prompt::build_prompt(record.kind, &context, &record.query_text);

        // Generation is billed per attempt, so a failure is absorbed into a
        // degraded answer rather than retried.
        let (response_text, sources, confidence, usage, degraded) = match self
            .generation
            .generate(&full_prompt, self.settings.max_response_tokens, TEMPERATURE)
            .await
        {
            Ok(output) => {
                let sources = source_refs(&matches, self.settings.max_context_sources);
                let confidence = confidence_score(&matches);
                (output.text, sources, confidence, output.usage, false)
            }
            Err(error) => {
                tracing::warn!(query_id = %record.query_id, error = %error, "Generation failed");
                (
                    DEGRADED_ANSWER.to_string(),
                    Vec::new(),
                    0.0,
                    TokenUsage::zero(),
                    true,
                )
            }
        };

        record.complete(response_text, sources, confidence, usage);
        if let Err(error) = self.records.finalize_query_record(&record).await {
            // The caller still gets the answer; only the log entry is lost.
            tracing::error!(query_id = %record.query_id, error = %error, "Could not log query");
        }
        self.metrics.record_query();
        tracing::info!(
            query_id = %record.query_id,
            sources = record.sources.len(),
            confidence = record.confidence_score,
            degraded,
            "Query answered"
        );
        Ok(QueryOutcome {
            record,
            degraded,
            rate_limit: decision,
        })
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}

fn source_refs(matches: &[SearchMatch], max_sources: usize) -> Vec<SourceRef> {
    matches
        .iter()
        .take(max_sources)
        .map(|hit| SourceRef {
            document_id: hit.document_id.clone(),
            document_name: hit.filename.clone(),
            category: hit.category.clone(),
            chunk_id: hit.chunk_id.clone(),
            relevance_score: hit.score,
            excerpt: excerpt(&hit.text),
        })
        .collect()
}

/// Confidence in the answer, derived from the retrieval scores.
///
/// The top three scores are weighted `1/(i+1)` and the weighted mean is scaled
/// down when fewer than three chunks matched. No matches means no confidence.
pub fn confidence_score(matches: &[SearchMatch]) -> f32 {
    if matches.is_empty() {
        return 0.0;
    }
    let top: Vec<f32> = matches.iter().take(3).map(|hit| hit.score).collect();
    let mut weighted = 0.0f32;
    let mut weight_sum = 0.0f32;
    for (index, score) in top.iter().enumerate() {
        let weight = 1.0 / (index as f32 + 1.0);
        weighted += score * weight;
        weight_sum += weight;
    }
    let mean = weighted / weight_sum;
    let scale = match top.len() {
        1 => 0.8,
        2 => 0.9,
        _ => 1.0,
    };
    (mean * scale).clamp(0.0, 1.0)
}
