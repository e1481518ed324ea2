//! Typed records shared by the ingestion, query, and analysis pipelines.
//!
//! The source of truth for every persisted shape lives here. Records validate their
//! invariants at construction so the stores never see a half-formed document, chunk,
//! or history entry.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;

/// Content types the ingestion pipeline accepts. Binary formats are routed to the
/// text-extraction capability; anything else is rejected up front.
pub const SUPPORTED_CONTENT_TYPES: [&str; 4] = [
    "text/plain",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

/// Maximum accepted query text length in characters.
pub const MAX_QUERY_CHARS: usize = 5000;

/// Inclusive bounds for the `max_results` query parameter.
pub const MAX_RESULTS_RANGE: std::ops::RangeInclusive<usize> = 1..=20;

/// Input validation failure carrying one message per offending field.
#[derive(Debug, Error)]
#[error("validation failed: {}", self.messages.join("; "))]
pub struct ValidationError {
    /// Human-readable messages, one per field that failed validation.
    pub messages: Vec<String>,
}

impl ValidationError {
    /// Build a validation error from collected field messages.
    pub fn new(messages: Vec<String>) -> Self {
        Self { messages }
    }

    /// Convenience constructor for a single-field failure.
    pub fn single(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }
}

/// Lifecycle status shared by documents, query records, and analysis records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Registered but not yet picked up by a pipeline.
    Pending,
    /// A pipeline invocation is actively working on the record.
    Processing,
    /// Terminal success.
    Completed,
    /// Terminal failure; an error message is recorded alongside.
    Failed,
}

impl Status {
    /// Whether the status is one of the two terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stable string form used in store keys and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification tag applied to knowledge base documents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentCategory {
    /// Internal company policies.
    Policies,
    /// External regulatory texts.
    Regulations,
    /// Industry standards.
    Standards,
    /// Operational procedures.
    Procedures,
}

impl DocumentCategory {
    /// Stable string form used in store keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Policies => "policies",
            Self::Regulations => "regulations",
            Self::Standards => "standards",
            Self::Procedures => "procedures",
        }
    }
}

impl std::str::FromStr for DocumentCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "policies" => Ok(Self::Policies),
            "regulations" => Ok(Self::Regulations),
            "standards" => Ok(Self::Standards),
            "procedures" => Ok(Self::Procedures),
            other => Err(ValidationError::single(format!(
                "Invalid category: {other}"
            ))),
        }
    }
}

impl fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of natural-language query, steering the prompt instructions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// Broad question over the whole knowledge base.
    #[default]
    General,
    /// Question about internal policies.
    Policy,
    /// Question about regulatory requirements.
    Regulation,
    /// Question about compliance procedures and risk.
    Compliance,
}

impl QueryKind {
    /// Stable string form used in records and statistics buckets.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Policy => "policy",
            Self::Regulation => "regulation",
            Self::Compliance => "compliance",
        }
    }
}

/// Kind of document analysis requested by a user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// Full compliance review against the knowledge base.
    #[default]
    Compliance,
    /// Risk-focused review.
    Risk,
    /// Policy coverage matching only.
    PolicyMatch,
}

/// Token accounting reported by the generation provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u64,
    /// Tokens produced in the response.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Zero usage, reported for degraded results that never reached the provider.
    pub const fn zero() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Combined input and output token count.
    pub fn total(self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Upload-intent registration for a reference document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpload {
    /// Original filename supplied by the uploader.
    pub filename: String,
    /// Declared MIME type.
    pub content_type: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Category the document is filed under.
    pub category: DocumentCategory,
    /// Blob storage key where the raw bytes live.
    pub storage_key: String,
    /// Free-form metadata carried onto the document and its chunks.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DocumentUpload {
    /// Validate upload metadata against the configured size cap and supported types.
    pub fn validate(&self, max_document_bytes: u64) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        if self.filename.trim().is_empty() {
            errors.push("Filename is required".to_string());
        }
        if self.size == 0 {
            errors.push("Size must be a positive integer".to_string());
        } else if self.size > max_document_bytes {
            errors.push(format!("File too large (max {max_document_bytes} bytes)"));
        }
        if !SUPPORTED_CONTENT_TYPES.contains(&self.content_type.as_str()) {
            errors.push(format!("Unsupported content type: {}", self.content_type));
        }
        if self.storage_key.trim().is_empty() {
            errors.push("Storage key is required".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(errors))
        }
    }
}

/// A reference document registered with the knowledge base.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Unique document identifier.
    pub id: String,
    /// Original filename.
    pub filename: String,
    /// Declared MIME type.
    pub content_type: String,
    /// Size in bytes; always positive.
    pub size: u64,
    /// Category the document is filed under.
    pub category: DocumentCategory,
    /// Registration timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
    /// Set once ingestion completes.
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
    /// Number of chunks stored for the document.
    pub chunk_count: usize,
    /// Ingestion lifecycle status.
    pub status: Status,
    /// Blob storage key of the raw upload.
    pub storage_key: String,
    /// Recorded failure message; present only when `status` is `failed`.
    pub error: Option<String>,
    /// Free-form metadata supplied at upload time.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    /// Register a new document at `pending` from validated upload metadata.
    pub fn register(upload: DocumentUpload, max_document_bytes: u64) -> Result<Self, ValidationError> {
        upload.validate(max_document_bytes)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename: upload.filename,
            content_type: upload.content_type,
            size: upload.size,
            category: upload.category,
            uploaded_at: OffsetDateTime::now_utc(),
            processed_at: None,
            chunk_count: 0,
            status: Status::Pending,
            storage_key: upload.storage_key,
            error: None,
            metadata: upload.metadata,
        })
    }
}

/// A contiguous slice of a document's extracted text paired with its embedding.
///
/// Chunks are immutable once stored; re-ingesting a document replaces its chunk
/// set wholesale.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Owning document identifier.
    pub document_id: String,
    /// Identifier unique within the document (`<document_id>_chunk_<index>`).
    pub chunk_id: String,
    /// Extracted text content.
    pub text: String,
    /// Embedding vector of the configured dimensionality.
    pub embedding: Vec<f32>,
    /// Character offset of the slice start in the source text.
    pub start: usize,
    /// Character offset one past the slice end.
    pub end: usize,
    /// Whether the embedding call degraded to a zero vector.
    #[serde(default)]
    pub degraded: bool,
    /// Optional page or section label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Metadata inherited from the document plus chunk-local fields.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Chunk {
    /// Build a chunk, enforcing offset ordering and embedding dimensionality.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: &str,
        index: usize,
        text: String,
        embedding: Vec<f32>,
        degraded: bool,
        start: usize,
        end: usize,
        dimension: usize,
        metadata: Map<String, Value>,
    ) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::single(format!(
                "chunk offsets out of order: [{start}, {end})"
            )));
        }
        if embedding.len() != dimension {
            return Err(ValidationError::single(format!(
                "embedding dimension mismatch: expected {dimension}, got {}",
                embedding.len()
            )));
        }
        Ok(Self {
            document_id: document_id.to_string(),
            chunk_id: format!("{document_id}_chunk_{index}"),
            text,
            embedding,
            start,
            end,
            degraded,
            section: None,
            metadata,
        })
    }
}

/// Pointer from a generated answer back to the chunk that grounded it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    /// Knowledge base document identifier.
    pub document_id: String,
    /// Filename of the source document.
    pub document_name: String,
    /// Category of the source document.
    pub category: String,
    /// Chunk identifier within the document.
    pub chunk_id: String,
    /// Cosine similarity between the query and the chunk.
    pub relevance_score: f32,
    /// Truncated excerpt of the chunk text.
    pub excerpt: String,
}

/// A logged query with its terminal outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    /// Unique query identifier.
    pub query_id: String,
    /// User that issued the query.
    pub user_id: String,
    /// Original query text.
    pub query_text: String,
    /// Query kind used for prompting.
    pub kind: QueryKind,
    /// Lifecycle status; terminal once `completed` or `failed`.
    pub status: Status,
    /// Generated answer; present iff `status` is `completed`.
    pub response_text: Option<String>,
    /// Sources cited by the answer.
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    /// Confidence score in `[0, 1]`.
    pub confidence_score: f32,
    /// Admission timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Completion timestamp, set with the terminal transition.
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Token accounting for the generation call.
    #[serde(default)]
    pub token_usage: TokenUsage,
    /// Failure message; present iff `status` is `failed`.
    pub error: Option<String>,
}

impl QueryRecord {
    /// Create a record at `pending` for an admitted query.
    pub fn pending(user_id: &str, query_text: &str, kind: QueryKind) -> Self {
        Self {
            query_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            query_text: query_text.to_string(),
            kind,
            status: Status::Pending,
            response_text: None,
            sources: Vec::new(),
            confidence_score: 0.0,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
            token_usage: TokenUsage::zero(),
            error: None,
        }
    }

    /// Transition to `completed` with the generated result.
    pub fn complete(
        &mut self,
        response_text: String,
        sources: Vec<SourceRef>,
        confidence_score: f32,
        token_usage: TokenUsage,
    ) {
        debug_assert!(!self.status.is_terminal());
        self.status = Status::Completed;
        self.response_text = Some(response_text);
        self.sources = sources;
        self.confidence_score = confidence_score;
        self.token_usage = token_usage;
        self.completed_at = Some(OffsetDateTime::now_utc());
        self.error = None;
    }

    /// Transition to `failed` with the recorded reason.
    pub fn fail(&mut self, error: String) {
        debug_assert!(!self.status.is_terminal());
        self.status = Status::Failed;
        self.response_text = None;
        self.error = Some(error);
        self.completed_at = Some(OffsetDateTime::now_utc());
    }
}

/// A logged compliance analysis of an uploaded document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    /// Unique analysis identifier.
    pub analysis_id: String,
    /// User that requested the analysis.
    pub user_id: String,
    /// Identifier of the analyzed upload.
    pub document_id: String,
    /// Filename of the analyzed upload.
    pub filename: String,
    /// Requested analysis kind.
    pub kind: AnalysisKind,
    /// Lifecycle status; a `processing` marker is persisted up front so
    /// in-flight work is observable.
    pub status: Status,
    /// Admission timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Completion timestamp, set with the terminal transition.
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Structured report; present iff `status` is `completed`.
    pub report: Option<ComplianceReport>,
    /// Failure message; present iff `status` is `failed`.
    pub error: Option<String>,
}

impl AnalysisRecord {
    /// Create a record at `processing` for a newly admitted analysis.
    pub fn processing(
        user_id: &str,
        document_id: &str,
        filename: &str,
        kind: AnalysisKind,
    ) -> Self {
        Self {
            analysis_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            document_id: document_id.to_string(),
            filename: filename.to_string(),
            kind,
            status: Status::Processing,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
            report: None,
            error: None,
        }
    }

    /// Transition to `completed` with the structured report.
    pub fn complete(&mut self, report: ComplianceReport) {
        debug_assert!(!self.status.is_terminal());
        self.status = Status::Completed;
        self.report = Some(report);
        self.completed_at = Some(OffsetDateTime::now_utc());
        self.error = None;
    }

    /// Transition to `failed` with the recorded reason.
    pub fn fail(&mut self, error: String) {
        debug_assert!(!self.status.is_terminal());
        self.status = Status::Failed;
        self.report = None;
        self.error = Some(error);
        self.completed_at = Some(OffsetDateTime::now_utc());
    }
}

/// Structured compliance assessment produced by the analysis pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplianceReport {
    /// Overall compliance score in `[0, 1]`.
    pub overall_score: f32,
    /// Policies the document was matched against.
    #[serde(default)]
    pub policy_matches: Vec<PolicyMatch>,
    /// Gaps or violations identified in the document.
    #[serde(default)]
    pub compliance_gaps: Vec<ComplianceGap>,
    /// Risks requiring attention.
    #[serde(default)]
    pub risk_flags: Vec<RiskFlag>,
    /// Free-form improvement recommendations.
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Model confidence in the assessment, in `[0, 1]`.
    pub confidence_score: f32,
}

impl ComplianceReport {
    /// Fixed payload substituted when the model output cannot be parsed.
    pub fn parse_fallback() -> Self {
        Self {
            overall_score: 0.5,
            policy_matches: Vec::new(),
            compliance_gaps: vec![ComplianceGap {
                gap_type: "analysis_incomplete".to_string(),
                severity: "medium".to_string(),
                description: "Unable to complete full compliance analysis".to_string(),
                recommendation: "Manual review recommended".to_string(),
            }],
            risk_flags: Vec::new(),
            recommendations: vec!["Conduct manual compliance review".to_string()],
            confidence_score: 0.3,
        }
    }

    /// Report substituted when the generation call itself fails.
    pub fn generation_failure() -> Self {
        Self {
            overall_score: 0.0,
            policy_matches: Vec::new(),
            compliance_gaps: vec![ComplianceGap {
                gap_type: "analysis_error".to_string(),
                severity: "high".to_string(),
                description: "Analysis could not be generated".to_string(),
                recommendation: "Please try again or contact support".to_string(),
            }],
            risk_flags: Vec::new(),
            recommendations: vec!["Review document manually due to analysis error".to_string()],
            confidence_score: 0.0,
        }
    }
}

/// A policy the analyzed document was matched against.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyMatch {
    /// Name of the matched policy.
    #[serde(default)]
    pub policy_name: String,
    /// Strength of the match in `[0, 1]`.
    #[serde(default)]
    pub match_score: f32,
    /// Policy sections the match refers to.
    #[serde(default)]
    pub relevant_sections: Vec<String>,
    /// Location in the analyzed document.
    #[serde(default)]
    pub document_reference: String,
}

/// A compliance gap or violation identified in the analyzed document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplianceGap {
    /// Machine-readable gap classification.
    #[serde(default)]
    pub gap_type: String,
    /// Severity label (`low`/`medium`/`high`).
    #[serde(default)]
    pub severity: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Suggested remediation.
    #[serde(default)]
    pub recommendation: String,
}

/// A risk requiring attention surfaced by the analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskFlag {
    /// Machine-readable risk classification.
    #[serde(default)]
    pub risk_type: String,
    /// Severity label (`low`/`medium`/`high`).
    #[serde(default)]
    pub severity: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Expected impact if unaddressed.
    #[serde(default)]
    pub impact: String,
}
