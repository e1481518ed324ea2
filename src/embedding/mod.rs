//! Embedding client seam and the degrading gateway.
//!
//! Pipelines depend on [`EmbeddingGateway`], which wraps a provider client with
//! bounded retries and converts persistent failure into a zero-vector embedding
//! flagged `degraded` instead of an error. Embedding calls are idempotent, so
//! retrying them is always safe.

pub mod http;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const ATTEMPTS: usize = 3;
const BACKOFF: Duration = Duration::from_millis(200);

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The provider could not be reached or returned a transport error.
    #[error("embedding request failed: {0}")]
    Request(String),
    /// The provider answered with a non-success status.
    #[error("embedding provider returned status {0}")]
    Status(u16),
    /// The provider's response body could not be decoded.
    #[error("embedding response malformed: {0}")]
    Malformed(String),
    /// The provider returned a vector of the wrong dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension {
        /// Configured dimensionality.
        expected: usize,
        /// Length of the returned vector.
        actual: usize,
    },
}

/// A provider that turns text into a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a single piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// An embedding result, possibly degraded to a zero vector.
#[derive(Clone, Debug, PartialEq)]
pub struct Embedding {
    /// The vector, always of the configured dimensionality.
    pub vector: Vec<f32>,
    /// True when the provider failed and a zero vector was substituted.
    pub degraded: bool,
}

/// Retrying gateway that never fails: persistent provider errors degrade to a
/// zero vector so ingestion and querying keep moving.
pub struct EmbeddingGateway {
    client: Arc<dyn EmbeddingClient>,
    dimension: usize,
}

impl EmbeddingGateway {
    /// Wrap a provider client with the configured dimensionality.
    pub fn new(client: Arc<dyn EmbeddingClient>, dimension: usize) -> Self {
        Self { client, dimension }
    }

    /// The configured embedding dimensionality.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed `text`, retrying transient failures, degrading on persistent ones.
    pub async fn embed(&self, text: &str) -> Embedding {
        let mut last_error = None;
        for attempt in 1..=ATTEMPTS {
            match self.client.embed(text).await {
                Ok(vector) if vector.len() == self.dimension => {
                    return Embedding {
                        vector,
                        degraded: false,
                    };
                }
                Ok(vector) => {
                    // A wrong-size vector is a provider contract violation, not
                    // a transient fault; retrying will not change it.
                    last_error = Some(EmbeddingError::Dimension {
                        expected: self.dimension,
                        actual: vector.len(),
                    });
                    break;
                }
                Err(error) => {
                    tracing::debug!(attempt, error = %error, "Embedding attempt failed");
                    last_error = Some(error);
                    if attempt < ATTEMPTS {
                        tokio::time::sleep(BACKOFF * attempt as u32).await;
                    }
                }
            }
        }
        let error = last_error.map(|e| e.to_string()).unwrap_or_default();
        tracing::warn!(error = %error, "Embedding degraded to zero vector");
        Embedding {
            vector: vec![0.0; self.dimension],
            degraded: true,
        }
    }
}
