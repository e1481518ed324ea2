//! Generation client seam.
//!
//! Unlike embedding, generation calls are never retried: each attempt bills
//! tokens, so a failure is surfaced to the caller and handled there (apologetic
//! answer text or a fallback report, never a retry loop).

pub mod http;

use crate::model::TokenUsage;
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by generation providers.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The provider could not be reached or returned a transport error.
    #[error("generation request failed: {0}")]
    Request(String),
    /// The provider answered with a non-success status.
    #[error("generation provider returned status {0}")]
    Status(u16),
    /// The provider's response body could not be decoded.
    #[error("generation response malformed: {0}")]
    Malformed(String),
}

/// Generated text plus the provider's token accounting.
#[derive(Clone, Debug)]
pub struct GenerationOutput {
    /// Generated completion text.
    pub text: String,
    /// Tokens billed for the call.
    pub usage: TokenUsage,
}

/// A provider that completes a prompt into text.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate a completion for `prompt` with the given sampling bounds.
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<GenerationOutput, GenerationError>;
}
