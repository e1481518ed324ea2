//! Text extraction capability boundary.
//!
//! Turning binary document formats into plain text is owned by surrounding
//! infrastructure; the pipelines only depend on the [`TextExtractor`] trait. The
//! shipped implementation handles plain text and treats everything it cannot
//! decode as unsupported.

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by text extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The declared content type has no extractor.
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),
    /// The document decoded to no usable text.
    #[error("no text content extracted from document")]
    EmptyText,
    /// The bytes could not be decoded with the expected encoding.
    #[error("document is not valid UTF-8")]
    InvalidEncoding,
}

/// Capability that turns raw document bytes into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract plain text from `bytes` declared as `content_type`.
    async fn extract(&self, bytes: &[u8], content_type: &str) -> Result<String, ExtractError>;
}

/// Extractor for plain-text uploads.
///
/// Files declared `text/plain` are decoded as UTF-8. Other declared types are
/// given one lenient decode attempt before being rejected, matching how the
/// upload path handles files with misdeclared types.
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
        let text = match content_type {
            "text/plain" => std::str::from_utf8(bytes)
                .map_err(|_| ExtractError::InvalidEncoding)?
                .to_string(),
            other => match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) => return Err(ExtractError::UnsupportedType(other.to_string())),
            },
        };
        if text.trim().is_empty() {
            return Err(ExtractError::EmptyText);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extracts_plain_text() {
        let text = PlainTextExtractor
            .extract(b"hello world", "text/plain")
            .await
            .unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn rejects_binary_bytes_with_unsupported_type() {
        let error = PlainTextExtractor
            .extract(&[0xFF, 0xFE, 0x00], "application/pdf")
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractError::UnsupportedType(_)));
    }

    #[tokio::test]
    async fn rejects_whitespace_only_documents() {
        let error = PlainTextExtractor
            .extract(b"   \n\t ", "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractError::EmptyText));
    }
}
