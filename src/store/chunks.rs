//! Document-granularity chunk persistence.
//!
//! Each document's chunks live in a single JSON blob under `embeddings/<id>.json`,
//! so a full scan reads one object per document rather than one per chunk. Chunk
//! sets are immutable once written; re-ingestion replaces the blob wholesale.

use crate::model::Chunk;
use crate::store::{BlobStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

const BLOB_PREFIX: &str = "embeddings/";
const READ_ATTEMPTS: usize = 3;
const READ_BACKOFF: Duration = Duration::from_millis(100);

/// All chunks stored for one document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunks {
    /// Owning document identifier.
    pub document_id: String,
    /// Chunks in ingestion order.
    pub chunks: Vec<Chunk>,
    /// When the chunk set was written.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Redundant count for quick inspection of the blob.
    pub total_chunks: usize,
}

/// Chunk store backed by a blob store, one object per document.
pub struct ChunkStore {
    blobs: Arc<dyn BlobStore>,
}

impl ChunkStore {
    /// Create a chunk store over the given blob backend.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    fn blob_key(document_id: &str) -> String {
        format!("{BLOB_PREFIX}{document_id}.json")
    }

    /// Persist the full chunk set for a document, replacing any prior set.
    pub async fn put_document(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
    ) -> Result<(), StoreError> {
        let blob = DocumentChunks {
            document_id: document_id.to_string(),
            total_chunks: chunks.len(),
            chunks,
            created_at: OffsetDateTime::now_utc(),
        };
        let bytes = serde_json::to_vec(&blob)
            .map_err(|err| StoreError::Corrupt(format!("encode chunks: {err}")))?;
        self.blobs.put(&Self::blob_key(document_id), bytes).await?;
        tracing::debug!(
            document_id,
            chunks = blob.total_chunks,
            "Stored chunk blob"
        );
        Ok(())
    }

    /// Load every stored document's chunk set, in blob-listing order.
    ///
    /// Blobs that fail to load or decode are skipped with a warning so one
    /// damaged document cannot take retrieval down.
    pub async fn list_all(&self) -> Result<Vec<DocumentChunks>, StoreError> {
        let keys = self.blobs.list(BLOB_PREFIX).await?;
        let mut documents = Vec::with_capacity(keys.len());
        for key in keys {
            match self.read_blob(&key).await {
                Ok(blob) => documents.push(blob),
                Err(error) => {
                    tracing::warn!(key = %key, error = %error, "Skipping unreadable chunk blob");
                }
            }
        }
        Ok(documents)
    }

    /// Remove the chunk set for a document, if present.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        self.blobs.delete(&Self::blob_key(document_id)).await
    }

    async fn read_blob(&self, key: &str) -> Result<DocumentChunks, StoreError> {
        // Reads are idempotent, so a bounded retry with backoff is safe.
        let mut attempt = 0;
        let bytes = loop {
            match self.blobs.get(key).await {
                Ok(bytes) => break bytes,
                Err(StoreError::NotFound(key)) => return Err(StoreError::NotFound(key)),
                Err(error) if attempt + 1 < READ_ATTEMPTS => {
                    attempt += 1;
                    tracing::debug!(key, attempt, error = %error, "Retrying chunk blob read");
                    tokio::time::sleep(READ_BACKOFF * attempt as u32).await;
                }
                Err(error) => return Err(error),
            }
        };
        serde_json::from_slice(&bytes)
            .map_err(|err| StoreError::Corrupt(format!("decode {key}: {err}")))
    }
}
