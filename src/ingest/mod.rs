//! Document ingestion pipeline.
//!
//! Drives a registered document through `pending → processing → {completed |
//! failed}`. Every fault inside a run lands in the document record as a `failed`
//! status with a reason; `run` itself never returns an error, so a crashed
//! invocation cannot leave the caller guessing.

use crate::chunking::chunk_text;
use crate::deadline::{check_optional, Deadline};
use crate::embedding::EmbeddingGateway;
use crate::extract::TextExtractor;
use crate::metrics::PipelineMetrics;
use crate::model::{Chunk, Document, DocumentUpload, Status, ValidationError};
use crate::store::chunks::ChunkStore;
use crate::store::records::RecordRepository;
use crate::store::{BlobStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const READ_ATTEMPTS: usize = 3;
const READ_BACKOFF: Duration = Duration::from_millis(100);

/// Errors surfaced when registering a document.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Upload metadata failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The document record could not be persisted.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tunables for the ingestion pipeline.
#[derive(Clone, Copy, Debug)]
pub struct IngestionSettings {
    /// Maximum chunk size in characters.
    pub chunk_max_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub chunk_overlap: usize,
    /// Embedding dimensionality.
    pub dimension: usize,
    /// Maximum accepted upload size in bytes.
    pub max_document_bytes: u64,
}

/// Extract, chunk, embed, and store pipeline for uploaded documents.
pub struct IngestionPipeline {
    blobs: Arc<dyn BlobStore>,
    chunks: ChunkStore,
    records: Arc<RecordRepository>,
    embeddings: Arc<EmbeddingGateway>,
    extractor: Arc<dyn TextExtractor>,
    metrics: Arc<PipelineMetrics>,
    settings: IngestionSettings,
}

impl IngestionPipeline {
    /// Assemble the pipeline from its collaborators.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        chunks: ChunkStore,
        records: Arc<RecordRepository>,
        embeddings: Arc<EmbeddingGateway>,
        extractor: Arc<dyn TextExtractor>,
        metrics: Arc<PipelineMetrics>,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            blobs,
            chunks,
            records,
            embeddings,
            extractor,
            metrics,
            settings,
        }
    }

    /// Validate an upload and persist its document record at `pending`.
    pub async fn register(&self, upload: DocumentUpload) -> Result<Document, IngestError> {
        let document = Document::register(upload, self.settings.max_document_bytes)?;
        self.records.insert_document(&document).await?;
        tracing::info!(
            document_id = %document.id,
            filename = %document.filename,
            category = %document.category,
            "Registered document"
        );
        Ok(document)
    }

    /// Process a registered document to a terminal state.
    ///
    /// Faults are recorded on the document, not returned; a document that was
    /// picked up always ends at `completed` or `failed`.
    pub async fn run(&self, document_id: &str, deadline: Option<Deadline>) {
        let mut document = match self.records.get_document(document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                tracing::warn!(document_id, "Ingestion run for unknown document");
                return;
            }
            Err(error) => {
                tracing::error!(document_id, error = %error, "Could not load document");
                return;
            }
        };

        document.status = Status::Processing;
        if let Err(error) = self
            .records
            .update_document(&document, Status::Pending)
            .await
        {
            // Another invocation already claimed the document.
            tracing::warn!(document_id, error = %error, "Skipping ingestion, claim lost");
            return;
        }

        match self.process(&document, deadline.as_ref()).await {
            Ok(chunk_count) => {
                document.status = Status::Completed;
                document.chunk_count = chunk_count;
                document.processed_at = Some(time::OffsetDateTime::now_utc());
                document.error = None;
                if let Err(error) = self
                    .records
                    .update_document(&document, Status::Processing)
                    .await
                {
                    tracing::error!(document_id, error = %error, "Could not record completion");
                    if !matches!(error, StoreError::ConditionFailed { .. }) {
                        // The record is still `processing`; try to land it in a
                        // terminal state rather than leave it stuck there.
                        document.status = Status::Failed;
                        document.error = Some(format!("could not record completion: {error}"));
                        if let Err(error) = self
                            .records
                            .update_document(&document, Status::Processing)
                            .await
                        {
                            tracing::error!(document_id, error = %error, "Could not record fallback failure");
                        }
                    }
                    return;
                }
                self.metrics.record_ingestion(chunk_count as u64);
                tracing::info!(document_id, chunk_count, "Ingestion completed");
            }
            Err(reason) => {
                tracing::warn!(document_id, reason = %reason, "Ingestion failed");
                document.status = Status::Failed;
                document.error = Some(reason);
                if let Err(error) = self
                    .records
                    .update_document(&document, Status::Processing)
                    .await
                {
                    tracing::error!(document_id, error = %error, "Could not record failure");
                }
            }
        }
    }

    async fn process(
        &self,
        document: &Document,
        deadline: Option<&Deadline>,
    ) -> Result<usize, String> {
        check_optional(deadline).map_err(|e| e.to_string())?;
        let bytes = self.read_upload(&document.storage_key).await?;

        check_optional(deadline).map_err(|e| e.to_string())?;
        let text = self
            .extractor
            .extract(&bytes, &document.content_type)
            .await
            .map_err(|e| e.to_string())?;

        let slices = chunk_text(
            &text,
            self.settings.chunk_max_size,
            self.settings.chunk_overlap,
        )
        .map_err(|e| e.to_string())?;

        let mut chunks = Vec::with_capacity(slices.len());
        let mut degraded_count = 0usize;
        for (index, slice) in slices.into_iter().enumerate() {
            check_optional(deadline).map_err(|e| e.to_string())?;
            let embedding = self.embeddings.embed(&slice.text).await;
            if embedding.degraded {
                degraded_count += 1;
            }

            let mut metadata = document.metadata.clone();
            metadata.insert("chunk_index".into(), index.into());
            metadata.insert("document_filename".into(), document.filename.clone().into());
            metadata.insert(
                "document_category".into(),
                document.category.as_str().into(),
            );
            let chunk = Chunk::new(
                &document.id,
                index,
                slice.text,
                embedding.vector,
                embedding.degraded,
                slice.start,
                slice.end,
                self.settings.dimension,
                metadata,
            )
            .map_err(|e| e.to_string())?;
            chunks.push(chunk);
        }
        if degraded_count > 0 {
            tracing::warn!(
                document_id = %document.id,
                degraded_count,
                "Some chunks stored with degraded embeddings"
            );
        }

        check_optional(deadline).map_err(|e| e.to_string())?;
        let chunk_count = chunks.len();
        self.chunks
            .put_document(&document.id, chunks)
            .await
            .map_err(|e| e.to_string())?;
        Ok(chunk_count)
    }

    async fn read_upload(&self, storage_key: &str) -> Result<Vec<u8>, String> {
        // Blob reads are idempotent, so a bounded retry with backoff is safe.
        let mut attempt = 0;
        loop {
            match self.blobs.get(storage_key).await {
                Ok(bytes) => return Ok(bytes),
                Err(StoreError::NotFound(key)) => {
                    return Err(format!("upload blob missing: {key}"));
                }
                Err(error) if attempt + 1 < READ_ATTEMPTS => {
                    attempt += 1;
                    tracing::debug!(storage_key, attempt, error = %error, "Retrying upload read");
                    tokio::time::sleep(READ_BACKOFF * attempt as u32).await;
                }
                Err(error) => return Err(error.to_string()),
            }
        }
    }

    /// Delete a document's record, chunk set, and raw upload.
    pub async fn delete(&self, document_id: &str) -> Result<(), StoreError> {
        let document = self.records.get_document(document_id).await?;
        self.chunks.delete_document(document_id).await?;
        if let Some(document) = &document {
            self.blobs.delete(&document.storage_key).await?;
        }
        self.records.delete_document(document_id).await?;
        tracing::info!(document_id, "Deleted document");
        Ok(())
    }

    /// The record repository backing this pipeline.
    pub fn records(&self) -> &Arc<RecordRepository> {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingClient, EmbeddingError};
    use crate::extract::PlainTextExtractor;
    use crate::model::DocumentCategory;
    use crate::store::memory::{MemoryBlobStore, MemoryRecordStore};
    use crate::store::{RecordPage, RecordStore, StoredRecord, WriteCondition};
    use async_trait::async_trait;
    use serde_json::Map;

    struct FixedClient {
        vector: Vec<f32>,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingClient for FixedClient {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if self.fail {
                Err(EmbeddingError::Status(500))
            } else {
                Ok(self.vector.clone())
            }
        }
    }

    /// Delegates to a memory store but refuses any write that would land a
    /// document in `completed`.
    struct CompletionRejectingStore {
        inner: MemoryRecordStore,
    }

    #[async_trait]
    impl RecordStore for CompletionRejectingStore {
        async fn get(&self, pk: &str, sk: &str) -> Result<Option<StoredRecord>, StoreError> {
            self.inner.get(pk, sk).await
        }

        async fn put(
            &self,
            record: StoredRecord,
            condition: WriteCondition,
        ) -> Result<(), StoreError> {
            if record.body.get("status").and_then(|status| status.as_str()) == Some("completed") {
                return Err(StoreError::Unavailable("table write rejected".into()));
            }
            self.inner.put(record, condition).await
        }

        async fn query(
            &self,
            pk: &str,
            sk_prefix: &str,
            limit: usize,
            cursor: Option<&str>,
        ) -> Result<RecordPage, StoreError> {
            self.inner.query(pk, sk_prefix, limit, cursor).await
        }

        async fn query_index(
            &self,
            index_key: &str,
            limit: usize,
            cursor: Option<&str>,
        ) -> Result<RecordPage, StoreError> {
            self.inner.query_index(index_key, limit, cursor).await
        }

        async fn delete(&self, pk: &str, sk: &str) -> Result<(), StoreError> {
            self.inner.delete(pk, sk).await
        }
    }

    fn pipeline(blobs: Arc<MemoryBlobStore>, fail_embeddings: bool) -> IngestionPipeline {
        pipeline_with(blobs, fail_embeddings, Arc::new(MemoryRecordStore::new()))
    }

    fn pipeline_with(
        blobs: Arc<MemoryBlobStore>,
        fail_embeddings: bool,
        store: Arc<dyn RecordStore>,
    ) -> IngestionPipeline {
        let records = Arc::new(RecordRepository::new(store));
        let gateway = Arc::new(EmbeddingGateway::new(
            Arc::new(FixedClient {
                vector: vec![0.5; 4],
                fail: fail_embeddings,
            }),
            4,
        ));
        IngestionPipeline::new(
            blobs.clone(),
            ChunkStore::new(blobs),
            records,
            gateway,
            Arc::new(PlainTextExtractor),
            Arc::new(PipelineMetrics::new()),
            IngestionSettings {
                chunk_max_size: 50,
                chunk_overlap: 10,
                dimension: 4,
                max_document_bytes: 1024,
            },
        )
    }

    fn upload(storage_key: &str) -> DocumentUpload {
        DocumentUpload {
            filename: "policy.txt".into(),
            content_type: "text/plain".into(),
            size: 100,
            category: DocumentCategory::Policies,
            storage_key: storage_key.into(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn completes_and_records_chunk_count() {
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs
            .put("kb/policy.txt", b"All visitors must sign in. Badges are required on site. Doors stay locked.".to_vec())
            .await
            .unwrap();
        let pipeline = pipeline(blobs, false);

        let document = pipeline.register(upload("kb/policy.txt")).await.unwrap();
        pipeline.run(&document.id, None).await;

        let stored = pipeline
            .records()
            .get_document(&document.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, Status::Completed);
        assert!(stored.chunk_count > 0);
        assert!(stored.processed_at.is_some());

        let chunk_sets = pipeline.chunks.list_all().await.unwrap();
        assert_eq!(chunk_sets.len(), 1);
        assert_eq!(chunk_sets[0].chunks.len(), stored.chunk_count);
        let meta = &chunk_sets[0].chunks[0].metadata;
        assert_eq!(meta.get("document_filename").unwrap(), "policy.txt");
        assert_eq!(meta.get("document_category").unwrap(), "policies");
    }

    #[tokio::test]
    async fn missing_upload_blob_fails_the_document() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let pipeline = pipeline(blobs, false);

        let document = pipeline.register(upload("kb/missing.txt")).await.unwrap();
        pipeline.run(&document.id, None).await;

        let stored = pipeline
            .records()
            .get_document(&document.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, Status::Failed);
        assert!(stored.error.as_deref().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn embedding_outage_still_completes_with_degraded_chunks() {
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs
            .put("kb/policy.txt", b"Short policy text.".to_vec())
            .await
            .unwrap();
        let pipeline = pipeline(blobs, true);

        let document = pipeline.register(upload("kb/policy.txt")).await.unwrap();
        pipeline.run(&document.id, None).await;

        let stored = pipeline
            .records()
            .get_document(&document.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, Status::Completed);

        let chunk_sets = pipeline.chunks.list_all().await.unwrap();
        assert!(chunk_sets[0].chunks.iter().all(|chunk| chunk.degraded));
        assert!(chunk_sets[0].chunks[0]
            .embedding
            .iter()
            .all(|value| *value == 0.0));
    }

    #[tokio::test]
    async fn rejected_completion_write_falls_back_to_failed() {
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs
            .put("kb/policy.txt", b"Some policy text.".to_vec())
            .await
            .unwrap();
        let store = Arc::new(CompletionRejectingStore {
            inner: MemoryRecordStore::new(),
        });
        let pipeline = pipeline_with(blobs, false, store);

        let document = pipeline.register(upload("kb/policy.txt")).await.unwrap();
        pipeline.run(&document.id, None).await;

        let stored = pipeline
            .records()
            .get_document(&document.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, Status::Failed);
        assert!(stored
            .error
            .as_deref()
            .unwrap()
            .contains("could not record completion"));
    }

    #[tokio::test]
    async fn expired_deadline_fails_the_document() {
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs
            .put("kb/policy.txt", b"Some policy text.".to_vec())
            .await
            .unwrap();
        let pipeline = pipeline(blobs, false);

        let document = pipeline.register(upload("kb/policy.txt")).await.unwrap();
        pipeline
            .run(&document.id, Some(Deadline::after(Duration::ZERO)))
            .await;

        let stored = pipeline
            .records()
            .get_document(&document.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, Status::Failed);
        assert!(stored.error.as_deref().unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn delete_removes_record_chunks_and_blob() {
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs
            .put("kb/policy.txt", b"Some policy text.".to_vec())
            .await
            .unwrap();
        let pipeline = pipeline(blobs.clone(), false);

        let document = pipeline.register(upload("kb/policy.txt")).await.unwrap();
        pipeline.run(&document.id, None).await;
        pipeline.delete(&document.id).await.unwrap();

        assert!(pipeline
            .records()
            .get_document(&document.id)
            .await
            .unwrap()
            .is_none());
        assert!(pipeline.chunks.list_all().await.unwrap().is_empty());
        assert!(matches!(
            blobs.get("kb/policy.txt").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
