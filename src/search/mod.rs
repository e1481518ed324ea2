//! Brute-force cosine similarity search over stored chunks.

use crate::store::chunks::ChunkStore;
use crate::store::StoreError;
use async_trait::async_trait;

/// Cosine similarity between two vectors; `0.0` when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// A chunk that scored above the threshold for a query vector.
#[derive(Clone, Debug)]
pub struct SearchMatch {
    /// Owning document identifier.
    pub document_id: String,
    /// Chunk identifier within the document.
    pub chunk_id: String,
    /// Chunk text.
    pub text: String,
    /// Cosine similarity against the query vector.
    pub score: f32,
    /// Filename of the owning document, from chunk metadata.
    pub filename: String,
    /// Category of the owning document, from chunk metadata.
    pub category: String,
}

/// Retrieval seam over the knowledge base.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Return up to `top_k` chunks scoring at least `threshold`, best first.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchMatch>, StoreError>;
}

/// Linear scan over every stored chunk.
///
/// The corpus is small enough that a full scan per query beats maintaining an
/// index. Ties keep the scan order of the underlying chunk store (stable sort).
pub struct LinearScanSearch {
    chunks: ChunkStore,
}

impl LinearScanSearch {
    /// Build a scan over the given chunk store.
    pub fn new(chunks: ChunkStore) -> Self {
        Self { chunks }
    }
}

fn metadata_str(metadata: &serde_json::Map<String, serde_json::Value>, key: &str) -> String {
    metadata
        .get(key)
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl SimilaritySearch for LinearScanSearch {
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchMatch>, StoreError> {
        let documents = self.chunks.list_all().await?;
        let mut matches = Vec::new();
        for document in documents {
            for chunk in document.chunks {
                let score = cosine_similarity(query, &chunk.embedding);
                if score >= threshold {
                    matches.push(SearchMatch {
                        document_id: chunk.document_id,
                        chunk_id: chunk.chunk_id,
                        text: chunk.text,
                        score,
                        filename: metadata_str(&chunk.metadata, "document_filename"),
                        category: metadata_str(&chunk.metadata, "document_category"),
                    });
                }
            }
        }
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Chunk;
    use crate::store::memory::MemoryBlobStore;
    use serde_json::Map;
    use std::sync::Arc;

    #[test]
    fn cosine_is_symmetric_and_bounded() {
        let a = [1.0, 2.0, 3.0];
        let b = [3.0, 2.0, 1.0];
        let ab = cosine_similarity(&a, &b);
        let ba = cosine_similarity(&b, &a);
        assert_eq!(ab, ba);
        assert!((-1.0..=1.0).contains(&ab));
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_norm_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 1.0], &[0.0, 0.0]), 0.0);
    }

    fn chunk(document_id: &str, index: usize, embedding: Vec<f32>) -> Chunk {
        let mut metadata = Map::new();
        metadata.insert("document_filename".into(), format!("{document_id}.txt").into());
        metadata.insert("document_category".into(), "policies".into());
        let dimension = embedding.len();
        Chunk::new(
            document_id,
            index,
            format!("{document_id} chunk {index}"),
            embedding,
            false,
            0,
            10,
            dimension,
            metadata,
        )
        .expect("valid chunk")
    }

    async fn scan_with(docs: Vec<(&str, Vec<Chunk>)>) -> LinearScanSearch {
        let store = ChunkStore::new(Arc::new(MemoryBlobStore::new()));
        for (id, chunks) in docs {
            store.put_document(id, chunks).await.unwrap();
        }
        LinearScanSearch::new(store)
    }

    #[tokio::test]
    async fn empty_store_returns_no_matches() {
        let scan = scan_with(Vec::new()).await;
        assert!(scan.search(&[1.0, 0.0], 5, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn respects_threshold_and_top_k() {
        let scan = scan_with(vec![(
            "doc-a",
            vec![
                chunk("doc-a", 0, vec![1.0, 0.0]),
                chunk("doc-a", 1, vec![0.9, 0.1]),
                chunk("doc-a", 2, vec![0.0, 1.0]),
            ],
        )])
        .await;

        let matches = scan.search(&[1.0, 0.0], 2, 0.5).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].chunk_id, "doc-a_chunk_0");
        assert!(matches[0].score >= matches[1].score);
        assert!(matches.iter().all(|m| m.score >= 0.5));
        assert_eq!(matches[0].filename, "doc-a.txt");
        assert_eq!(matches[0].category, "policies");
    }

    #[tokio::test]
    async fn ties_keep_scan_order() {
        // Blob listing is lexicographic by document id, so doc-a scans first.
        let scan = scan_with(vec![
            ("doc-b", vec![chunk("doc-b", 0, vec![1.0, 0.0])]),
            ("doc-a", vec![chunk("doc-a", 0, vec![1.0, 0.0])]),
        ])
        .await;

        let matches = scan.search(&[1.0, 0.0], 2, 0.0).await.unwrap();
        assert_eq!(matches[0].document_id, "doc-a");
        assert_eq!(matches[1].document_id, "doc-b");
    }
}
