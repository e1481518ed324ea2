use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    chunks_stored: AtomicU64,
    queries_processed: AtomicU64,
    analyses_completed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed ingestion and the number of chunks it produced.
    pub fn record_ingestion(&self, chunk_count: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_stored.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a processed query.
    pub fn record_query(&self) {
        self.queries_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed analysis.
    pub fn record_analysis(&self) {
        self.analyses_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_stored: self.chunks_stored.load(Ordering::Relaxed),
            queries_processed: self.queries_processed.load(Ordering::Relaxed),
            analyses_completed: self.analyses_completed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents that completed ingestion since startup.
    pub documents_ingested: u64,
    /// Total chunks persisted across all ingestions.
    pub chunks_stored: u64,
    /// Queries processed since startup.
    pub queries_processed: u64,
    /// Analyses completed since startup.
    pub analyses_completed: u64,
}
