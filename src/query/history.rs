//! Query history listing and usage statistics.

use crate::model::{QueryRecord, Status};
use crate::store::records::RecordRepository;
use crate::store::StoreError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

const PREVIEW_CHARS: usize = 200;
const DEFAULT_PERIOD_DAYS: u32 = 30;
const MAX_PERIOD_DAYS: u32 = 365;

/// A history listing row; the response is truncated to a preview.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Query identifier.
    pub query_id: String,
    /// Original query text.
    pub query_text: String,
    /// Prompting kind.
    pub kind: String,
    /// Terminal status.
    pub status: Status,
    /// First part of the generated answer, when completed.
    pub response_preview: Option<String>,
    /// Number of sources cited.
    pub source_count: usize,
    /// Confidence score of the answer.
    pub confidence_score: f32,
    /// Admission timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One page of history entries.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    /// Entries, most recent first.
    pub entries: Vec<HistoryEntry>,
    /// Cursor for the next page, when more entries exist.
    pub next_cursor: Option<String>,
}

/// Per-day query count within the statistics period.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    /// UTC calendar date in `YYYY-MM-DD` form.
    pub date: String,
    /// Queries admitted on that date.
    pub count: u64,
}

/// Aggregated usage statistics for one user.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatistics {
    /// Days covered by the aggregation.
    pub period_days: u32,
    /// Queries admitted in the period.
    pub total_queries: u64,
    /// Queries per prompting kind.
    pub queries_by_kind: BTreeMap<String, u64>,
    /// Queries per UTC calendar day, oldest first.
    pub daily_counts: Vec<DailyCount>,
    /// Tokens billed across completed queries.
    pub total_tokens: u64,
    /// Mean confidence over completed queries; `0.0` when there are none.
    pub average_confidence: f32,
    /// Mean queries per day over the period.
    pub average_per_day: f32,
}

fn preview(record: &QueryRecord) -> Option<String> {
    record.response_text.as_ref().map(|text| {
        if text.chars().count() <= PREVIEW_CHARS {
            text.clone()
        } else {
            let mut cut: String = text.chars().take(PREVIEW_CHARS).collect();
            cut.push_str("...");
            cut
        }
    })
}

/// Read-side access to a user's query log.
pub struct QueryHistory {
    records: Arc<RecordRepository>,
}

impl QueryHistory {
    /// Build over the shared record repository.
    pub fn new(records: Arc<RecordRepository>) -> Self {
        Self { records }
    }

    /// Page through a user's queries, most recent first within the page.
    pub async fn list(
        &self,
        user_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, StoreError> {
        let page = self.records.query_history(user_id, limit, cursor).await?;
        let mut entries: Vec<HistoryEntry> = page
            .items
            .iter()
            .map(|record| HistoryEntry {
                query_id: record.query_id.clone(),
                query_text: record.query_text.clone(),
                kind: record.kind.as_str().to_string(),
                status: record.status,
                response_preview: preview(record),
                source_count: record.sources.len(),
                confidence_score: record.confidence_score,
                created_at: record.created_at,
            })
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(HistoryPage {
            entries,
            next_cursor: page.next_cursor,
        })
    }

    /// Aggregate a user's queries over the last `days` UTC days.
    pub async fn statistics(
        &self,
        user_id: &str,
        days: Option<u32>,
    ) -> Result<QueryStatistics, StoreError> {
        let period_days = days.unwrap_or(DEFAULT_PERIOD_DAYS).clamp(1, MAX_PERIOD_DAYS);
        let cutoff = OffsetDateTime::now_utc() - Duration::days(i64::from(period_days));
        let records = self.records.user_queries_since(user_id, cutoff).await?;

        let mut by_kind: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_day: BTreeMap<String, u64> = BTreeMap::new();
        let mut total_tokens = 0u64;
        let mut confidence_sum = 0.0f64;
        let mut completed = 0u64;
        for record in &records {
            *by_kind.entry(record.kind.as_str().to_string()).or_default() += 1;
            *by_day.entry(record.created_at.date().to_string()).or_default() += 1;
            if record.status == Status::Completed {
                total_tokens += record.token_usage.total();
                confidence_sum += f64::from(record.confidence_score);
                completed += 1;
            }
        }

        let total_queries = records.len() as u64;
        let average_confidence = if completed > 0 {
            (confidence_sum / completed as f64) as f32
        } else {
            0.0
        };
        Ok(QueryStatistics {
            period_days,
            total_queries,
            queries_by_kind: by_kind,
            daily_counts: by_day
                .into_iter()
                .map(|(date, count)| DailyCount { date, count })
                .collect(),
            total_tokens,
            average_confidence,
            average_per_day: total_queries as f32 / period_days as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QueryKind, TokenUsage};
    use crate::store::memory::MemoryRecordStore;

    async fn history_with(records: Vec<QueryRecord>) -> QueryHistory {
        let repo = Arc::new(RecordRepository::new(Arc::new(MemoryRecordStore::new())));
        let history = QueryHistory::new(repo.clone());
        for record in records {
            // Records are inserted pending then finalized, matching the write path.
            let mut pending = record.clone();
            pending.status = Status::Pending;
            pending.response_text = None;
            repo.insert_query_record(&pending).await.unwrap();
            if record.status != Status::Pending {
                repo.finalize_query_record(&record).await.unwrap();
            }
        }
        history
    }

    fn completed(kind: QueryKind, confidence: f32, tokens: u64) -> QueryRecord {
        let mut record = QueryRecord::pending("user-1", "q", kind);
        record.complete(
            "a".repeat(400),
            Vec::new(),
            confidence,
            TokenUsage {
                input_tokens: tokens,
                output_tokens: 0,
            },
        );
        record
    }

    #[tokio::test]
    async fn list_truncates_responses_and_sorts_descending() {
        let history = history_with(vec![
            completed(QueryKind::General, 0.8, 10),
            completed(QueryKind::Policy, 0.6, 20),
        ])
        .await;
        let page = history.list("user-1", 10, None).await.unwrap();
        assert_eq!(page.entries.len(), 2);
        assert!(page.entries[0].created_at >= page.entries[1].created_at);
        let preview = page.entries[0].response_preview.as_deref().unwrap();
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[tokio::test]
    async fn statistics_aggregate_kinds_tokens_and_confidence() {
        let history = history_with(vec![
            completed(QueryKind::General, 0.8, 10),
            completed(QueryKind::General, 0.6, 30),
            completed(QueryKind::Policy, 1.0, 5),
        ])
        .await;
        let stats = history.statistics("user-1", Some(7)).await.unwrap();
        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.queries_by_kind.get("general"), Some(&2));
        assert_eq!(stats.queries_by_kind.get("policy"), Some(&1));
        assert_eq!(stats.total_tokens, 45);
        assert!((stats.average_confidence - 0.8).abs() < 1e-6);
        assert_eq!(stats.daily_counts.iter().map(|d| d.count).sum::<u64>(), 3);
    }

    #[tokio::test]
    async fn statistics_for_empty_history_are_zeroed() {
        let history = history_with(Vec::new()).await;
        let stats = history.statistics("user-1", None).await.unwrap();
        assert_eq!(stats.period_days, DEFAULT_PERIOD_DAYS);
        assert_eq!(stats.total_queries, 0);
        assert_eq!(stats.average_confidence, 0.0);
        assert!(stats.daily_counts.is_empty());
    }
}
