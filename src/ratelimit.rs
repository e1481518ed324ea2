//! Per-user query admission control.
//!
//! Counts a user's query records over rolling one-hour and 24-hour windows.
//! Store failures fail open: an unavailable history must not lock users out.

use crate::store::records::RecordRepository;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// Outcome of an admission check, including the observed counts.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitDecision {
    /// Whether the query may proceed.
    pub allowed: bool,
    /// Queries observed in the last hour.
    pub hourly_count: usize,
    /// Queries observed in the last 24 hours.
    pub daily_count: usize,
    /// Configured hourly ceiling.
    pub hourly_limit: usize,
    /// Configured daily ceiling.
    pub daily_limit: usize,
}

/// Rolling-window rate limiter backed by the query history.
pub struct RateLimiter {
    records: Arc<RecordRepository>,
    hourly_limit: usize,
    daily_limit: usize,
}

impl RateLimiter {
    /// Build a limiter with the configured ceilings.
    pub fn new(records: Arc<RecordRepository>, hourly_limit: usize, daily_limit: usize) -> Self {
        Self {
            records,
            hourly_limit,
            daily_limit,
        }
    }

    /// Check whether `user_id` may issue another query right now.
    pub async fn check(&self, user_id: &str) -> RateLimitDecision {
        let now = OffsetDateTime::now_utc();
        let day_cutoff = now - Duration::hours(24);
        let hour_cutoff = now - Duration::hours(1);

        let recent = match self.records.user_queries_since(user_id, day_cutoff).await {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(user_id, error = %error, "Rate limit check failed open");
                return RateLimitDecision {
                    allowed: true,
                    hourly_count: 0,
                    daily_count: 0,
                    hourly_limit: self.hourly_limit,
                    daily_limit: self.daily_limit,
                };
            }
        };

        let daily_count = recent.len();
        let hourly_count = recent
            .iter()
            .filter(|record| record.created_at >= hour_cutoff)
            .count();
        RateLimitDecision {
            allowed: hourly_count < self.hourly_limit && daily_count < self.daily_limit,
            hourly_count,
            daily_count,
            hourly_limit: self.hourly_limit,
            daily_limit: self.daily_limit,
        }
    }
}
