//! Caller-supplied deadlines for long-running pipelines.
//!
//! There is no cancellation propagation through the external gateways, so pipelines
//! check the deadline at each blocking-call boundary and abort with a timeout reason
//! instead of leaving a record stuck at `processing`.

use std::time::{Duration, Instant};
use thiserror::Error;

/// Raised when a pipeline observes that its deadline has passed.
#[derive(Debug, Error)]
#[error("deadline exceeded after {elapsed_ms}ms")]
pub struct DeadlineExceeded {
    /// Milliseconds elapsed since the deadline was armed.
    pub elapsed_ms: u128,
}

/// A monotonic deadline checked between pipeline stages.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Arm a deadline expiring `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Error if the budget has been spent.
    pub fn check(&self) -> Result<(), DeadlineExceeded> {
        let elapsed = self.started.elapsed();
        if elapsed > self.budget {
            Err(DeadlineExceeded {
                elapsed_ms: elapsed.as_millis(),
            })
        } else {
            Ok(())
        }
    }
}

/// Check an optional deadline, treating `None` as unbounded.
pub fn check_optional(deadline: Option<&Deadline>) -> Result<(), DeadlineExceeded> {
    match deadline {
        Some(deadline) => deadline.check(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_deadline_passes() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(deadline.check().is_ok());
        assert!(check_optional(Some(&deadline)).is_ok());
        assert!(check_optional(None).is_ok());
    }

    #[test]
    fn expired_deadline_fails() {
        let deadline = Deadline::after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(deadline.check().is_err());
    }
}
