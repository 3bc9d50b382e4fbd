//! Contract for the document-processing collaborator.
//!
//! Upload, extraction and chunking happen outside this service. The query
//! core only needs to hand work over, so the queue is declared here as an
//! explicit trait with a declared retry policy instead of living inside a
//! task framework's decorators.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Retry schedule for failed processing attempts: exponential backoff from
/// `base_delay`, capped at `max_delay`, giving up after `max_attempts`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (1-based). `None` once the
    /// attempt budget is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentJob {
    pub doc_id: String,
    pub tenant_id: String,
    pub attempts: u32,
}

/// Hand-off point to the ingestion worker fleet.
#[async_trait]
pub trait DocumentJobQueue: Send + Sync {
    async fn enqueue(&self, job: DocumentJob) -> Result<(), AppError>;
    fn retry_policy(&self) -> RetryPolicy;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(25),
        };

        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(20)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(25)));
        assert_eq!(policy.delay_for(5), None);
    }

    #[test]
    fn zeroth_attempt_never_waits() {
        assert_eq!(RetryPolicy::default().delay_for(0), None);
    }
}
