//! Per-tenant admission control: a sliding per-minute window plus a daily
//! counter that resets at UTC midnight.
//!
//! Both checks fail open: when the key-value store is unavailable or slow,
//! requests are admitted and the degradation is flagged on the decision so
//! callers can surface it.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Days, Utc};
use common::storage::kv::KvStore;
use tracing::warn;

const WINDOW_SECS: u64 = 60;

/// Outcome of the per-minute window check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after_secs: Option<u64>,
    pub store_available: bool,
}

/// Outcome of the daily counter check.
#[derive(Debug, Clone, Copy)]
pub struct DailyUsage {
    pub allowed: bool,
    pub current: u32,
    pub limit: u32,
    pub remaining: u32,
    pub store_available: bool,
}

#[derive(Clone)]
pub struct QuotaGuard {
    kv: Arc<dyn KvStore>,
    store_timeout: Duration,
}

impl QuotaGuard {
    pub fn new(kv: Arc<dyn KvStore>, store_timeout: Duration) -> Self {
        Self { kv, store_timeout }
    }

    /// Sliding-window check over the last 60 seconds. Rejected requests do
    /// not occupy window capacity, so a tenant hammering a full window is
    /// not locked out longer than the window itself.
    pub async fn admit(&self, tenant_id: &str, limiter: &str, limit: u32) -> RateDecision {
        self.admit_at(tenant_id, limiter, limit, Utc::now()).await
    }

    async fn admit_at(
        &self,
        tenant_id: &str,
        limiter: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let key = format!("rate:{tenant_id}:{limiter}");
        let now_ms = now.timestamp_millis();
        let check = self.kv.window_admit(&key, WINDOW_SECS, limit, now_ms);

        let outcome = match tokio::time::timeout(self.store_timeout, check).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                warn!(%error, tenant_id, "rate window check failed, admitting");
                return RateDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    retry_after_secs: None,
                    store_available: false,
                };
            }
            Err(_) => {
                warn!(tenant_id, "rate window check timed out, admitting");
                return RateDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    retry_after_secs: None,
                    store_available: false,
                };
            }
        };

        let retry_after_secs = if outcome.admitted {
            None
        } else {
            // Capacity frees up when the oldest recorded request ages out.
            outcome.oldest_ms.map(|oldest| {
                let reopens_ms = oldest + (WINDOW_SECS as i64) * 1000 - now_ms;
                (reopens_ms.max(0) as u64).div_ceil(1000).max(1)
            })
        };
        let used = outcome.count + u32::from(outcome.admitted);

        RateDecision {
            allowed: outcome.admitted,
            limit,
            remaining: limit.saturating_sub(used),
            retry_after_secs,
            store_available: true,
        }
    }

    /// Daily counter check. The counter is incremented first and rejected
    /// when the post-increment value exceeds the limit; the key expires at
    /// the next UTC midnight.
    pub async fn admit_daily(&self, tenant_id: &str, limit: u32) -> DailyUsage {
        self.admit_daily_at(tenant_id, limit, Utc::now()).await
    }

    async fn admit_daily_at(&self, tenant_id: &str, limit: u32, now: DateTime<Utc>) -> DailyUsage {
        let key = format!("daily:{tenant_id}:{}", now.format("%Y-%m-%d"));

        let count = match tokio::time::timeout(self.store_timeout, self.kv.increment(&key)).await {
            Ok(Ok(count)) => count,
            Ok(Err(error)) => {
                warn!(%error, tenant_id, "daily quota check failed, admitting");
                return DailyUsage {
                    allowed: true,
                    current: 0,
                    limit,
                    remaining: limit,
                    store_available: false,
                };
            }
            Err(_) => {
                warn!(tenant_id, "daily quota check timed out, admitting");
                return DailyUsage {
                    allowed: true,
                    current: 0,
                    limit,
                    remaining: limit,
                    store_available: false,
                };
            }
        };

        if count == 1 {
            let ttl = seconds_until_utc_midnight(now);
            if let Ok(Err(error)) =
                tokio::time::timeout(self.store_timeout, self.kv.expire(&key, ttl)).await
            {
                warn!(%error, tenant_id, "failed to set daily counter expiry");
            }
        }

        let current = u32::try_from(count).unwrap_or(u32::MAX);
        DailyUsage {
            allowed: current <= limit,
            current,
            limit,
            remaining: limit.saturating_sub(current),
            store_available: true,
        }
    }
}

fn seconds_until_utc_midnight(now: DateTime<Utc>) -> u64 {
    let next_midnight = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .map(|day| day.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    match next_midnight {
        Some(midnight) => {
            let remaining = midnight.and_utc().timestamp() - now.timestamp();
            remaining.max(1) as u64
        }
        None => 24 * 60 * 60,
    }
}
