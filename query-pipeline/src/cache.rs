//! Exact answer cache keyed on the normalized query text.
//!
//! Sits in front of embedding, retrieval and generation. The store behind it
//! is treated as best-effort: any error or timeout is a cache miss, never a
//! failed request.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use common::storage::kv::KvStore;
use common::storage::types::query_log_entry::{Confidence, Source};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

/// A previously served answer as stored in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAnswer {
    /// Store key the entry was written under.
    pub key: String,
    pub answer: String,
    pub sources: Vec<Source>,
    pub confidence: Confidence,
    pub latency_ms: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ExactCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
    store_timeout: Duration,
}

impl ExactCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration, store_timeout: Duration) -> Self {
        Self {
            kv,
            ttl,
            store_timeout,
        }
    }

    /// Look up an answer for this tenant and query. Store errors, timeouts
    /// and undecodable entries all read as a miss.
    pub async fn get(&self, tenant_id: &str, query_text: &str) -> Option<CachedAnswer> {
        let key = cache_key(tenant_id, query_text);
        let raw = match tokio::time::timeout(self.store_timeout, self.kv.get(&key)).await {
            Ok(Ok(raw)) => raw?,
            Ok(Err(error)) => {
                warn!(%error, "answer cache read failed, treating as miss");
                return None;
            }
            Err(_) => {
                warn!("answer cache read timed out, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(cached) => Some(cached),
            Err(error) => {
                warn!(%error, "discarding undecodable answer cache entry");
                None
            }
        }
    }

    /// Write an answer back, stamping it with the configured TTL. Writing an
    /// already-cached answer again refreshes its expiry, so hot queries stay
    /// resident.
    pub async fn store(
        &self,
        tenant_id: &str,
        query_text: &str,
        answer: &str,
        sources: &[Source],
        confidence: Confidence,
        latency_ms: u64,
    ) {
        let key = cache_key(tenant_id, query_text);
        let entry = CachedAnswer {
            key: key.clone(),
            answer: answer.to_owned(),
            sources: sources.to_vec(),
            confidence,
            latency_ms,
            expires_at: Utc::now() + self.ttl,
        };
        let encoded = match serde_json::to_string(&entry) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(%error, "failed to encode answer cache entry");
                return;
            }
        };

        let write = self.kv.set_ex(&key, &encoded, self.ttl.as_secs());
        match tokio::time::timeout(self.store_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(%error, "answer cache write failed"),
            Err(_) => warn!("answer cache write timed out"),
        }
    }
}

/// Lowercased, whitespace-trimmed form used for cache identity.
fn normalize_query(query_text: &str) -> String {
    query_text.trim().to_lowercase()
}

fn cache_key(tenant_id: &str, query_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b":");
    hasher.update(normalize_query(query_text).as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("answer:{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::kv::MemoryKvStore;

    fn cache() -> ExactCache {
        ExactCache::new(
            Arc::new(MemoryKvStore::new()),
            Duration::from_secs(600),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn stores_and_serves_answers() {
        let cache = cache();
        cache
            .store("tenant-a", "What is tokio?", "An async runtime.", &[], Confidence::High, 120)
            .await;

        let hit = cache.get("tenant-a", "What is tokio?").await.expect("hit");
        assert_eq!(hit.answer, "An async runtime.");
        assert!(hit.key.starts_with("answer:"));
        assert_eq!(hit.confidence, Confidence::High);
        assert!(hit.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn normalization_makes_case_and_whitespace_irrelevant() {
        let cache = cache();
        cache
            .store("tenant-a", "what is tokio?", "An async runtime.", &[], Confidence::Medium, 80)
            .await;

        assert!(cache.get("tenant-a", "  What is TOKIO?  ").await.is_some());
        assert!(cache.get("tenant-a", "what is tokio").await.is_none());
    }

    #[tokio::test]
    async fn tenants_never_share_entries() {
        let cache = cache();
        cache
            .store("tenant-a", "shared question", "tenant-a answer", &[], Confidence::High, 50)
            .await;

        assert!(cache.get("tenant-b", "shared question").await.is_none());
    }

    #[tokio::test]
    async fn corrupt_entries_read_as_miss() {
        let kv = Arc::new(MemoryKvStore::new());
        let cache = ExactCache::new(
            kv.clone(),
            Duration::from_secs(600),
            Duration::from_millis(500),
        );

        let key = cache_key("tenant-a", "poisoned");
        kv.set_ex(&key, "{not json", 600).await.expect("seed");
        assert!(cache.get("tenant-a", "poisoned").await.is_none());
    }
}
