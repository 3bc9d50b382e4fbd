use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::AppError;

/// Outcome of one atomic sliding-window admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    /// Whether the request was admitted (and its timestamp recorded).
    pub admitted: bool,
    /// Requests already inside the window, not counting this one.
    pub count: u32,
    /// Oldest surviving timestamp, for retry-after calculations.
    pub oldest_ms: Option<i64>,
}

/// Atomic key-value store with TTL and increment primitives.
///
/// The quota guard and the exact answer cache are both built on this seam,
/// injected rather than reached through a process-global client. Every
/// method must be atomic with respect to concurrent callers on the same
/// key; `window_admit` in particular folds evict-count-record-refresh into
/// a single round trip so two concurrent requests cannot both pass a limit
/// check that should reject the second.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
    /// Increment a counter, creating it at 1. Returns the new value.
    async fn increment(&self, key: &str) -> Result<i64, AppError>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), AppError>;
    /// Evict window entries older than `window_secs`, count the rest, and
    /// record `now_ms` only when the count is below `limit`.
    async fn window_admit(
        &self,
        key: &str,
        window_secs: u64,
        limit: u32,
        now_ms: i64,
    ) -> Result<WindowOutcome, AppError>;
}

enum Value {
    Text(String),
    Counter(i64),
    Window(VecDeque<i64>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process `KvStore` for single-node deployments and tests.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(match &entry.value {
                Value::Text(text) => Some(text.clone()),
                Value::Counter(n) => Some(n.to_string()),
                Value::Window(_) => None,
            }),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), AppError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Text(value.to_owned()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, AppError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.expired(now)) {
            entries.remove(key);
        }

        let entry = entries.entry(key.to_owned()).or_insert(Entry {
            value: Value::Counter(0),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Counter(n) => {
                *n += 1;
                Ok(*n)
            }
            Value::Text(text) => {
                let n = text
                    .parse::<i64>()
                    .map_err(|_| AppError::Validation(format!("key '{key}' is not a counter")))?
                    + 1;
                entry.value = Value::Counter(n);
                Ok(n)
            }
            Value::Window(_) => Err(AppError::Validation(format!(
                "key '{key}' holds a rate window, not a counter"
            ))),
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), AppError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn window_admit(
        &self,
        key: &str,
        window_secs: u64,
        limit: u32,
        now_ms: i64,
    ) -> Result<WindowOutcome, AppError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.expired(now)) {
            entries.remove(key);
        }

        let entry = entries.entry(key.to_owned()).or_insert(Entry {
            value: Value::Window(VecDeque::new()),
            expires_at: None,
        });
        let Value::Window(window) = &mut entry.value else {
            return Err(AppError::Validation(format!(
                "key '{key}' is not a rate window"
            )));
        };

        let cutoff = now_ms - (window_secs as i64) * 1000;
        while window.front().is_some_and(|ts| *ts <= cutoff) {
            window.pop_front();
        }

        let count = window.len() as u32;
        let oldest_ms = window.front().copied();
        let admitted = count < limit;
        if admitted {
            window.push_back(now_ms);
            entry.expires_at = Some(now + Duration::from_secs(window_secs + 1));
        }

        Ok(WindowOutcome {
            admitted,
            count,
            oldest_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_respect_ttl() {
        let store = MemoryKvStore::new();
        store.set_ex("k", "v", 60).await.expect("set");
        assert_eq!(store.get("k").await.expect("get"), Some("v".to_owned()));

        store.set_ex("gone", "v", 0).await.expect("set");
        assert_eq!(store.get("gone").await.expect("get"), None);
    }

    #[tokio::test]
    async fn increment_creates_and_counts() {
        let store = MemoryKvStore::new();
        assert_eq!(store.increment("n").await.expect("incr"), 1);
        assert_eq!(store.increment("n").await.expect("incr"), 2);
        assert_eq!(store.get("n").await.expect("get"), Some("2".to_owned()));

        store.expire("n", 0).await.expect("expire");
        assert_eq!(store.increment("n").await.expect("incr"), 1);
    }

    #[tokio::test]
    async fn window_admits_up_to_limit_within_same_second() {
        let store = MemoryKvStore::new();
        let now = 1_000_000;

        let first = store.window_admit("w", 60, 1, now).await.expect("admit");
        assert!(first.admitted);
        assert_eq!(first.count, 0);

        let second = store.window_admit("w", 60, 1, now).await.expect("admit");
        assert!(!second.admitted);
        assert_eq!(second.count, 1);
        assert_eq!(second.oldest_ms, Some(now));
    }

    #[tokio::test]
    async fn window_evicts_entries_older_than_window() {
        let store = MemoryKvStore::new();
        let t0 = 1_000_000;

        assert!(store
            .window_admit("w", 60, 1, t0)
            .await
            .expect("admit")
            .admitted);
        assert!(!store
            .window_admit("w", 60, 1, t0 + 30_000)
            .await
            .expect("admit")
            .admitted);

        // 61s later the original timestamp has aged out.
        let later = store
            .window_admit("w", 60, 1, t0 + 61_000)
            .await
            .expect("admit");
        assert!(later.admitted);
        assert_eq!(later.count, 0);
    }

    #[tokio::test]
    async fn rejected_requests_do_not_consume_window_capacity() {
        let store = MemoryKvStore::new();
        let t0 = 1_000_000;

        assert!(store
            .window_admit("w", 60, 1, t0)
            .await
            .expect("admit")
            .admitted);
        for i in 1..5 {
            let outcome = store
                .window_admit("w", 60, 1, t0 + i)
                .await
                .expect("admit");
            assert!(!outcome.admitted);
            assert_eq!(outcome.count, 1, "rejections must not be recorded");
        }
    }
}
