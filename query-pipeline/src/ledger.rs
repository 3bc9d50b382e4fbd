//! Append-only ledger of served queries.
//!
//! Every answered query becomes a `query_log` row. Writes go through a
//! bounded channel to a background writer so the request path never blocks
//! on ledger persistence; a full channel drops the entry with a warning
//! rather than stalling a response. High-confidence rows double as the
//! semantic cache corpus, and the analytics reads aggregate over the table.

use std::sync::Arc;

use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    storage::types::query_log_entry::{QueryLogEntry, Source},
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;

const WRITE_QUEUE_DEPTH: usize = 256;

/// A prior high-confidence query close enough to serve as a cached answer.
#[derive(Debug, Clone, Deserialize)]
pub struct SimilarQuery {
    #[serde(deserialize_with = "common::storage::types::deserialize_flexible_id")]
    pub id: String,
    pub query_text: String,
    pub answer: String,
    pub sources: Vec<Source>,
    pub similarity: f32,
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub query_text: String,
    pub hits: u64,
}

#[derive(Debug, Deserialize)]
pub struct DailyVolume {
    pub day: String,
    pub queries: u64,
}

#[derive(Debug, Deserialize)]
pub struct UnansweredQuery {
    pub query_text: String,
    #[serde(deserialize_with = "common::storage::types::deserialize_datetime")]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone)]
pub struct QueryLedger {
    db: Arc<SurrealDbClient>,
    tx: mpsc::Sender<QueryLogEntry>,
}

impl QueryLedger {
    /// Start the background writer task and return a handle to it.
    pub fn spawn(db: Arc<SurrealDbClient>) -> Self {
        let (tx, mut rx) = mpsc::channel::<QueryLogEntry>(WRITE_QUEUE_DEPTH);
        let writer_db = db.clone();
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(error) = writer_db.store_item(entry).await {
                    warn!(%error, "failed to persist query log entry");
                }
            }
        });
        Self { db, tx }
    }

    /// Fire-and-forget append. Never blocks the caller; a saturated queue
    /// loses the entry, not the response.
    pub fn append(&self, entry: QueryLogEntry) {
        if let Err(error) = self.tx.try_send(entry) {
            warn!(%error, "query log queue full, dropping entry");
        }
    }

    /// Nearest prior high-confidence query by embedding similarity, if it
    /// clears `threshold`. Only rows that recorded an embedding participate.
    pub async fn find_similar(
        &self,
        tenant_id: &str,
        query_embedding: &[f32],
        threshold: f32,
    ) -> Result<Option<SimilarQuery>, AppError> {
        let mut response = self
            .db
            .query(
                "SELECT id, query_text, answer, sources,
                        vector::similarity::cosine(query_embedding, $query_embedding)
                            AS similarity
                 FROM query_log
                 WHERE tenant_id = $tenant_id
                   AND confidence = 'high'
                   AND type::is::array(query_embedding)
                 ORDER BY similarity DESC
                 LIMIT 1",
            )
            .bind(("query_embedding", query_embedding.to_vec()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .await?;

        let best: Option<SimilarQuery> = response.take(0)?;
        Ok(best.filter(|candidate| candidate.similarity >= threshold))
    }

    /// Most frequently asked query texts for a tenant.
    pub async fn top_queries(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<TopQuery>, AppError> {
        let mut response = self
            .db
            .query(
                "SELECT query_text, count() AS hits
                 FROM query_log
                 WHERE tenant_id = $tenant_id
                 GROUP BY query_text
                 ORDER BY hits DESC
                 LIMIT $limit",
            )
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("limit", limit as i64))
            .await?;

        Ok(response.take(0)?)
    }

    /// Query volume per calendar day, oldest first.
    pub async fn daily_volume(&self, tenant_id: &str) -> Result<Vec<DailyVolume>, AppError> {
        let mut response = self
            .db
            .query(
                "SELECT time::format(created_at, '%Y-%m-%d') AS day, count() AS queries
                 FROM query_log
                 WHERE tenant_id = $tenant_id
                 GROUP BY day
                 ORDER BY day ASC",
            )
            .bind(("tenant_id", tenant_id.to_owned()))
            .await?;

        Ok(response.take(0)?)
    }

    /// Recent queries the pipeline could not answer confidently. These are
    /// the content gaps a tenant should fill with new documents.
    pub async fn unanswered(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<UnansweredQuery>, AppError> {
        let mut response = self
            .db
            .query(
                "SELECT query_text, created_at
                 FROM query_log
                 WHERE tenant_id = $tenant_id AND confidence = 'low'
                 ORDER BY created_at DESC
                 LIMIT $limit",
            )
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("limit", limit as i64))
            .await?;

        Ok(response.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::query_log_entry::Confidence;
    use std::time::Duration;
    use uuid::Uuid;

    async fn ledger_with_db() -> (QueryLedger, Arc<SurrealDbClient>) {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &database)
                .await
                .expect("memory db"),
        );
        db.ensure_initialized().await.expect("init");
        (QueryLedger::spawn(db.clone()), db)
    }

    fn entry(
        tenant: &str,
        query: &str,
        embedding: Option<Vec<f32>>,
        confidence: Confidence,
    ) -> QueryLogEntry {
        QueryLogEntry::new(
            tenant.to_owned(),
            query.to_owned(),
            embedding,
            format!("answer to {query}"),
            confidence,
            vec![Source {
                doc_id: "doc-1".into(),
                page: Some(2),
                relevance: 0.5,
            }],
            42,
        )
    }

    async fn wait_for_entries(db: &SurrealDbClient, expected: usize) -> Vec<QueryLogEntry> {
        for _ in 0..100 {
            let entries: Vec<QueryLogEntry> =
                db.get_all_stored_items().await.expect("fetch entries");
            if entries.len() >= expected {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {expected} ledger entries to be persisted");
    }

    #[tokio::test]
    async fn appended_entries_reach_the_store() {
        let (ledger, db) = ledger_with_db().await;

        ledger.append(entry("tenant-a", "how do workers shut down", None, Confidence::Medium));
        let entries = wait_for_entries(&db, 1).await;
        assert_eq!(entries[0].query_text, "how do workers shut down");
        assert_eq!(entries[0].latency_ms, 42);
    }

    #[tokio::test]
    async fn find_similar_returns_only_close_high_confidence_rows() {
        let (ledger, db) = ledger_with_db().await;
        db.store_item(entry(
            "tenant-a",
            "stored question",
            Some(vec![1.0, 0.0]),
            Confidence::High,
        ))
        .await
        .expect("store");

        let hit = ledger
            .find_similar("tenant-a", &[1.0, 0.0], 0.95)
            .await
            .expect("lookup")
            .expect("expected a semantic hit");
        assert_eq!(hit.query_text, "stored question");
        assert!(hit.similarity >= 0.95);

        // Cosine 0.94 sits below the 0.95 threshold.
        let near_miss = ledger
            .find_similar("tenant-a", &[0.94, 0.34117], 0.95)
            .await
            .expect("lookup");
        assert!(near_miss.is_none());
    }

    #[tokio::test]
    async fn find_similar_ignores_lower_confidence_and_foreign_tenants() {
        let (ledger, db) = ledger_with_db().await;
        db.store_item(entry(
            "tenant-a",
            "medium question",
            Some(vec![1.0, 0.0]),
            Confidence::Medium,
        ))
        .await
        .expect("store");
        db.store_item(entry(
            "tenant-b",
            "other tenant question",
            Some(vec![1.0, 0.0]),
            Confidence::High,
        ))
        .await
        .expect("store");

        let result = ledger
            .find_similar("tenant-a", &[1.0, 0.0], 0.5)
            .await
            .expect("lookup");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn find_similar_skips_rows_without_embeddings() {
        let (ledger, db) = ledger_with_db().await;
        db.store_item(entry("tenant-a", "no embedding", None, Confidence::High))
            .await
            .expect("store");

        let result = ledger
            .find_similar("tenant-a", &[1.0, 0.0], 0.1)
            .await
            .expect("lookup");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn analytics_aggregate_per_tenant() {
        let (ledger, db) = ledger_with_db().await;
        for _ in 0..2 {
            db.store_item(entry("tenant-a", "popular question", None, Confidence::High))
                .await
                .expect("store");
        }
        db.store_item(entry("tenant-a", "rare question", None, Confidence::Low))
            .await
            .expect("store");
        db.store_item(entry("tenant-b", "foreign question", None, Confidence::Low))
            .await
            .expect("store");

        let top = ledger.top_queries("tenant-a", 5).await.expect("top");
        assert_eq!(top[0].query_text, "popular question");
        assert_eq!(top[0].hits, 2);
        assert_eq!(top.len(), 2);

        let volume = ledger.daily_volume("tenant-a").await.expect("volume");
        assert_eq!(volume.len(), 1);
        assert_eq!(volume[0].queries, 3);

        let gaps = ledger.unanswered("tenant-a", 5).await.expect("gaps");
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].query_text, "rare question");
    }
}
