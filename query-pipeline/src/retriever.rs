//! Hybrid retrieval: both signals queried concurrently, then rank-fused.

use std::sync::Arc;

use common::{error::AppError, storage::db::SurrealDbClient};

use crate::scoring::{reciprocal_rank_fusion, RrfConfig};
use crate::search::{keyword_search, vector_search};
use crate::FusedResult;

pub struct HybridRetriever {
    db: Arc<SurrealDbClient>,
    rrf: RrfConfig,
    top_k: usize,
}

impl HybridRetriever {
    pub fn new(db: Arc<SurrealDbClient>, rrf: RrfConfig, top_k: usize) -> Self {
        Self { db, rrf, top_k }
    }

    /// Run both retrieval signals concurrently, fuse, and keep the top k.
    ///
    /// Each signal fetches `2 * top_k` candidates so fusion has enough
    /// overlap to reorder before the final cut. Retrieval is all-or-nothing:
    /// if either signal fails the whole call fails rather than silently
    /// degrading to a single signal.
    pub async fn retrieve(
        &self,
        tenant_id: &str,
        query_text: &str,
        query_embedding: &[f32],
    ) -> Result<Vec<FusedResult>, AppError> {
        let fetch = self.top_k * 2;
        let (dense, lexical) = tokio::try_join!(
            vector_search(&self.db, tenant_id, query_embedding, fetch),
            keyword_search(&self.db, tenant_id, query_text, fetch),
        )?;

        let mut fused = reciprocal_rank_fusion(dense, lexical, &self.rrf);
        fused.truncate(self.top_k);
        Ok(fused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::chunk_record::ChunkRecord;
    use common::utils::embedding::EmbeddingProvider;
    use uuid::Uuid;

    async fn seeded_db(provider: &EmbeddingProvider, texts: &[&str]) -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("memory db");
        db.ensure_initialized().await.expect("init");

        for (i, text) in texts.iter().enumerate() {
            let embedding = provider.embed(text).await.expect("embed");
            let chunk = ChunkRecord::new(
                format!("doc-{i}"),
                "tenant-a".into(),
                (*text).to_owned(),
                Some(i as u32 + 1),
                serde_json::json!({}),
                embedding,
            );
            db.store_item(chunk).await.expect("store chunk");
        }
        db.rebuild_indexes().await.expect("rebuild");
        db
    }

    #[tokio::test]
    async fn chunk_matching_both_signals_ranks_first() {
        let provider = EmbeddingProvider::new_hashed(256).expect("provider");
        let db = seeded_db(
            &provider,
            &[
                "tokio runtime scheduling internals",
                "postgres vacuum configuration notes",
                "kubernetes ingress controller setup",
            ],
        )
        .await;
        let retriever = HybridRetriever::new(Arc::new(db), RrfConfig::default(), 3);

        let query = "tokio runtime scheduling internals";
        let embedding = provider.embed(query).await.expect("embed");
        let results = retriever
            .retrieve("tenant-a", query, &embedding)
            .await
            .expect("retrieve");

        assert!(!results.is_empty());
        assert_eq!(results[0].text, "tokio runtime scheduling internals");
    }

    #[tokio::test]
    async fn results_are_capped_at_top_k() {
        let provider = EmbeddingProvider::new_hashed(256).expect("provider");
        let db = seeded_db(
            &provider,
            &[
                "rust borrow checker rules",
                "rust lifetime elision rules",
                "rust trait object rules",
                "rust macro hygiene rules",
            ],
        )
        .await;
        let retriever = HybridRetriever::new(Arc::new(db), RrfConfig::default(), 2);

        let embedding = provider.embed("rust rules").await.expect("embed");
        let results = retriever
            .retrieve("tenant-a", "rust rules", &embedding)
            .await
            .expect("retrieve");
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn empty_corpus_yields_empty_results() {
        let provider = EmbeddingProvider::new_hashed(256).expect("provider");
        let db = seeded_db(&provider, &[]).await;
        let retriever = HybridRetriever::new(Arc::new(db), RrfConfig::default(), 3);

        let embedding = provider.embed("anything at all").await.expect("embed");
        let results = retriever
            .retrieve("tenant-a", "anything at all", &embedding)
            .await
            .expect("retrieve");
        assert!(results.is_empty());
    }
}
