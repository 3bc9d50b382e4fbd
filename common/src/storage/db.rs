use std::ops::Deref;

use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};
use tracing::info;

use crate::error::AppError;

use super::types::StoredObject;

const FTS_ANALYZER_NAME: &str = "svar_en_analyzer";

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Define the analyzer, search and lookup indexes the pipeline relies
    /// on. Idempotent; safe to run on every startup.
    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        let analyzer = format!(
            "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME}
                TOKENIZERS class
                FILTERS lowercase, ascii, snowball(english);"
        );
        self.client.query(analyzer).await?.check()?;

        let indexes = format!(
            "DEFINE INDEX IF NOT EXISTS chunk_record_text_fts_idx ON TABLE chunk_record \
                 FIELDS text SEARCH ANALYZER {FTS_ANALYZER_NAME} BM25;
             DEFINE INDEX IF NOT EXISTS idx_chunk_record_tenant ON TABLE chunk_record \
                 FIELDS tenant_id;
             DEFINE INDEX IF NOT EXISTS idx_query_log_tenant ON TABLE query_log \
                 FIELDS tenant_id;
             DEFINE INDEX IF NOT EXISTS idx_query_log_confidence ON TABLE query_log \
                 FIELDS confidence;"
        );
        self.client.query(indexes).await?.check()?;

        info!("Storage schema and indexes initialized");
        Ok(())
    }

    pub async fn rebuild_indexes(&self) -> Result<(), Error> {
        self.client
            .query("REBUILD INDEX IF EXISTS chunk_record_text_fts_idx ON chunk_record")
            .await?;
        Ok(())
    }

    /// Store an object in its table, keyed by its own id.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::chunk_record::ChunkRecord;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn initialization_is_idempotent() {
        let db = memory_db().await;
        db.ensure_initialized().await.expect("first init");
        db.ensure_initialized().await.expect("second init");
    }

    #[tokio::test]
    async fn store_and_fetch_roundtrip() {
        let db = memory_db().await;
        db.ensure_initialized().await.expect("init");

        let chunk = ChunkRecord::new(
            "doc-1".into(),
            "tenant-a".into(),
            "Tokio uses cooperative scheduling.".into(),
            Some(4),
            serde_json::json!({}),
            vec![0.1, 0.2, 0.3],
        );

        let stored = db.store_item(chunk.clone()).await.expect("store");
        assert!(stored.is_some());

        let fetched = db
            .get_item::<ChunkRecord>(&chunk.id)
            .await
            .expect("fetch");
        let fetched = fetched.expect("chunk should exist");
        assert_eq!(fetched.text, chunk.text);
        assert_eq!(fetched.tenant_id, "tenant-a");
        assert_eq!(fetched.page_num, Some(4));
    }
}
