use std::sync::Arc;

use common::{
    storage::{
        db::SurrealDbClient,
        kv::{KvStore, MemoryKvStore},
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use query_pipeline::{
    generation::OpenAiGenerator, orchestrator::PipelineConfig, QueryOrchestrator,
};

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<QueryOrchestrator>,
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
}

impl ApiState {
    pub async fn new(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );
        db.ensure_initialized().await?;

        let openai_client = Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ));
        let embedding_provider =
            Arc::new(EmbeddingProvider::from_config(config, openai_client.clone())?);
        let generator = Arc::new(OpenAiGenerator::new(
            openai_client,
            config.chat_model.clone(),
        ));
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());

        let orchestrator = Arc::new(QueryOrchestrator::new(
            db.clone(),
            kv,
            embedding_provider,
            generator,
            PipelineConfig::from_app_config(config),
        ));

        Ok(Self {
            orchestrator,
            db,
            config: config.clone(),
        })
    }
}
