use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_rpm: u32,
    #[serde(default = "default_max_queries_per_day")]
    pub max_queries_per_day: u32,
    #[serde(default = "default_answer_cache_ttl_secs")]
    pub answer_cache_ttl_secs: u64,
    #[serde(default = "default_semantic_cache_threshold")]
    pub semantic_cache_threshold: f32,
    #[serde(default = "default_confidence_high")]
    pub confidence_high: f32,
    #[serde(default = "default_confidence_medium")]
    pub confidence_medium: f32,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_stream_fragment_chars")]
    pub stream_fragment_chars: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_backend() -> String {
    "openai".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_top_k() -> usize {
    3
}

fn default_rate_limit_rpm() -> u32 {
    60
}

fn default_max_queries_per_day() -> u32 {
    50
}

fn default_answer_cache_ttl_secs() -> u64 {
    600
}

fn default_semantic_cache_threshold() -> f32 {
    0.95
}

// Calibrated against cosine similarity in the pre-fusion pipeline. See
// query-pipeline::confidence for why these need retuning under RRF scores.
fn default_confidence_high() -> f32 {
    0.8
}

fn default_confidence_medium() -> f32 {
    0.6
}

fn default_store_timeout_ms() -> u64 {
    500
}

fn default_stream_fragment_chars() -> usize {
    64
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
