//! The two raw retrieval signals: dense vector similarity and BM25
//! full-text search, both scoped to a single tenant inside the query.

use common::{error::AppError, storage::db::SurrealDbClient};
use serde::Deserialize;

use crate::RankedResult;

#[derive(Debug, Deserialize)]
struct ChunkHit {
    #[serde(deserialize_with = "common::storage::types::deserialize_flexible_id")]
    id: String,
    doc_id: String,
    text: String,
    page_num: Option<u32>,
    raw_score: Option<f32>,
}

impl From<ChunkHit> for RankedResult {
    fn from(hit: ChunkHit) -> Self {
        RankedResult {
            chunk_id: hit.id,
            doc_id: hit.doc_id,
            text: hit.text,
            page_num: hit.page_num,
            raw_score: hit.raw_score.unwrap_or(0.0),
        }
    }
}

/// Nearest chunks by cosine similarity between the stored chunk embeddings
/// and the query embedding.
pub async fn vector_search(
    db: &SurrealDbClient,
    tenant_id: &str,
    query_embedding: &[f32],
    limit: usize,
) -> Result<Vec<RankedResult>, AppError> {
    let mut response = db
        .query(
            "SELECT id, doc_id, text, page_num,
                    vector::similarity::cosine(embedding, $query_embedding) AS raw_score
             FROM chunk_record
             WHERE tenant_id = $tenant_id
             ORDER BY raw_score DESC
             LIMIT $limit",
        )
        .bind(("query_embedding", query_embedding.to_vec()))
        .bind(("tenant_id", tenant_id.to_owned()))
        .bind(("limit", limit as i64))
        .await?;

    let hits: Vec<ChunkHit> = response.take(0)?;
    Ok(hits.into_iter().map(RankedResult::from).collect())
}

/// Best chunks by BM25 relevance against the analyzed `text` field.
pub async fn keyword_search(
    db: &SurrealDbClient,
    tenant_id: &str,
    terms: &str,
    limit: usize,
) -> Result<Vec<RankedResult>, AppError> {
    let mut response = db
        .query(
            "SELECT id, doc_id, text, page_num, search::score(0) AS raw_score
             FROM chunk_record
             WHERE tenant_id = $tenant_id AND text @0@ $terms
             ORDER BY raw_score DESC
             LIMIT $limit",
        )
        .bind(("tenant_id", tenant_id.to_owned()))
        .bind(("terms", terms.to_owned()))
        .bind(("limit", limit as i64))
        .await?;

    let hits: Vec<ChunkHit> = response.take(0)?;
    Ok(hits.into_iter().map(RankedResult::from).collect())
}
