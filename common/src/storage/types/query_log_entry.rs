use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stored_object;

/// Coarse answer confidence band. Gates citation display and whether a
/// served query becomes part of the semantic-cache corpus (`High` only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Provenance entry surfaced alongside an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub doc_id: String,
    pub page: Option<u32>,
    pub relevance: f32,
}

stored_object!(QueryLogEntry, "query_log", {
    tenant_id: String,
    query_text: String,
    query_embedding: Option<Vec<f32>>,
    answer: String,
    confidence: Confidence,
    sources: Vec<Source>,
    latency_ms: u64,
});

impl QueryLogEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: String,
        query_text: String,
        query_embedding: Option<Vec<f32>>,
        answer: String,
        confidence: Confidence,
        sources: Vec<Source>,
        latency_ms: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            query_text,
            query_embedding,
            answer,
            confidence,
            sources,
            latency_ms,
        }
    }
}
