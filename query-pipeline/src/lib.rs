//! Tenant-scoped question answering over ingested document chunks.
//!
//! The pipeline runs hybrid retrieval (dense vectors plus BM25 full-text)
//! against SurrealDB, fuses the two rankings with reciprocal rank fusion,
//! layers an exact and a semantic answer cache in front of generation, and
//! records every served query in an append-only ledger. [`QueryOrchestrator`]
//! is the single entry point; everything else is a stage it composes.

pub mod cache;
pub mod confidence;
pub mod generation;
pub mod ledger;
pub mod orchestrator;
pub mod quota;
pub mod retriever;
pub mod scoring;
pub mod search;

pub use orchestrator::{CacheOutcome, QueryEvent, QueryOrchestrator, QueryResponse, QuotaStatus};

use serde::{Deserialize, Serialize};

/// One chunk as returned by a single retrieval signal, with that signal's
/// native score. Ordering within a signal's result list is what matters for
/// fusion; `raw_score` is kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub page_num: Option<u32>,
    pub raw_score: f32,
}

/// A chunk after rank fusion, carrying its accumulated fused score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub page_num: Option<u32>,
    pub fused_score: f32,
}
