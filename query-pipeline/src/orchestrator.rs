//! The query orchestrator: one entry point that runs admission control,
//! both cache layers, hybrid retrieval, generation, ledger writes and the
//! cache write-back in order.
//!
//! Stage order is fixed: quota first (rejected requests must stay cheap),
//! then the exact cache (no embedding cost on a hit), then the semantic
//! cache, then retrieval and generation. The ledger append and cache
//! write-back only happen once an answer is fully computed.

use std::{sync::Arc, time::Instant};

use common::{
    error::{AppError, QuotaScope},
    storage::db::SurrealDbClient,
    storage::kv::KvStore,
    storage::types::query_log_entry::{Confidence, QueryLogEntry, Source},
    utils::config::AppConfig,
    utils::embedding::EmbeddingProvider,
};
use futures::{stream::BoxStream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::{
    cache::ExactCache,
    confidence::ConfidenceBands,
    generation::{AnswerGenerator, NO_CONTEXT_ANSWER},
    ledger::QueryLedger,
    quota::QuotaGuard,
    retriever::HybridRetriever,
    scoring::RrfConfig,
    FusedResult,
};

/// How many sources an answer may cite.
const MAX_CITATIONS: usize = 3;

/// Rate-limiter key for the query endpoint, shared by both response modes.
const QUERY_LIMITER: &str = "query";

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub top_k: usize,
    pub rate_limit_rpm: u32,
    pub max_queries_per_day: u32,
    pub answer_cache_ttl_secs: u64,
    pub semantic_cache_threshold: f32,
    pub bands: ConfidenceBands,
    pub rrf: RrfConfig,
    pub stream_fragment_chars: usize,
    pub store_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            rate_limit_rpm: 60,
            max_queries_per_day: 50,
            answer_cache_ttl_secs: 600,
            semantic_cache_threshold: 0.95,
            bands: ConfidenceBands::default(),
            rrf: RrfConfig::default(),
            stream_fragment_chars: 64,
            store_timeout_ms: 500,
        }
    }
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            top_k: config.top_k,
            rate_limit_rpm: config.rate_limit_rpm,
            max_queries_per_day: config.max_queries_per_day,
            answer_cache_ttl_secs: config.answer_cache_ttl_secs,
            semantic_cache_threshold: config.semantic_cache_threshold,
            bands: ConfidenceBands {
                high: config.confidence_high,
                medium: config.confidence_medium,
            },
            rrf: RrfConfig::default(),
            stream_fragment_chars: config.stream_fragment_chars,
            store_timeout_ms: config.store_timeout_ms,
        }
    }
}

/// Which cache layer, if any, served the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    Miss,
    Exact,
    Semantic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub remaining_minute: u32,
    pub remaining_today: u32,
    /// False when a quota check failed open because the store was
    /// unreachable.
    pub store_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub confidence: Confidence,
    pub latency_ms: u64,
    pub quota: QuotaStatus,
    pub cache: CacheOutcome,
}

/// One frame of a streamed response: answer fragments, then the metadata
/// trailer, then the end-of-stream marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryEvent {
    Content {
        text: String,
    },
    Meta {
        sources: Vec<Source>,
        confidence: Confidence,
        latency_ms: u64,
        quota: QuotaStatus,
    },
    Done,
}

enum Plan {
    Cached {
        answer: String,
        sources: Vec<Source>,
        confidence: Confidence,
        outcome: CacheOutcome,
    },
    NoContext {
        query_vector: Vec<f32>,
    },
    Generate {
        results: Vec<FusedResult>,
        confidence: Confidence,
        sources: Vec<Source>,
        query_vector: Vec<f32>,
    },
}

enum CollectorMsg {
    Fragment(String),
    Complete,
}

pub struct QueryOrchestrator {
    embeddings: Arc<EmbeddingProvider>,
    generator: Arc<dyn AnswerGenerator>,
    quota: QuotaGuard,
    cache: ExactCache,
    ledger: QueryLedger,
    retriever: HybridRetriever,
    config: PipelineConfig,
}

impl QueryOrchestrator {
    pub fn new(
        db: Arc<SurrealDbClient>,
        kv: Arc<dyn KvStore>,
        embeddings: Arc<EmbeddingProvider>,
        generator: Arc<dyn AnswerGenerator>,
        config: PipelineConfig,
    ) -> Self {
        let store_timeout = std::time::Duration::from_millis(config.store_timeout_ms);
        Self {
            embeddings,
            generator,
            quota: QuotaGuard::new(kv.clone(), store_timeout),
            cache: ExactCache::new(
                kv,
                std::time::Duration::from_secs(config.answer_cache_ttl_secs),
                store_timeout,
            ),
            ledger: QueryLedger::spawn(db.clone()),
            retriever: HybridRetriever::new(db, config.rrf, config.top_k),
            config,
        }
    }

    pub fn ledger(&self) -> &QueryLedger {
        &self.ledger
    }

    /// Answer a query in one shot.
    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn query(
        &self,
        tenant_id: &str,
        query_text: &str,
        persona: Option<&str>,
    ) -> Result<QueryResponse, AppError> {
        let (plan, quota, started) = self.prepare(tenant_id, query_text).await?;

        match plan {
            Plan::Cached {
                answer,
                sources,
                confidence,
                outcome,
            } => {
                let latency_ms = elapsed_ms(started);
                info!(cache = ?outcome, latency_ms, "served cached answer");
                Ok(QueryResponse {
                    answer,
                    sources,
                    confidence,
                    latency_ms,
                    quota,
                    cache: outcome,
                })
            }
            Plan::NoContext { query_vector } => {
                let latency_ms = elapsed_ms(started);
                self.record(
                    tenant_id,
                    query_text,
                    Some(query_vector),
                    NO_CONTEXT_ANSWER,
                    Confidence::Low,
                    &[],
                    latency_ms,
                )
                .await;
                info!(latency_ms, "no usable context, served canned answer");
                Ok(QueryResponse {
                    answer: NO_CONTEXT_ANSWER.to_owned(),
                    sources: Vec::new(),
                    confidence: Confidence::Low,
                    latency_ms,
                    quota,
                    cache: CacheOutcome::Miss,
                })
            }
            Plan::Generate {
                results,
                confidence,
                sources,
                query_vector,
            } => {
                let answer = self
                    .generator
                    .generate(query_text, &results, persona)
                    .await?;
                let latency_ms = elapsed_ms(started);
                self.record(
                    tenant_id,
                    query_text,
                    Some(query_vector),
                    &answer,
                    confidence,
                    &sources,
                    latency_ms,
                )
                .await;
                info!(?confidence, latency_ms, "generated answer");
                Ok(QueryResponse {
                    answer,
                    sources,
                    confidence,
                    latency_ms,
                    quota,
                    cache: CacheOutcome::Miss,
                })
            }
        }
    }

    /// Answer a query as a stream of [`QueryEvent`]s.
    ///
    /// Cached and canned answers are replayed in fragments so clients see a
    /// single shape regardless of cache outcome. For generated answers the
    /// ledger write is owned by a collector task fed through a channel: if
    /// the client disconnects mid-stream the stream is dropped, the channel
    /// closes, and the collector still records the partial answer. The
    /// cache write-back only happens when generation ran to completion.
    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn query_stream(
        &self,
        tenant_id: &str,
        query_text: &str,
        persona: Option<&str>,
    ) -> Result<BoxStream<'static, Result<QueryEvent, AppError>>, AppError> {
        let (plan, quota, started) = self.prepare(tenant_id, query_text).await?;
        let fragment_chars = self.config.stream_fragment_chars;

        match plan {
            Plan::Cached {
                answer,
                sources,
                confidence,
                outcome,
            } => {
                info!(cache = ?outcome, "streaming cached answer");
                Ok(replay_stream(
                    answer,
                    sources,
                    confidence,
                    quota,
                    started,
                    fragment_chars,
                ))
            }
            Plan::NoContext { query_vector } => {
                self.record(
                    tenant_id,
                    query_text,
                    Some(query_vector),
                    NO_CONTEXT_ANSWER,
                    Confidence::Low,
                    &[],
                    elapsed_ms(started),
                )
                .await;
                info!("no usable context, streaming canned answer");
                Ok(replay_stream(
                    NO_CONTEXT_ANSWER.to_owned(),
                    Vec::new(),
                    Confidence::Low,
                    quota,
                    started,
                    fragment_chars,
                ))
            }
            Plan::Generate {
                results,
                confidence,
                sources,
                query_vector,
            } => {
                let mut generated = self
                    .generator
                    .generate_stream(query_text, &results, persona)
                    .await?;

                let (tx, mut rx) = mpsc::channel::<CollectorMsg>(64);
                let ledger = self.ledger.clone();
                let cache = self.cache.clone();
                let tenant = tenant_id.to_owned();
                let text = query_text.to_owned();
                let collector_sources = sources.clone();
                tokio::spawn(async move {
                    let mut answer = String::new();
                    let mut completed = false;
                    while let Some(msg) = rx.recv().await {
                        match msg {
                            CollectorMsg::Fragment(fragment) => answer.push_str(&fragment),
                            CollectorMsg::Complete => completed = true,
                        }
                    }
                    if answer.is_empty() && !completed {
                        return;
                    }
                    let latency_ms = elapsed_ms(started);
                    ledger.append(QueryLogEntry::new(
                        tenant.clone(),
                        text.clone(),
                        Some(query_vector),
                        answer.clone(),
                        confidence,
                        collector_sources.clone(),
                        latency_ms,
                    ));
                    if completed {
                        cache
                            .store(
                                &tenant,
                                &text,
                                &answer,
                                &collector_sources,
                                confidence,
                                latency_ms,
                            )
                            .await;
                    } else {
                        debug!(tenant_id = %tenant, "stream ended early, recorded partial answer");
                    }
                });

                let stream = async_stream::stream! {
                    while let Some(item) = generated.next().await {
                        match item {
                            Ok(fragment) => {
                                let _ = tx.send(CollectorMsg::Fragment(fragment.clone())).await;
                                yield Ok(QueryEvent::Content { text: fragment });
                            }
                            Err(error) => {
                                yield Err(error);
                                return;
                            }
                        }
                    }
                    let _ = tx.send(CollectorMsg::Complete).await;
                    yield Ok(QueryEvent::Meta {
                        sources,
                        confidence,
                        latency_ms: elapsed_ms(started),
                        quota,
                    });
                    yield Ok(QueryEvent::Done);
                };
                Ok(stream.boxed())
            }
        }
    }

    /// Stages shared by both response modes: validation, both quotas, both
    /// cache layers, then retrieval and scoring.
    async fn prepare(
        &self,
        tenant_id: &str,
        query_text: &str,
    ) -> Result<(Plan, QuotaStatus, Instant), AppError> {
        let started = Instant::now();
        if query_text.trim().is_empty() {
            return Err(AppError::Validation("query text must not be empty".into()));
        }

        let rate = self
            .quota
            .admit(tenant_id, QUERY_LIMITER, self.config.rate_limit_rpm)
            .await;
        if !rate.allowed {
            return Err(AppError::QuotaExceeded {
                scope: QuotaScope::PerMinute,
                limit: rate.limit,
                remaining: 0,
                retry_after_secs: rate.retry_after_secs,
            });
        }
        let daily = self
            .quota
            .admit_daily(tenant_id, self.config.max_queries_per_day)
            .await;
        if !daily.allowed {
            return Err(AppError::QuotaExceeded {
                scope: QuotaScope::Daily,
                limit: daily.limit,
                remaining: 0,
                retry_after_secs: None,
            });
        }
        let quota = QuotaStatus {
            remaining_minute: rate.remaining,
            remaining_today: daily.remaining,
            store_available: rate.store_available && daily.store_available,
        };

        if let Some(hit) = self.cache.get(tenant_id, query_text).await {
            debug!("exact cache hit");
            // Refresh so frequently asked questions stay resident.
            self.cache
                .store(
                    tenant_id,
                    query_text,
                    &hit.answer,
                    &hit.sources,
                    hit.confidence,
                    hit.latency_ms,
                )
                .await;
            return Ok((
                Plan::Cached {
                    answer: hit.answer,
                    sources: hit.sources,
                    confidence: hit.confidence,
                    outcome: CacheOutcome::Exact,
                },
                quota,
                started,
            ));
        }

        let query_vector = self.embeddings.embed(query_text).await?;

        let similar = match self
            .ledger
            .find_similar(tenant_id, &query_vector, self.config.semantic_cache_threshold)
            .await
        {
            Ok(similar) => similar,
            Err(error) => {
                warn!(%error, "semantic cache lookup failed, treating as miss");
                None
            }
        };
        if let Some(similar) = similar {
            debug!(similarity = similar.similarity, matched = %similar.query_text, "semantic cache hit");
            // A reused answer keeps its pedigree: the new phrasing joins the
            // corpus at high confidence and seeds the exact cache.
            let latency_ms = elapsed_ms(started);
            self.record(
                tenant_id,
                query_text,
                Some(query_vector),
                &similar.answer,
                Confidence::High,
                &similar.sources,
                latency_ms,
            )
            .await;
            return Ok((
                Plan::Cached {
                    answer: similar.answer,
                    sources: similar.sources,
                    confidence: Confidence::High,
                    outcome: CacheOutcome::Semantic,
                },
                quota,
                started,
            ));
        }

        let results = self
            .retriever
            .retrieve(tenant_id, query_text, &query_vector)
            .await?;
        if results.is_empty() {
            return Ok((Plan::NoContext { query_vector }, quota, started));
        }

        let confidence = self.config.bands.classify(&results);
        let sources = citation_sources(&results, confidence);
        Ok((
            Plan::Generate {
                results,
                confidence,
                sources,
                query_vector,
            },
            quota,
            started,
        ))
    }

    /// Append a ledger entry and write the answer back to the exact cache.
    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        tenant_id: &str,
        query_text: &str,
        query_vector: Option<Vec<f32>>,
        answer: &str,
        confidence: Confidence,
        sources: &[Source],
        latency_ms: u64,
    ) {
        self.ledger.append(QueryLogEntry::new(
            tenant_id.to_owned(),
            query_text.to_owned(),
            query_vector,
            answer.to_owned(),
            confidence,
            sources.to_vec(),
            latency_ms,
        ));
        self.cache
            .store(tenant_id, query_text, answer, sources, confidence, latency_ms)
            .await;
    }
}

/// Citations accompany answers the pipeline stands behind; low-confidence
/// answers carry none.
fn citation_sources(results: &[FusedResult], confidence: Confidence) -> Vec<Source> {
    if confidence == Confidence::Low {
        return Vec::new();
    }
    results
        .iter()
        .take(MAX_CITATIONS)
        .map(|result| Source {
            doc_id: result.doc_id.clone(),
            page: result.page_num,
            relevance: result.fused_score,
        })
        .collect()
}

/// Replay a fully known answer through the streaming event shape.
fn replay_stream(
    answer: String,
    sources: Vec<Source>,
    confidence: Confidence,
    quota: QuotaStatus,
    started: Instant,
    fragment_chars: usize,
) -> BoxStream<'static, Result<QueryEvent, AppError>> {
    let stream = async_stream::stream! {
        for fragment in split_fragments(&answer, fragment_chars) {
            yield Ok(QueryEvent::Content { text: fragment });
        }
        yield Ok(QueryEvent::Meta {
            sources,
            confidence,
            latency_ms: elapsed_ms(started),
            quota,
        });
        yield Ok(QueryEvent::Done);
    };
    stream.boxed()
}

/// Split on char boundaries so multi-byte text never tears mid-fragment.
fn split_fragments(answer: &str, fragment_chars: usize) -> Vec<String> {
    let chars: Vec<char> = answer.chars().collect();
    chars
        .chunks(fragment_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
