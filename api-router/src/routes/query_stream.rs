use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use futures::{Stream, StreamExt};
use query_pipeline::QueryEvent;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    api_state::ApiState,
    error::ApiError,
    middleware_tenant::TenantId,
    routes::query::{ensure_tenant_matches, QueryParams},
};

/// Streamed variant of the query endpoint. Emits the answer as SSE frames:
/// `content` fragments, one `meta` trailer, then a literal `[DONE]` marker.
pub async fn answer_query_stream(
    State(state): State<ApiState>,
    Extension(tenant): Extension<TenantId>,
    Json(params): Json<QueryParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    ensure_tenant_matches(&tenant, params.tenant_id.as_deref())?;

    info!(tenant_id = %tenant.0, query_chars = params.query.len(), "received streaming query");

    let events = state
        .orchestrator
        .query_stream(&tenant.0, &params.query, params.persona.as_deref())
        .await?;

    let sse_stream = events.map(|item| {
        Ok(match item {
            Ok(QueryEvent::Done) => Event::default().data("[DONE]"),
            Ok(event) => {
                Event::default().data(serde_json::to_string(&event).unwrap_or_default())
            }
            Err(error) => {
                warn!(%error, "stream failed mid-flight");
                Event::default()
                    .event("error")
                    .data(json!({"error": "answer generation failed"}).to_string())
            }
        })
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}
