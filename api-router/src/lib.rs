use api_state::ApiState;
use axum::{
    extract::FromRef,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use middleware_tenant::require_tenant;
use routes::{
    liveness::live, query::answer_query, query_stream::answer_query_stream, readiness::ready,
};

pub mod api_state;
pub mod error;
pub mod middleware_tenant;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(_app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    // Tenant-scoped endpoints: the gateway authenticates and asserts the
    // tenant; this layer requires and validates that assertion.
    let scoped = Router::new()
        .route("/query", post(answer_query))
        .route("/query/stream", post(answer_query_stream))
        .route_layer(from_fn(require_tenant));

    public.merge(scoped)
}
