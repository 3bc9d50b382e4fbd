use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use serde::Deserialize;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError, middleware_tenant::TenantId};

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub query: String,
    pub persona: Option<String>,
    /// Optional echo of the tenant id. Must agree with the header when
    /// present; the header is authoritative.
    pub tenant_id: Option<String>,
}

pub(crate) fn ensure_tenant_matches(
    tenant: &TenantId,
    body_tenant: Option<&str>,
) -> Result<(), ApiError> {
    match body_tenant {
        Some(claimed) if claimed != tenant.0 => Err(ApiError::Forbidden(
            "tenant_id in body does not match x-tenant-id header".to_owned(),
        )),
        _ => Ok(()),
    }
}

pub async fn answer_query(
    State(state): State<ApiState>,
    Extension(tenant): Extension<TenantId>,
    Json(params): Json<QueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_tenant_matches(&tenant, params.tenant_id.as_deref())?;

    info!(tenant_id = %tenant.0, query_chars = params.query.len(), "received query");

    let response = state
        .orchestrator
        .query(&tenant.0, &params.query, params.persona.as_deref())
        .await?;

    Ok((StatusCode::OK, Json(response)))
}
