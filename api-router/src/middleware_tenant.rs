use axum::{extract::Request, middleware::Next, response::Response};

use crate::error::ApiError;

/// Tenant identity attached to the request by the authenticating gateway.
#[derive(Debug, Clone)]
pub struct TenantId(pub String);

const TENANT_HEADER: &str = "x-tenant-id";
const MAX_TENANT_ID_LEN: usize = 64;

/// Require and validate the tenant header, making the tenant id available
/// to handlers as an extension. Authentication itself happens upstream;
/// this service only scopes by the identity the gateway asserts.
pub async fn require_tenant(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let tenant_id = request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::Unauthorized(format!("{TENANT_HEADER} header required")))?;

    if tenant_id.len() > MAX_TENANT_ID_LEN
        || !tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::ValidationError(format!(
            "{TENANT_HEADER} must be at most {MAX_TENANT_ID_LEN} alphanumeric, '-' or '_' characters"
        )));
    }

    let tenant_id = TenantId(tenant_id.to_owned());
    request.extensions_mut().insert(tenant_id);

    Ok(next.run(request).await)
}
