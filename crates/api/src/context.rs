use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, HeaderName, StatusCode},
    response::Response,
};

use finback_core::{CorrelationId, RequestContext, TenantId};

use crate::app::errors::json_error;

pub const TENANT_HEADER: HeaderName = HeaderName::from_static("x-tenant-id");
pub const CORRELATION_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// Build the context of an inbound request from its headers.
///
/// The tenant header is required; a missing correlation id is generated.
pub fn request_context(headers: &HeaderMap) -> Result<RequestContext, Response> {
    let tenant = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            json_error(
                StatusCode::BAD_REQUEST,
                "missing_tenant",
                "X-Tenant-Id header is required",
            )
        })?;
    let tenant_id = TenantId::parse(tenant)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_tenant", e.to_string()))?;

    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(CorrelationId::new)
        .unwrap_or_else(CorrelationId::generate);

    Ok(RequestContext::new(tenant_id).with_correlation_id(correlation_id))
}

/// Tenant of the request being served on the current thread.
///
/// Read from the installed [`RequestContext`], so it is available to batch
/// items as well as top-level requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(_parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        RequestContext::current_tenant()
            .map(TenantContext::new)
            .ok_or_else(|| {
                json_error(
                    StatusCode::BAD_REQUEST,
                    "missing_tenant",
                    "no tenant bound to this request",
                )
            })
    }
}
