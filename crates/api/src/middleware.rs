use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use finback_core::{CorrelationId, RequestContext};
use finback_events::RequestScope;

use crate::app::errors::json_error;
use crate::app::services::AppServices;
use crate::context::{self, CORRELATION_HEADER};

/// Largest request body accepted on protected routes.
pub const MAX_REQUEST_BYTES: usize = 2 * 1024 * 1024;

/// Serve the request on a dedicated blocking worker thread, inside a
/// [`RequestScope`], with the idempotency coordinator around the handlers.
///
/// The body is buffered up front so the worker never waits on the socket.
pub async fn request_scope(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let context = match context::request_context(req.headers()) {
        Ok(context) => context,
        Err(rejection) => return rejection,
    };
    let (Some(tenant_id), Some(correlation_id)) = (
        context.tenant_id().cloned(),
        context.correlation_id().cloned(),
    ) else {
        return json_error(StatusCode::BAD_REQUEST, "missing_tenant", "no tenant in request context");
    };

    let (parts, body) = req.into_parts();
    let body = match to_bytes(body, MAX_REQUEST_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return json_error(StatusCode::PAYLOAD_TOO_LARGE, "body_too_large", err.to_string());
        }
    };
    let req = Request::from_parts(parts, Body::from(body));

    let span = tracing::info_span!(
        "request",
        tenant_id = %tenant_id,
        correlation_id = %correlation_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let runtime = tokio::runtime::Handle::current();
    let worker = tokio::task::spawn_blocking(move || {
        runtime.block_on(serve_scoped(services, context, req, next).instrument(span))
    });

    let mut response = match worker.await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(tenant_id = %tenant_id, error = %err, "request worker failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "request worker failed")
        }
    };
    echo_correlation(&mut response, &correlation_id);
    response
}

async fn serve_scoped(
    services: Arc<AppServices>,
    context: RequestContext,
    req: Request,
    next: Next,
) -> Response {
    let _scope = RequestScope::enter(context);
    let response = services
        .coordinator
        .wrap(req, |req| next.run(req))
        .await;
    tracing::debug!(status = %response.status(), "request served");
    response
}

fn echo_correlation(response: &mut Response, correlation_id: &CorrelationId) {
    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
}
