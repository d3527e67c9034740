//! Idempotent replay around the handler chain.
//!
//! A request carrying the idempotency header is *keyed*: the key goes into
//! the [`RequestContext`] before the handler runs, and the command pipeline
//! decides whether to execute or replay. After the handler returns, a freshly
//! executed command's response is persisted through [`ReplayRecorder`] so a
//! retry can be answered from the ledger.
//!
//! Requests without the header pass through untouched.

use std::future::Future;

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::Request,
    http::{header, response::Parts, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use tracing::{debug, warn};

use finback_core::RequestContext;
use finback_infra::{ReplayRecorder, StoredResult};

use crate::app::errors::json_error;

pub const SERVED_FROM_CACHE: HeaderName = HeaderName::from_static("x-served-from-cache");

#[derive(Debug, Clone)]
pub struct IdempotentReplayCoordinator {
    header: HeaderName,
    recorder: ReplayRecorder,
    max_capture_bytes: usize,
}

impl IdempotentReplayCoordinator {
    pub fn new(header: HeaderName, recorder: ReplayRecorder, max_capture_bytes: usize) -> Self {
        Self {
            header,
            recorder,
            max_capture_bytes,
        }
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// The idempotency key carried by `headers`, if any. Blank values count
    /// as absent.
    pub fn extract_key(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    }

    /// Run `next` for `request`, capturing and storing its response when the
    /// request is keyed.
    pub async fn wrap<F, Fut>(&self, request: Request, next: F) -> Response
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let Some(key) = self.extract_key(request.headers()) else {
            return next(request).await;
        };
        RequestContext::set_idempotency_key(key.as_str());
        let capture = is_json(request.headers());

        let response = next(request).await;

        if !capture {
            debug!(idempotency_key = %key, "request body is not json; response not captured");
            return response;
        }
        self.finish(response).await
    }

    async fn finish(&self, response: Response) -> Response {
        let (parts, body) = response.into_parts();
        let bytes = match to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to read response body for capture");
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "response body could not be read",
                );
            }
        };
        self.store(&parts, &bytes);
        Response::from_parts(parts, Body::from(bytes))
    }

    fn store(&self, parts: &Parts, bytes: &Bytes) {
        let Some(command_id) = RequestContext::command_id() else {
            return;
        };
        if RequestContext::store_result_flag() != Some(true) {
            return;
        }
        if !is_cacheable(parts.status, &parts.headers) {
            debug!(command_id = %command_id, status = %parts.status, "response not cacheable");
            return;
        }
        if bytes.len() > self.max_capture_bytes {
            warn!(
                command_id = %command_id,
                size = bytes.len(),
                limit = self.max_capture_bytes,
                "response too large to store for replay"
            );
            return;
        }
        let Ok(body) = std::str::from_utf8(bytes) else {
            warn!(command_id = %command_id, "response body is not utf-8; not stored");
            return;
        };

        let result = StoredResult {
            status: parts.status.as_u16(),
            body: body.to_owned(),
        };
        match self.recorder.record(command_id, result) {
            Ok(()) => debug!(command_id = %command_id, status = %parts.status, "response stored for replay"),
            Err(err) => warn!(command_id = %command_id, error = %err, "failed to store response for replay"),
        }
    }
}

/// Rebuild the response of a previously executed command.
pub fn replayed_response(stored: &StoredResult) -> Response {
    let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK);
    let mut response = Response::new(Body::from(stored.body.clone()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(SERVED_FROM_CACHE, HeaderValue::from_static("true"));
    response
}

pub fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

/// JSON responses are cacheable whatever their status; anything else only
/// when it succeeded.
pub fn is_cacheable(status: StatusCode, headers: &HeaderMap) -> bool {
    is_json(headers) || status.is_success()
}
