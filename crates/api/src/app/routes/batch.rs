//! `POST /batches`: several resource calls in one request.
//!
//! Each item is dispatched against the resource router on the current
//! worker thread, under its own batch-item scope so idempotency attributes
//! of different items never mix. With `enclosingTransaction=true` the items
//! share one transaction: the first item that does not succeed rolls every
//! item back and is the only response returned.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Extension, Query, Request},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::Value as JsonValue;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use finback_core::RequestContext;
use finback_infra::Propagation;

use crate::app::dto::{BatchHeader, BatchParams, BatchRequestItem, BatchResponseItem};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

/// Router batch items are dispatched to (no request-scope layer: the batch
/// request already holds the scope).
#[derive(Clone)]
pub struct BatchRouter(pub Router);

pub async fn run_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(BatchRouter(resources)): Extension<BatchRouter>,
    Query(params): Query<BatchParams>,
    Json(items): Json<Vec<BatchRequestItem>>,
) -> Response {
    info!(
        items = items.len(),
        enclosing = params.enclosing_transaction,
        "batch received"
    );
    if params.enclosing_transaction {
        return run_enclosed(&services, &resources, items).await;
    }

    let mut responses = Vec::with_capacity(items.len());
    for item in items {
        responses.push(serve_item(&services, &resources, item).await);
    }
    (StatusCode::OK, Json(responses)).into_response()
}

async fn run_enclosed(
    services: &AppServices,
    resources: &Router,
    items: Vec<BatchRequestItem>,
) -> Response {
    let transactions = services.transactions.clone();
    let tx = match transactions.begin(Propagation::RequiresNew) {
        Ok(tx) => tx,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let mut responses = Vec::with_capacity(items.len());
    for item in items {
        let response = serve_item(services, resources, item).await;
        if !(200..300).contains(&response.status_code) {
            warn!(
                request_id = response.request_id,
                status = response.status_code,
                "batch item failed; rolling back the batch"
            );
            if let Err(err) = tx.rollback() {
                warn!(error = %err, "batch rollback failed");
            }
            return (StatusCode::OK, Json(vec![response])).into_response();
        }
        responses.push(response);
    }

    match tx.commit() {
        Ok(()) => (StatusCode::OK, Json(responses)).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn serve_item(
    services: &AppServices,
    resources: &Router,
    item: BatchRequestItem,
) -> BatchResponseItem {
    let request_id = item.request_id;
    let request = match into_request(item) {
        Ok(request) => request,
        Err(message) => return item_error(request_id, message),
    };
    debug!(request_id, method = %request.method(), uri = %request.uri(), "serving batch item");

    let _item = RequestContext::enter_batch_item(request_id);
    let response = services
        .coordinator
        .wrap(request, |request| async move {
            match resources.clone().oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            }
        })
        .await;
    into_item(request_id, response).await
}

fn into_request(item: BatchRequestItem) -> Result<Request, String> {
    let method = Method::from_bytes(item.method.to_ascii_uppercase().as_bytes())
        .map_err(|e| format!("invalid method '{}': {e}", item.method))?;
    let uri = format!("/{}", item.relative_url.trim_start_matches('/'));

    let mut builder = Request::builder().method(method).uri(uri);
    for h in &item.headers {
        builder = builder.header(h.name.as_str(), h.value.as_str());
    }
    let has_content_type = item
        .headers
        .iter()
        .any(|h| h.name.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()));

    let body = match item.body {
        None => Body::empty(),
        Some(JsonValue::String(raw)) => Body::from(raw),
        Some(value) => Body::from(value.to_string()),
    };
    if !has_content_type {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
    }
    builder.body(body).map_err(|e| e.to_string())
}

async fn into_item(request_id: u64, response: Response) -> BatchResponseItem {
    let (parts, body) = response.into_parts();
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|value| BatchHeader {
                name: name.as_str().to_string(),
                value: value.to_string(),
            })
        })
        .collect();
    let body = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => item_body(request_id, bytes.to_vec()),
        Err(err) => {
            warn!(request_id, error = %err, "could not read batch item response");
            None
        }
    };
    BatchResponseItem {
        request_id,
        status_code: parts.status.as_u16(),
        headers,
        body,
    }
}

/// Item bodies travel as JSON strings, so only UTF-8 bodies are kept.
fn item_body(request_id: u64, bytes: Vec<u8>) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    match String::from_utf8(bytes) {
        Ok(body) => Some(body),
        Err(_) => {
            warn!(request_id, "batch item response is not UTF-8; body dropped");
            None
        }
    }
}

fn item_error(request_id: u64, message: String) -> BatchResponseItem {
    BatchResponseItem {
        request_id,
        status_code: StatusCode::BAD_REQUEST.as_u16(),
        headers: Vec::new(),
        body: Some(
            serde_json::json!({ "error": "bad_request", "message": message }).to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(method: &str, url: &str, body: Option<JsonValue>) -> BatchRequestItem {
        BatchRequestItem {
            request_id: 1,
            relative_url: url.to_string(),
            method: method.to_string(),
            headers: vec![BatchHeader {
                name: "Idempotency-Key".to_string(),
                value: "k1".to_string(),
            }],
            body,
        }
    }

    #[test]
    fn items_become_json_requests() {
        let request = into_request(item("post", "clients", Some(JsonValue::String("{}".into())))).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), "/clients");
        assert_eq!(request.headers()["idempotency-key"], "k1");
        assert_eq!(request.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn item_bodies_are_never_altered() {
        assert_eq!(item_body(1, Vec::new()), None);
        assert_eq!(item_body(1, b"{\"ok\":true}".to_vec()).as_deref(), Some("{\"ok\":true}"));
        assert_eq!(item_body(1, vec![0x7b, 0xff, 0xfe, 0x7d]), None);
    }

    #[tokio::test]
    async fn non_utf8_item_response_has_no_body() {
        let response = Response::builder()
            .status(StatusCode::OK)
            .body(Body::from(vec![0xffu8, 0x00, 0xfe]))
            .unwrap();
        let item = into_item(9, response).await;
        assert_eq!(item.status_code, 200);
        assert_eq!(item.body, None);
    }

    #[test]
    fn invalid_method_is_reported() {
        assert!(into_request(item("NOT A METHOD", "/clients", None)).is_err());
    }
}
