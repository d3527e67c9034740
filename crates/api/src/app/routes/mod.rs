use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};

use finback_infra::CommandOutcome;

use crate::app::errors::ApiError;
use crate::idempotency;

pub mod batch;
pub mod clients;
pub mod external_events;
pub mod loans;
pub mod system;

/// Tenant-scoped resources. Batch items are dispatched against this router.
pub fn resources() -> Router {
    Router::new()
        .nest("/clients", clients::router())
        .nest("/loans", loans::router())
        .nest("/externalevents", external_events::router())
}

/// Render the outcome of a command: the handler's body with `status`, or the
/// stored response when the command was replayed.
pub fn command_response(status: StatusCode, outcome: Result<CommandOutcome, ApiError>) -> Response {
    match outcome {
        Ok(CommandOutcome::Executed(result)) => (status, Json(result.body)).into_response(),
        Ok(CommandOutcome::Replayed(stored)) => idempotency::replayed_response(&stored),
        Err(err) => err.into_response(),
    }
}
