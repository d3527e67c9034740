use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use finback_core::DomainError;
use finback_events::NotifyError;
use finback_infra::{ProcessError, TransactionError};
use finback_portfolio::PortfolioError;

/// Everything a handler can fail with.
///
/// Rendered as `{"error": <code>, "message": <text>}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("{0}")]
    BadRequest(String),
}

impl From<PortfolioError> for ApiError {
    fn from(value: PortfolioError) -> Self {
        match value {
            PortfolioError::Domain(e) => ApiError::Domain(e),
            PortfolioError::Notify(e) => ApiError::Notify(e),
            PortfolioError::Transaction(e) => ApiError::Transaction(e),
        }
    }
}

fn domain_status(err: &DomainError) -> (StatusCode, &'static str) {
    let status = match err {
        DomainError::Validation(_) | DomainError::InvalidId(_) => StatusCode::BAD_REQUEST,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::InvariantViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, err.code())
}

fn notify_status(err: &NotifyError) -> (StatusCode, &'static str) {
    match err {
        NotifyError::Listener { source, .. } => domain_status(source),
        NotifyError::Sink(_) => (StatusCode::BAD_GATEWAY, "external_delivery_failed"),
        NotifyError::Gate(_) => (StatusCode::INTERNAL_SERVER_ERROR, "event_configuration_error"),
        NotifyError::BulkEventRaised(_)
        | NotifyError::FrameStackUnderflow
        | NotifyError::NoActiveFrame => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

fn transaction_status(err: &TransactionError) -> (StatusCode, &'static str) {
    match err {
        TransactionError::Synchronization(e) => notify_status(e),
        TransactionError::RollbackOnly => (StatusCode::CONFLICT, "rolled_back"),
        TransactionError::OutOfOrder { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Domain(e) => domain_status(e),
            ApiError::Notify(e) => notify_status(e),
            ApiError::Transaction(e) => transaction_status(e),
            ApiError::Process(e) => match e {
                ProcessError::CommandInProgress(_) => (StatusCode::CONFLICT, "command_in_progress"),
                ProcessError::MissingTenant => (StatusCode::BAD_REQUEST, "missing_tenant"),
                ProcessError::Ledger(_) => (StatusCode::INTERNAL_SERVER_ERROR, "command_ledger_error"),
                ProcessError::Transaction(e) => transaction_status(e),
                ProcessError::Domain(e) => domain_status(e),
                ProcessError::Notify(e) => notify_status(e),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code, "request failed");
        } else {
            tracing::debug!(error = %self, code, "request rejected");
        }
        json_error(status, code, self.to_string())
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use finback_events::SinkError;

    use super::*;

    #[test]
    fn status_follows_the_error_kind() {
        let cases = [
            (ApiError::from(DomainError::validation("x")), StatusCode::BAD_REQUEST),
            (ApiError::from(DomainError::not_found("loan 1")), StatusCode::NOT_FOUND),
            (ApiError::from(DomainError::conflict("x")), StatusCode::CONFLICT),
            (ApiError::from(DomainError::invariant("x")), StatusCode::UNPROCESSABLE_ENTITY),
            (
                ApiError::from(ProcessError::CommandInProgress("k".into())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(TransactionError::Synchronization(NotifyError::Sink(
                    SinkError::Unavailable("down".into()),
                ))),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::from(NotifyError::FrameStackUnderflow),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_and_code().0, expected, "{err}");
        }
    }

    #[test]
    fn portfolio_errors_keep_their_kind() {
        let err = ApiError::from(PortfolioError::Domain(DomainError::not_found("client 9")));
        assert_eq!(err.status_and_code(), (StatusCode::NOT_FOUND, DomainError::not_found("").code()));
    }
}
