use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use finback_core::{ClientId, LoanId, Money};
use finback_infra::{CommandResult, CommandWrapper};

use crate::app::dto;
use crate::app::errors::ApiError;
use crate::app::routes::command_response;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(open_loan))
        .route("/accruals", post(post_accruals))
        .route("/:id", get(get_loan))
        .route("/:id/repayments", post(make_repayment))
}

pub async fn open_loan(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
    Json(body): Json<dto::OpenLoanRequest>,
) -> Response {
    let outcome = services
        .processor
        .process::<ApiError, _>(CommandWrapper::new("CREATE", "LOAN"), || {
            let principal = Money::new(body.currency.as_str(), body.principal)?;
            let loan = services.loans.open_loan(
                tenant.tenant_id(),
                ClientId::new(body.client_id),
                principal,
                body.annual_rate_bps,
            )?;
            let changes = json!({
                "status": loan.status(),
                "outstanding": loan.outstanding().minor_units(),
            });
            Ok(CommandResult::new(dto::command_body(loan.id().get(), changes)).with_resource_id(loan.id()))
        });
    command_response(StatusCode::CREATED, outcome)
}

pub async fn make_repayment(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
    Path(id): Path<u64>,
    Json(body): Json<dto::RepaymentRequest>,
) -> Response {
    let outcome = services
        .processor
        .process::<ApiError, _>(CommandWrapper::new("REPAYMENT", "LOAN"), || {
            let loan = services
                .loans
                .make_repayment(tenant.tenant_id(), LoanId::new(id), body.amount)?;
            let changes = json!({
                "status": loan.status(),
                "outstanding": loan.outstanding().minor_units(),
            });
            Ok(CommandResult::new(dto::command_body(id, changes)).with_resource_id(id))
        });
    command_response(StatusCode::OK, outcome)
}

/// Post one day of interest on every active loan of the tenant.
pub async fn post_accruals(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
) -> Response {
    let outcome = services
        .processor
        .process::<ApiError, _>(CommandWrapper::new("ACCRUE", "LOAN"), || {
            let summary = services.loans.post_accruals(tenant.tenant_id())?;
            Ok(CommandResult::new(json!(summary)))
        });
    command_response(StatusCode::OK, outcome)
}

pub async fn get_loan(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
    Path(id): Path<u64>,
) -> Response {
    match services.loans.get_loan(tenant.tenant_id(), LoanId::new(id)) {
        Ok(loan) => {
            let activity = services.journal.for_loan(tenant.tenant_id(), id);
            (StatusCode::OK, Json(dto::loan_to_json(&loan, &activity))).into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}
