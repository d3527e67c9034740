use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use finback_events::NotifyError;
use finback_infra::{CommandResult, CommandWrapper, TransactionManager};

use crate::app::dto;
use crate::app::errors::ApiError;
use crate::app::routes::command_response;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_external_events))
        .route(
            "/configuration",
            get(get_configuration).put(update_configuration),
        )
}

/// Envelopes delivered to the outbox for the calling tenant, oldest first.
pub async fn list_external_events(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
) -> Response {
    let items = services.outbox.list_for_tenant(tenant.tenant_id());
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

/// The calling tenant's delivery switches.
pub async fn get_configuration(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
) -> Response {
    match services.gate.configurations_for(tenant.tenant_id()) {
        Ok(rows) => (
            StatusCode::OK,
            Json(json!({ "externalEventConfiguration": rows })),
        )
            .into_response(),
        Err(err) => ApiError::from(NotifyError::from(err)).into_response(),
    }
}

pub async fn update_configuration(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
    Json(body): Json<dto::UpdateEventConfigurationRequest>,
) -> Response {
    let tenant_id = tenant.tenant_id().clone();
    let outcome = services.processor.process::<ApiError, _>(
        CommandWrapper::new("UPDATE", "EXTERNAL_EVENT_CONFIGURATION"),
        || {
            let changed = services
                .gate
                .update_for(&tenant_id, &body.external_event_configurations)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            let revert: BTreeMap<String, bool> =
                changed.iter().map(|(name, enabled)| (name.clone(), !enabled)).collect();
            let gate = services.gate.clone();
            let tenant_id = tenant_id.clone();
            TransactionManager::register_rollback(move || {
                if let Err(err) = gate.update_for(&tenant_id, &revert) {
                    tracing::warn!(error = %err, "could not revert external event configuration");
                }
            });
            tracing::info!(changed = changed.len(), "external event configuration updated");
            Ok(CommandResult::new(json!({
                "changes": { "externalEventConfigurations": changed }
            })))
        },
    );
    command_response(StatusCode::OK, outcome)
}
