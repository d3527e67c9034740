use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use finback_core::ClientId;
use finback_infra::{CommandResult, CommandWrapper};

use crate::app::errors::ApiError;
use crate::app::routes::command_response;
use crate::app::services::AppServices;
use crate::app::dto;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_client))
        .route("/:id", get(get_client))
        .route("/:id/activate", post(activate_client))
}

pub async fn create_client(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
    Json(body): Json<dto::CreateClientRequest>,
) -> Response {
    let outcome = services
        .processor
        .process::<ApiError, _>(CommandWrapper::new("CREATE", "CLIENT"), || {
            let client = services.clients.create_client(
                tenant.tenant_id(),
                &body.display_name,
                body.external_id.clone(),
            )?;
            let body = dto::command_body(client.id().get(), dto::client_to_json(&client));
            Ok(CommandResult::new(body).with_resource_id(client.id()))
        });
    command_response(StatusCode::CREATED, outcome)
}

pub async fn activate_client(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
    Path(id): Path<u64>,
) -> Response {
    let outcome = services
        .processor
        .process::<ApiError, _>(CommandWrapper::new("ACTIVATE", "CLIENT"), || {
            let client = services
                .clients
                .activate_client(tenant.tenant_id(), ClientId::new(id))?;
            let body = dto::command_body(id, serde_json::json!({ "status": client.status() }));
            Ok(CommandResult::new(body).with_resource_id(id))
        });
    command_response(StatusCode::OK, outcome)
}

pub async fn get_client(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
    Path(id): Path<u64>,
) -> Response {
    match services.clients.get_client(tenant.tenant_id(), ClientId::new(id)) {
        Ok(client) => (StatusCode::OK, Json(dto::client_to_json(&client))).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
