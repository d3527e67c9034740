//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: in-memory stack (notifier, transactions, ledger, outbox)
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};

use finback_infra::PlatformConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(config: PlatformConfig) -> Router {
    router(Arc::new(services::build_services(config)))
}

/// Router over already-wired services (tests keep a handle on them).
pub fn router(services: Arc<services::AppServices>) -> Router {
    let resources = routes::resources().layer(Extension(services.clone()));

    // Tenant-scoped routes: each request gets its own worker thread and scope.
    let scoped = resources
        .clone()
        .route("/batches", post(routes::batch::run_batch))
        .layer(Extension(routes::batch::BatchRouter(resources)))
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            services,
            middleware::request_scope,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(scoped)
}
