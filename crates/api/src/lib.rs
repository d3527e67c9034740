//! HTTP API: tenant-scoped resources served thread-per-request, with
//! idempotent replay of keyed writes and batched sub-requests.

pub mod app;
pub mod context;
pub mod idempotency;
pub mod middleware;
