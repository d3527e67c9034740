//! `finback-core`: foundation types shared by every back-office crate.
//!
//! This crate contains **pure domain** primitives plus the request-scoped
//! context that travels with a worker thread (no infrastructure concerns).

pub mod context;
pub mod error;
pub mod id;
pub mod money;

pub use context::{AttributeScope, BatchItemGuard, ContextGuard, ContextSnapshot, RequestContext, SnapshotGuard};
pub use error::{DomainError, DomainResult};
pub use id::{ClientId, CommandId, CorrelationId, LoanId, TenantId};
pub use money::Money;
