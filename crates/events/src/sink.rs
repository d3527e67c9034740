//! External event sink abstraction (transport only).
//!
//! The sink is the off-process destination of reportable events: an outbox
//! table, a broker producer, an audit log. The notification core decides
//! *whether* and *when* an event reaches the sink; the sink decides *how*.
//!
//! ## Delivery semantics
//!
//! - `deliver` is synchronous and blocking; a slow sink blocks the caller
//!   (including the committing thread during a transaction flush).
//! - No timeout or retry is applied by the caller. Failures surface to the
//!   phase that attempted delivery.
//! - The sink reads tenant and correlation from the current
//!   [`RequestContext`](finback_core::RequestContext); the notifier restores
//!   the context captured when the event was buffered before each call.

use std::sync::Arc;

use thiserror::Error;

use crate::event::BusinessEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Delivery needs a tenant but none is bound to the current thread.
    #[error("no tenant bound to the current request context")]
    MissingTenant,

    /// The destination could not be reached.
    #[error("external sink unavailable: {0}")]
    Unavailable(String),

    /// The destination refused the event.
    #[error("external sink rejected event: {0}")]
    Rejected(String),
}

pub trait ExternalSink: Send + Sync {
    fn deliver(&self, event: &BusinessEvent) -> Result<(), SinkError>;
}

impl<S> ExternalSink for Arc<S>
where
    S: ExternalSink + ?Sized,
{
    fn deliver(&self, event: &BusinessEvent) -> Result<(), SinkError> {
        (**self).deliver(event)
    }
}
