//! Per-request teardown of everything the event core keeps on a thread.

use finback_core::{ContextGuard, RequestContext};
use tracing::warn;

use crate::recording::BulkRecordingSession;
use crate::transaction::TransactionEventBuffer;

/// Binds a [`RequestContext`] to the current worker thread for the lifetime
/// of the scope.
///
/// Dropping the scope (on any exit path) resets the bulk-recording session,
/// discards leftover event frames and restores the previous context, so a
/// pooled thread never carries state into the next request.
#[must_use = "dropping the scope immediately tears the request down"]
#[derive(Debug)]
pub struct RequestScope {
    context: Option<ContextGuard>,
}

impl RequestScope {
    pub fn enter(context: RequestContext) -> Self {
        let stale = TransactionEventBuffer::discard_all();
        if stale > 0 {
            warn!(frames = stale, "discarded event frames left by a previous request");
        }
        BulkRecordingSession::reset();
        Self {
            context: Some(context.install()),
        }
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        let recorded = BulkRecordingSession::reset();
        if recorded > 0 {
            warn!(recorded, "request ended with an open recording session");
        }
        let frames = TransactionEventBuffer::discard_all();
        if frames > 0 {
            warn!(frames, "request ended with open event frames");
        }
        drop(self.context.take());
    }
}
