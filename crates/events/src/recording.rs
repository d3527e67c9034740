//! Bulk recording: collapse the external events of one logical operation
//! into a single outbound envelope.
//!
//! The session is thread-local. While recording is enabled, every event that
//! passed external-delivery gating is appended here instead of being
//! delivered or buffered in a transaction frame.

use std::cell::RefCell;

use tracing::{debug, warn};

use crate::event::{BulkEvent, BusinessEvent, DomainEvent};

#[derive(Debug, Default)]
struct SessionState {
    enabled: bool,
    buffer: Vec<DomainEvent>,
}

thread_local! {
    static SESSION: RefCell<SessionState> = RefCell::new(SessionState::default());
}

/// Handle to the current thread's bulk-recording session.
///
/// All operations are idempotent with respect to repeated calls of the same
/// kind (a second `stop` sees an empty buffer).
#[derive(Debug, Copy, Clone, Default)]
pub struct BulkRecordingSession;

impl BulkRecordingSession {
    /// Enable recording and clear anything left in the buffer.
    pub fn start() {
        SESSION.with(|s| {
            let mut s = s.borrow_mut();
            if !s.buffer.is_empty() {
                warn!(stale = s.buffer.len(), "discarding stale recorded events on start");
            }
            s.enabled = true;
            s.buffer.clear();
        });
        debug!("bulk recording started");
    }

    pub fn is_recording() -> bool {
        SESSION.with(|s| s.borrow().enabled)
    }

    pub fn len() -> usize {
        SESSION.with(|s| s.borrow().buffer.len())
    }

    /// Append `event` if recording is enabled; hands it back otherwise.
    pub fn record(event: DomainEvent) -> Result<(), DomainEvent> {
        SESSION.with(|s| {
            let mut s = s.borrow_mut();
            if s.enabled {
                s.buffer.push(event);
                Ok(())
            } else {
                Err(event)
            }
        })
    }

    /// Disable recording and take what has to be flushed.
    ///
    /// - nothing recorded → `None`
    /// - one event → that event, unwrapped
    /// - two or more → one [`BulkEvent`] preserving recording order
    pub fn stop() -> Option<BusinessEvent> {
        let mut recorded = SESSION.with(|s| {
            let mut s = s.borrow_mut();
            s.enabled = false;
            std::mem::take(&mut s.buffer)
        });
        debug!(recorded = recorded.len(), "bulk recording stopped");

        match recorded.len() {
            0 => None,
            1 => recorded.pop().map(BusinessEvent::Domain),
            _ => Some(BusinessEvent::Bulk(BulkEvent::new(recorded))),
        }
    }

    /// Disable recording and drop the buffer without delivering anything.
    ///
    /// Returns the number of discarded events.
    pub fn reset() -> usize {
        SESSION
            .try_with(|s| {
                let mut s = s.borrow_mut();
                s.enabled = false;
                let dropped = s.buffer.len();
                s.buffer.clear();
                dropped
            })
            .unwrap_or(0)
    }
}
