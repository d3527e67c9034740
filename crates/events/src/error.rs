//! Error taxonomy of the notification core.

use finback_core::DomainError;
use thiserror::Error;

use crate::event::EventType;
use crate::gate::GateError;
use crate::listener::Phase;
use crate::sink::SinkError;

#[derive(Debug, Error)]
pub enum NotifyError {
    /// A bulk event was passed to a raise entry point (programming error).
    #[error("bulk events are reserved for recording sessions and cannot be raised ({0} phase)")]
    BulkEventRaised(Phase),

    /// A listener rejected the event; later listeners were skipped.
    #[error("listener {listener} failed during {phase} dispatch of {event_type}: {source}")]
    Listener {
        phase: Phase,
        event_type: EventType,
        listener: String,
        source: DomainError,
    },

    /// External event configuration is missing or unreadable.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// The external sink failed (immediate delivery or commit-time flush).
    #[error("external delivery failed: {0}")]
    Sink(#[from] SinkError),

    /// Commit/rollback observed with no open event frame (programming error).
    #[error("transaction event buffer underflow: no frame to pop")]
    FrameStackUnderflow,

    /// A transaction is active but no event frame was opened for it.
    #[error("transaction is active but no event frame is open on this thread")]
    NoActiveFrame,
}

impl NotifyError {
    /// Errors that indicate a wiring/programming bug rather than a runtime condition.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            NotifyError::BulkEventRaised(_)
                | NotifyError::FrameStackUnderflow
                | NotifyError::NoActiveFrame
        )
    }
}
