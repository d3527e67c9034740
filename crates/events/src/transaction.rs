//! Transaction-scoped buffering of external events.
//!
//! Each thread owns a stack of [`PendingEventFrame`]s, one per active
//! transaction that fired `after_begin`. Events buffered while a transaction
//! is open land in the top frame, together with the tenant/correlation that
//! was current when they were buffered. The frame is flushed in
//! `before_commit` and dropped on rollback.
//!
//! The buffer never starts or ends transactions itself; the host drives it
//! through [`TransactionSynchronization`].

use std::cell::RefCell;

use finback_core::ContextSnapshot;
use tracing::{debug, error};

use crate::error::NotifyError;
use crate::event::BusinessEvent;

/// Answers whether a transaction is open on the calling thread.
pub trait TransactionHost: Send + Sync {
    fn is_transaction_active(&self) -> bool;
}

impl<H> TransactionHost for std::sync::Arc<H>
where
    H: TransactionHost + ?Sized,
{
    fn is_transaction_active(&self) -> bool {
        (**self).is_transaction_active()
    }
}

/// Lifecycle callbacks a transaction host invokes around each transaction it
/// opens on the calling thread.
///
/// `before_commit` runs before the underlying commit; an error returned from
/// it turns the commit into a rollback.
pub trait TransactionSynchronization: Send + Sync {
    fn after_begin(&self) -> Result<(), NotifyError> {
        Ok(())
    }

    fn before_commit(&self) -> Result<(), NotifyError> {
        Ok(())
    }

    fn after_commit(&self) -> Result<(), NotifyError> {
        Ok(())
    }

    fn after_rollback(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// One buffered event and the context it was raised under.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub event: BusinessEvent,
    pub context: ContextSnapshot,
}

/// Events buffered for one open transaction, in buffering order.
#[derive(Debug, Default)]
pub struct PendingEventFrame {
    entries: Vec<PendingEntry>,
}

impl PendingEventFrame {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

thread_local! {
    static FRAMES: RefCell<Vec<PendingEventFrame>> = const { RefCell::new(Vec::new()) };
}

/// Handle to the current thread's frame stack.
#[derive(Debug, Copy, Clone, Default)]
pub struct TransactionEventBuffer;

impl TransactionEventBuffer {
    pub fn push_frame() {
        let depth = FRAMES.with(|f| {
            let mut frames = f.borrow_mut();
            frames.push(PendingEventFrame::default());
            frames.len()
        });
        debug!(frames = depth, "event frame opened");
    }

    pub fn depth() -> usize {
        FRAMES.with(|f| f.borrow().len())
    }

    /// Number of events waiting in the top frame.
    pub fn pending() -> usize {
        FRAMES.with(|f| f.borrow().last().map_or(0, PendingEventFrame::len))
    }

    /// Append `event` to the top frame, capturing the current context.
    pub fn enqueue(event: BusinessEvent) -> Result<(), NotifyError> {
        let context = finback_core::RequestContext::snapshot();
        FRAMES.with(|f| match f.borrow_mut().last_mut() {
            Some(frame) => {
                frame.entries.push(PendingEntry { event, context });
                Ok(())
            }
            None => {
                error!("transaction is active but no event frame is open");
                Err(NotifyError::NoActiveFrame)
            }
        })
    }

    /// Take the top frame's entries, leaving the (now empty) frame in place.
    ///
    /// Taking twice yields nothing the second time, so a frame is never
    /// delivered twice.
    pub fn take_pending() -> Vec<PendingEntry> {
        FRAMES.with(|f| {
            f.borrow_mut()
                .last_mut()
                .map(|frame| std::mem::take(&mut frame.entries))
                .unwrap_or_default()
        })
    }

    /// Remove the top frame. Returns the number of events it still held.
    pub fn pop_frame() -> Result<usize, NotifyError> {
        let popped = FRAMES.with(|f| f.borrow_mut().pop());
        match popped {
            Some(frame) => {
                debug!(frames = Self::depth(), dropped = frame.len(), "event frame closed");
                Ok(frame.len())
            }
            None => {
                error!("event frame stack underflow");
                Err(NotifyError::FrameStackUnderflow)
            }
        }
    }

    /// Drop every frame on this thread. Returns the number of frames removed.
    pub fn discard_all() -> usize {
        FRAMES
            .try_with(|f| {
                let mut frames = f.borrow_mut();
                let n = frames.len();
                frames.clear();
                n
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use finback_core::{RequestContext, TenantId};
    use serde_json::json;

    use super::*;
    use crate::event::{DomainEvent, EventType};

    fn event(n: u64) -> BusinessEvent {
        DomainEvent::new(EventType::LoanApproved, json!({}))
            .with_aggregate_id(n)
            .into()
    }

    #[test]
    fn enqueue_without_frame_is_an_error() {
        assert!(matches!(
            TransactionEventBuffer::enqueue(event(1)),
            Err(NotifyError::NoActiveFrame)
        ));
    }

    #[test]
    fn pop_on_empty_stack_is_underflow() {
        assert!(matches!(
            TransactionEventBuffer::pop_frame(),
            Err(NotifyError::FrameStackUnderflow)
        ));
    }

    #[test]
    fn entries_go_to_the_top_frame_only() {
        let (second, third) = (event(2), event(3));
        TransactionEventBuffer::push_frame();
        TransactionEventBuffer::enqueue(event(1)).unwrap();
        TransactionEventBuffer::push_frame();
        TransactionEventBuffer::enqueue(second.clone()).unwrap();
        TransactionEventBuffer::enqueue(third.clone()).unwrap();

        let inner: Vec<_> = TransactionEventBuffer::take_pending()
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(inner, vec![second, third]);
        assert!(TransactionEventBuffer::take_pending().is_empty());
        assert_eq!(TransactionEventBuffer::pop_frame().unwrap(), 0);

        assert_eq!(TransactionEventBuffer::pending(), 1);
        assert_eq!(TransactionEventBuffer::pop_frame().unwrap(), 1);
        assert_eq!(TransactionEventBuffer::depth(), 0);
    }

    #[test]
    fn entries_capture_the_context_at_buffering_time() {
        let tenant = TenantId::parse("tenant-a").unwrap();
        let _ctx = RequestContext::new(tenant.clone()).install();
        TransactionEventBuffer::push_frame();
        TransactionEventBuffer::enqueue(event(1)).unwrap();

        let entries = TransactionEventBuffer::take_pending();
        assert_eq!(entries[0].context.tenant_id(), Some(&tenant));
        assert_eq!(TransactionEventBuffer::discard_all(), 1);
    }
}
