//! In-process listeners and the startup-time listener registry.
//!
//! Registration happens through [`ListenerRegistryBuilder`] while the process
//! is wiring itself up. [`ListenerRegistryBuilder::build`] freezes the
//! registrations into a [`ListenerRegistry`], which is read-only and safe to
//! share between request threads behind an `Arc`.
//!
//! ## Matching
//!
//! A registration for type `T` matches every event whose type is `T` or
//! derives from `T` (see [`EventType::is_a`]). Matching registrations are
//! yielded in registration order, across all registered types, per phase.

use std::sync::Arc;

use finback_core::DomainResult;

use crate::event::{DomainEvent, EventType};

/// Dispatch phase: before the business action, or after it succeeded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    Pre,
    Post,
}

impl core::fmt::Display for Phase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Phase::Pre => f.write_str("pre"),
            Phase::Post => f.write_str("post"),
        }
    }
}

/// Synchronous in-process reaction to a business event.
///
/// Returning an error aborts the dispatch: listeners registered after this
/// one are not invoked for that event, and the error reaches the business
/// operation that raised the event.
pub trait BusinessEventListener: Send + Sync {
    fn on_event(&self, event: &DomainEvent) -> DomainResult<()>;

    /// Name used in logs and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> BusinessEventListener for F
where
    F: Fn(&DomainEvent) -> DomainResult<()> + Send + Sync,
{
    fn on_event(&self, event: &DomainEvent) -> DomainResult<()> {
        self(event)
    }

    fn name(&self) -> &str {
        "closure"
    }
}

/// One (event type, listener) pair.
#[derive(Clone)]
pub struct Registration {
    event_type: EventType,
    listener: Arc<dyn BusinessEventListener>,
}

impl Registration {
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn listener(&self) -> &dyn BusinessEventListener {
        self.listener.as_ref()
    }

    pub fn matches(&self, event_type: EventType) -> bool {
        event_type.is_a(self.event_type)
    }
}

impl core::fmt::Debug for Registration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registration")
            .field("event_type", &self.event_type)
            .field("listener", &self.listener.name())
            .finish()
    }
}

/// Mutable, startup-only collection of registrations.
#[derive(Debug, Default)]
pub struct ListenerRegistryBuilder {
    pre: Vec<Registration>,
    post: Vec<Registration>,
}

impl ListenerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `event_type` in `phase`. No de-duplication.
    pub fn register(
        &mut self,
        phase: Phase,
        event_type: EventType,
        listener: Arc<dyn BusinessEventListener>,
    ) -> &mut Self {
        let registration = Registration {
            event_type,
            listener,
        };
        match phase {
            Phase::Pre => self.pre.push(registration),
            Phase::Post => self.post.push(registration),
        }
        self
    }

    pub fn on_pre<L>(&mut self, event_type: EventType, listener: L) -> &mut Self
    where
        L: BusinessEventListener + 'static,
    {
        self.register(Phase::Pre, event_type, Arc::new(listener))
    }

    pub fn on_post<L>(&mut self, event_type: EventType, listener: L) -> &mut Self
    where
        L: BusinessEventListener + 'static,
    {
        self.register(Phase::Post, event_type, Arc::new(listener))
    }

    /// Freeze the registrations.
    pub fn build(self) -> ListenerRegistry {
        ListenerRegistry {
            pre: self.pre.into_boxed_slice(),
            post: self.post.into_boxed_slice(),
        }
    }
}

/// Frozen, read-only listener registry.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    pre: Box<[Registration]>,
    post: Box<[Registration]>,
}

impl ListenerRegistry {
    pub fn builder() -> ListenerRegistryBuilder {
        ListenerRegistryBuilder::new()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    fn phase(&self, phase: Phase) -> &[Registration] {
        match phase {
            Phase::Pre => &self.pre,
            Phase::Post => &self.post,
        }
    }

    /// Registrations that receive an event of `event_type`, in registration order.
    pub fn matching(
        &self,
        phase: Phase,
        event_type: EventType,
    ) -> impl Iterator<Item = &Registration> + '_ {
        self.phase(phase)
            .iter()
            .filter(move |r| r.matches(event_type))
    }

    pub fn len(&self, phase: Phase) -> usize {
        self.phase(phase).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &DomainEvent) -> DomainResult<()> {
        Ok(())
    }

    #[test]
    fn base_type_registration_matches_subtypes() {
        let mut builder = ListenerRegistry::builder();
        builder.on_post(EventType::Loan, noop);
        let registry = builder.build();

        assert_eq!(registry.matching(Phase::Post, EventType::LoanApproved).count(), 1);
        assert_eq!(
            registry
                .matching(Phase::Post, EventType::LoanTransactionMakeRepaymentPost)
                .count(),
            1
        );
        assert_eq!(registry.matching(Phase::Post, EventType::ClientCreate).count(), 0);
        assert_eq!(registry.matching(Phase::Pre, EventType::LoanApproved).count(), 0);
    }

    #[test]
    fn subtype_registration_does_not_match_unrelated_type() {
        let mut builder = ListenerRegistry::builder();
        builder.on_pre(EventType::LoanApproved, noop);
        let registry = builder.build();

        assert_eq!(registry.matching(Phase::Pre, EventType::Loan).count(), 0);
        assert_eq!(registry.matching(Phase::Pre, EventType::LoanRejected).count(), 0);
    }

    #[test]
    fn duplicates_are_kept_in_registration_order() {
        let mut builder = ListenerRegistry::builder();
        builder
            .on_post(EventType::LoanClose, noop)
            .on_post(EventType::Business, noop)
            .on_post(EventType::LoanClose, noop);
        let registry = builder.build();

        let order: Vec<_> = registry
            .matching(Phase::Post, EventType::LoanClose)
            .map(|r| r.event_type())
            .collect();
        assert_eq!(
            order,
            vec![EventType::LoanClose, EventType::Business, EventType::LoanClose]
        );
        assert_eq!(registry.len(Phase::Post), 3);
    }
}
