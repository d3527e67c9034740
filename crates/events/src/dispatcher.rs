//! Synchronous in-process fan-out of one event to its matching listeners.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::NotifyError;
use crate::event::DomainEvent;
use crate::listener::{ListenerRegistry, Phase};

/// Invokes matching listeners one after another on the calling thread.
///
/// Fail-fast: the first listener error stops the fan-out and is returned.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    registry: Arc<ListenerRegistry>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Dispatch `event` to every listener registered for its type (or a
    /// supertype) in `phase`. Returns the number of listeners invoked.
    pub fn dispatch(&self, phase: Phase, event: &DomainEvent) -> Result<usize, NotifyError> {
        let event_type = event.event_type();
        let mut invoked = 0;

        for registration in self.registry.matching(phase, event_type) {
            let listener = registration.listener();
            if let Err(source) = listener.on_event(event) {
                warn!(
                    %phase,
                    event_type = %event_type,
                    listener = listener.name(),
                    error = %source,
                    "listener failed; aborting dispatch"
                );
                return Err(NotifyError::Listener {
                    phase,
                    event_type,
                    listener: listener.name().to_string(),
                    source,
                });
            }
            invoked += 1;
        }

        debug!(%phase, event_type = %event_type, invoked, "event dispatched");
        Ok(invoked)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use finback_core::DomainError;
    use serde_json::json;

    use super::*;
    use crate::event::EventType;

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
    ) -> impl Fn(&DomainEvent) -> finback_core::DomainResult<()> + Send + Sync + 'static {
        let log = log.clone();
        move |_| {
            log.lock().unwrap().push(tag);
            Ok(())
        }
    }

    #[test]
    fn invokes_matching_listeners_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = ListenerRegistry::builder();
        builder
            .on_post(EventType::Loan, recorder(&log, "loan"))
            .on_post(EventType::Client, recorder(&log, "client"))
            .on_post(EventType::LoanDisbursal, recorder(&log, "disbursal"));
        let dispatcher = EventDispatcher::new(Arc::new(builder.build()));

        let event = DomainEvent::new(EventType::LoanDisbursal, json!({}));
        assert_eq!(dispatcher.dispatch(Phase::Post, &event).unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["loan", "disbursal"]);
    }

    #[test]
    fn listener_failure_stops_fan_out() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = ListenerRegistry::builder();
        builder
            .on_pre(EventType::LoanTransaction, recorder(&log, "first"))
            .on_pre(
                EventType::LoanTransaction,
                |_: &DomainEvent| -> finback_core::DomainResult<()> {
                    Err(DomainError::validation("loan is frozen"))
                },
            )
            .on_pre(EventType::LoanTransaction, recorder(&log, "third"));
        let dispatcher = EventDispatcher::new(Arc::new(builder.build()));

        let event = DomainEvent::new(EventType::LoanTransactionMakeRepaymentPre, json!({}));
        let err = dispatcher.dispatch(Phase::Pre, &event).unwrap_err();

        match err {
            NotifyError::Listener { phase, source, .. } => {
                assert_eq!(phase, Phase::Pre);
                assert_eq!(source, DomainError::validation("loan is frozen"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }
}
