//! The entry point business operations raise events through.
//!
//! `raise_pre` only dispatches to in-process listeners. `raise_post`
//! dispatches and then routes the event towards the external sink:
//!
//! 1. events that are-a `NoExternal` stop here;
//! 2. the global switch and the per-type gate must both allow it
//!    (an unconfigured type is an error);
//! 3. if bulk recording is on, the event goes to the recording buffer;
//! 4. else if a transaction is open, it goes to the top event frame;
//! 5. else it is delivered to the sink immediately.
//!
//! The notifier is also the [`TransactionSynchronization`] that flushes and
//! drops event frames as transactions commit and roll back.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dispatcher::EventDispatcher;
use crate::error::NotifyError;
use crate::event::{BusinessEvent, DomainEvent, EventType};
use crate::gate::EventTypeGate;
use crate::listener::Phase;
use crate::recording::BulkRecordingSession;
use crate::sink::ExternalSink;
use crate::transaction::{TransactionEventBuffer, TransactionHost, TransactionSynchronization};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifierSettings {
    /// Process-wide switch for external delivery.
    pub external_events_enabled: bool,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            external_events_enabled: true,
        }
    }
}

pub struct BusinessEventNotifier {
    dispatcher: EventDispatcher,
    gate: Arc<dyn EventTypeGate>,
    sink: Arc<dyn ExternalSink>,
    host: Arc<dyn TransactionHost>,
    settings: NotifierSettings,
}

impl std::fmt::Debug for BusinessEventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusinessEventNotifier")
            .field("dispatcher", &self.dispatcher)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl BusinessEventNotifier {
    pub fn new(
        dispatcher: EventDispatcher,
        gate: Arc<dyn EventTypeGate>,
        sink: Arc<dyn ExternalSink>,
        host: Arc<dyn TransactionHost>,
        settings: NotifierSettings,
    ) -> Self {
        Self {
            dispatcher,
            gate,
            sink,
            host,
            settings,
        }
    }

    pub fn settings(&self) -> NotifierSettings {
        self.settings
    }

    /// Dispatch to "pre" listeners. Never reaches the external sink.
    pub fn raise_pre(&self, event: impl Into<BusinessEvent>) -> Result<(), NotifyError> {
        let event = Self::reject_bulk(event.into(), Phase::Pre)?;
        self.dispatcher.dispatch(Phase::Pre, &event)?;
        Ok(())
    }

    /// Dispatch to "post" listeners, then route towards the external sink.
    pub fn raise_post(&self, event: impl Into<BusinessEvent>) -> Result<(), NotifyError> {
        let event = Self::reject_bulk(event.into(), Phase::Post)?;
        self.dispatcher.dispatch(Phase::Post, &event)?;
        self.route_external(event)
    }

    pub fn start_recording(&self) {
        BulkRecordingSession::start();
    }

    /// Stop recording and deliver what was recorded: nothing, the single
    /// event, or one bulk event.
    pub fn stop_recording(&self) -> Result<(), NotifyError> {
        match BulkRecordingSession::stop() {
            Some(event) if self.settings.external_events_enabled => self.deliver_or_buffer(event),
            Some(event) => {
                debug!(event_type = %event.event_type(), "external events disabled; dropping recorded events");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Drop anything recorded on this thread without delivering it.
    pub fn reset_recording(&self) -> usize {
        let dropped = BulkRecordingSession::reset();
        if dropped > 0 {
            warn!(dropped, "recording reset discarded undelivered events");
        }
        dropped
    }

    fn reject_bulk(event: BusinessEvent, phase: Phase) -> Result<DomainEvent, NotifyError> {
        match event {
            BusinessEvent::Domain(e) if e.event_type() != EventType::Bulk => Ok(e),
            _ => {
                warn!(%phase, "attempt to raise a bulk event directly");
                Err(NotifyError::BulkEventRaised(phase))
            }
        }
    }

    fn route_external(&self, event: DomainEvent) -> Result<(), NotifyError> {
        let event_type = event.event_type();
        if !event_type.is_externally_reportable() {
            return Ok(());
        }
        if !self.settings.external_events_enabled {
            debug!(event_type = %event_type, "external events disabled globally");
            return Ok(());
        }
        if !self.gate.is_enabled(event_type)? {
            debug!(event_type = %event_type, "external delivery disabled for type");
            return Ok(());
        }

        match BulkRecordingSession::record(event) {
            Ok(()) => {
                debug!(event_type = %event_type, "event recorded for bulk delivery");
                Ok(())
            }
            Err(event) => self.deliver_or_buffer(BusinessEvent::Domain(event)),
        }
    }

    fn deliver_or_buffer(&self, event: BusinessEvent) -> Result<(), NotifyError> {
        if self.host.is_transaction_active() {
            debug!(event_type = %event.event_type(), "event buffered until commit");
            return TransactionEventBuffer::enqueue(event);
        }
        self.sink.deliver(&event)?;
        debug!(event_type = %event.event_type(), "event delivered");
        Ok(())
    }
}

impl TransactionSynchronization for BusinessEventNotifier {
    fn after_begin(&self) -> Result<(), NotifyError> {
        TransactionEventBuffer::push_frame();
        Ok(())
    }

    fn before_commit(&self) -> Result<(), NotifyError> {
        let pending = TransactionEventBuffer::take_pending();
        if pending.is_empty() {
            return Ok(());
        }

        let count = pending.len();
        for entry in pending {
            let _restored = entry.context.restore();
            if let Err(err) = self.sink.deliver(&entry.event) {
                warn!(event_type = %entry.event.event_type(), error = %err, "commit-time delivery failed");
                return Err(err.into());
            }
        }
        info!(delivered = count, "event frame flushed");
        Ok(())
    }

    fn after_commit(&self) -> Result<(), NotifyError> {
        TransactionEventBuffer::pop_frame().map(|_| ())
    }

    fn after_rollback(&self) -> Result<(), NotifyError> {
        let dropped = TransactionEventBuffer::pop_frame()?;
        if dropped > 0 {
            info!(dropped, "rollback dropped buffered events");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use finback_core::{RequestContext, TenantId};
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::event::BulkEvent;
    use crate::gate::InMemoryEventTypeGate;
    use crate::listener::ListenerRegistry;
    use crate::sink::SinkError;

    /// Sink that remembers each delivery and the tenant current at the time.
    #[derive(Default)]
    struct CapturingSink {
        delivered: Mutex<Vec<(Option<TenantId>, BusinessEvent)>>,
    }

    impl CapturingSink {
        fn events(&self) -> Vec<BusinessEvent> {
            self.delivered.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
        }

        fn tenants(&self) -> Vec<Option<TenantId>> {
            self.delivered.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    impl ExternalSink for CapturingSink {
        fn deliver(&self, event: &BusinessEvent) -> Result<(), SinkError> {
            self.delivered
                .lock()
                .unwrap()
                .push((RequestContext::current_tenant(), event.clone()));
            Ok(())
        }
    }

    struct FailingSink;

    impl ExternalSink for FailingSink {
        fn deliver(&self, _: &BusinessEvent) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("broker down".into()))
        }
    }

    /// A transaction is active exactly while a frame is open.
    struct FrameHost;

    impl TransactionHost for FrameHost {
        fn is_transaction_active(&self) -> bool {
            TransactionEventBuffer::depth() > 0
        }
    }

    fn notifier_with(
        registry: ListenerRegistry,
        sink: Arc<dyn ExternalSink>,
        enabled: &[EventType],
        settings: NotifierSettings,
    ) -> BusinessEventNotifier {
        let gate = InMemoryEventTypeGate::with_enabled(enabled.iter().copied()).unwrap();
        BusinessEventNotifier::new(
            EventDispatcher::new(Arc::new(registry)),
            Arc::new(gate),
            sink,
            Arc::new(FrameHost),
            settings,
        )
    }

    fn notifier(sink: &Arc<CapturingSink>) -> BusinessEventNotifier {
        notifier_with(
            ListenerRegistry::empty(),
            sink.clone(),
            &[EventType::LoanApproved, EventType::LoanAccrualTransactionCreated],
            NotifierSettings::default(),
        )
    }

    fn approved(n: u64) -> DomainEvent {
        DomainEvent::new(EventType::LoanApproved, json!({ "n": n })).with_aggregate_id(n)
    }

    fn accrual(n: u64) -> DomainEvent {
        DomainEvent::new(EventType::LoanAccrualTransactionCreated, json!({ "n": n }))
            .with_aggregate_id(n)
    }

    fn as_domain(events: &[DomainEvent]) -> Vec<BusinessEvent> {
        events.iter().cloned().map(BusinessEvent::Domain).collect()
    }

    #[test]
    fn bulk_events_cannot_be_raised() {
        let sink = Arc::new(CapturingSink::default());
        let n = notifier(&sink);
        let bulk = BulkEvent::new(vec![approved(1), approved(2)]);

        assert!(matches!(
            n.raise_pre(bulk.clone()),
            Err(NotifyError::BulkEventRaised(Phase::Pre))
        ));
        assert!(matches!(
            n.raise_post(bulk),
            Err(NotifyError::BulkEventRaised(Phase::Post))
        ));
        assert!(matches!(
            n.raise_post(DomainEvent::new(EventType::Bulk, json!([]))),
            Err(NotifyError::BulkEventRaised(Phase::Post))
        ));
        assert!(sink.events().is_empty());
    }

    #[test]
    fn pre_events_never_reach_the_sink() {
        let sink = Arc::new(CapturingSink::default());
        notifier(&sink).raise_pre(approved(1)).unwrap();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn immediate_delivery_outside_a_transaction() {
        let sink = Arc::new(CapturingSink::default());
        let event = approved(1);
        notifier(&sink).raise_post(event.clone()).unwrap();
        assert_eq!(sink.events(), as_domain(&[event]));
    }

    #[test]
    fn no_external_events_stay_in_process() {
        let log = Arc::new(Mutex::new(0));
        let seen = log.clone();
        let mut builder = ListenerRegistry::builder();
        builder.on_post(EventType::Loan, move |_: &DomainEvent| -> finback_core::DomainResult<()> {
            *seen.lock().unwrap() += 1;
            Ok(())
        });
        let sink = Arc::new(CapturingSink::default());
        let n = notifier_with(builder.build(), sink.clone(), &[], NotifierSettings::default());

        n.raise_post(DomainEvent::new(EventType::LoanBalanceChanged, json!({})))
            .unwrap();
        assert_eq!(*log.lock().unwrap(), 1);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn unconfigured_type_fails_the_post_phase() {
        let sink = Arc::new(CapturingSink::default());
        let err = notifier(&sink)
            .raise_post(DomainEvent::new(EventType::Loan, json!({})))
            .unwrap_err();
        assert!(matches!(err, NotifyError::Gate(_)));
    }

    #[test]
    fn global_switch_off_suppresses_delivery() {
        let sink = Arc::new(CapturingSink::default());
        let n = notifier_with(
            ListenerRegistry::empty(),
            sink.clone(),
            &[EventType::LoanApproved],
            NotifierSettings {
                external_events_enabled: false,
            },
        );
        n.raise_post(approved(1)).unwrap();
        n.start_recording();
        n.raise_post(approved(2)).unwrap();
        n.stop_recording().unwrap();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn listener_polymorphism() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (base, sub) = (log.clone(), log.clone());
        let mut builder = ListenerRegistry::builder();
        builder
            .on_post(EventType::Loan, move |e: &DomainEvent| -> finback_core::DomainResult<()> {
                base.lock().unwrap().push(("loan", e.event_type()));
                Ok(())
            })
            .on_post(
                EventType::ClientCreate,
                move |e: &DomainEvent| -> finback_core::DomainResult<()> {
                    sub.lock().unwrap().push(("client-create", e.event_type()));
                    Ok(())
                },
            );
        let sink = Arc::new(CapturingSink::default());
        let n = notifier_with(
            builder.build(),
            sink,
            &[EventType::LoanApproved, EventType::LoanClose],
            NotifierSettings::default(),
        );

        n.raise_post(approved(1)).unwrap();
        n.raise_post(DomainEvent::new(EventType::LoanClose, json!({})))
            .unwrap();
        n.raise_post(DomainEvent::new(EventType::LoanBalanceChanged, json!({})))
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("loan", EventType::LoanApproved),
                ("loan", EventType::LoanClose),
                ("loan", EventType::LoanBalanceChanged),
            ]
        );
    }

    #[test]
    fn commit_delivers_only_enabled_types() {
        let sink = Arc::new(CapturingSink::default());
        let n = notifier(&sink);
        let e1 = approved(1);
        let e2 = DomainEvent::new(EventType::LoanClose, json!({}));

        n.after_begin().unwrap();
        n.raise_post(e1.clone()).unwrap();
        n.raise_post(e2).unwrap();
        assert_eq!(TransactionEventBuffer::pending(), 1);
        assert!(sink.events().is_empty());
        n.before_commit().unwrap();
        n.after_commit().unwrap();

        assert_eq!(sink.events(), as_domain(&[e1]));
        assert_eq!(TransactionEventBuffer::depth(), 0);
    }

    #[test]
    fn flush_restores_the_buffering_context() {
        let sink = Arc::new(CapturingSink::default());
        let n = notifier(&sink);
        let a = TenantId::parse("tenant-a").unwrap();
        let b = TenantId::parse("tenant-b").unwrap();

        let _outer = RequestContext::new(b.clone()).install();
        n.after_begin().unwrap();
        {
            let _ctx = RequestContext::new(a.clone()).install();
            n.raise_post(approved(1)).unwrap();
        }
        n.raise_post(approved(2)).unwrap();
        n.before_commit().unwrap();
        n.after_commit().unwrap();

        assert_eq!(sink.tenants(), vec![Some(a), Some(b.clone())]);
        assert_eq!(RequestContext::current_tenant(), Some(b));
    }

    #[test]
    fn recording_wins_over_transaction_buffering() {
        let sink = Arc::new(CapturingSink::default());
        let n = notifier(&sink);

        let recorded = vec![accrual(1), accrual(2)];

        n.after_begin().unwrap();
        n.start_recording();
        for e in &recorded {
            n.raise_post(e.clone()).unwrap();
        }
        assert_eq!(TransactionEventBuffer::pending(), 0);
        n.stop_recording().unwrap();
        assert_eq!(TransactionEventBuffer::pending(), 1);
        n.before_commit().unwrap();
        n.after_commit().unwrap();

        assert_eq!(
            sink.events(),
            vec![BusinessEvent::Bulk(BulkEvent::new(recorded))]
        );
    }

    #[test]
    fn failed_flush_surfaces_as_sink_error() {
        let n = notifier_with(
            ListenerRegistry::empty(),
            Arc::new(FailingSink),
            &[EventType::LoanApproved],
            NotifierSettings::default(),
        );
        n.after_begin().unwrap();
        n.raise_post(approved(1)).unwrap();
        assert!(matches!(n.before_commit(), Err(NotifyError::Sink(_))));
        n.after_rollback().unwrap();
        assert_eq!(TransactionEventBuffer::depth(), 0);
    }

    #[test]
    fn unbalanced_rollback_is_underflow() {
        let sink = Arc::new(CapturingSink::default());
        let err = notifier(&sink).after_rollback().unwrap_err();
        assert!(err.is_invariant_violation());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn rollback_discards_everything(ids in prop::collection::vec(0u64..1_000, 0..16)) {
            let sink = Arc::new(CapturingSink::default());
            let n = notifier(&sink);

            n.after_begin().unwrap();
            for id in &ids {
                n.raise_post(approved(*id)).unwrap();
            }
            n.after_rollback().unwrap();

            prop_assert!(sink.events().is_empty());
            prop_assert_eq!(TransactionEventBuffer::depth(), 0);
        }

        #[test]
        fn commit_delivers_in_buffering_order(ids in prop::collection::vec(0u64..1_000, 0..16)) {
            let sink = Arc::new(CapturingSink::default());
            let n = notifier(&sink);
            let events: Vec<_> = ids.iter().copied().map(approved).collect();

            n.after_begin().unwrap();
            for e in &events {
                n.raise_post(e.clone()).unwrap();
            }
            n.before_commit().unwrap();
            n.after_commit().unwrap();

            prop_assert_eq!(sink.events(), as_domain(&events));
        }

        #[test]
        fn recording_collapses_by_count(count in 0u64..6) {
            let sink = Arc::new(CapturingSink::default());
            let n = notifier(&sink);
            let events: Vec<_> = (0..count).map(accrual).collect();

            n.start_recording();
            for e in &events {
                n.raise_post(e.clone()).unwrap();
            }
            n.stop_recording().unwrap();
            n.stop_recording().unwrap();

            let expected = match events.len() {
                0 => vec![],
                1 => as_domain(&events),
                _ => vec![BusinessEvent::Bulk(BulkEvent::new(events))],
            };
            prop_assert_eq!(sink.events(), expected);
        }

        #[test]
        fn nested_frames_are_symmetric(outcomes in prop::collection::vec(any::<bool>(), 1..8)) {
            let sink = Arc::new(CapturingSink::default());
            let n = notifier(&sink);
            let events: Vec<_> = (0..outcomes.len() as u64).map(approved).collect();

            for e in &events {
                n.after_begin().unwrap();
                n.raise_post(e.clone()).unwrap();
            }
            // innermost first
            for (level, commit) in outcomes.iter().enumerate().rev() {
                if *commit {
                    n.before_commit().unwrap();
                    n.after_commit().unwrap();
                } else {
                    n.after_rollback().unwrap();
                }
                prop_assert_eq!(TransactionEventBuffer::depth(), level);
            }

            let expected: Vec<_> = outcomes
                .iter()
                .enumerate()
                .rev()
                .filter(|(_, commit)| **commit)
                .map(|(level, _)| BusinessEvent::Domain(events[level].clone()))
                .collect();
            prop_assert_eq!(sink.events(), expected);
        }
    }
}
