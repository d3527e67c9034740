//! In-process listeners wired by the portfolio module.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use finback_core::{DomainError, DomainResult, RequestContext, TenantId};
use finback_events::{BusinessEventListener, DomainEvent, EventType, ListenerRegistryBuilder};
use finback_infra::TransactionManager;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub sequence: u64,
    pub tenant_id: TenantId,
    pub loan_id: u64,
    pub event_type: EventType,
    pub recorded_at: DateTime<Utc>,
}

/// Post-listener on the `Loan` family: keeps a per-loan activity trail of
/// every loan event raised, including ones never reported externally.
///
/// Entries written inside a transaction disappear if it rolls back.
#[derive(Debug, Clone, Default)]
pub struct ActivityJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
    sequence: Arc<AtomicU64>,
}

impl ActivityJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, registry: &mut ListenerRegistryBuilder) {
        registry.on_post(EventType::Loan, self.clone());
    }

    pub fn for_loan(&self, tenant_id: &TenantId, loan_id: u64) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| &e.tenant_id == tenant_id && e.loan_id == loan_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl BusinessEventListener for ActivityJournal {
    fn on_event(&self, event: &DomainEvent) -> DomainResult<()> {
        let Some(loan_id) = event.aggregate_id() else {
            return Ok(());
        };
        let tenant_id = RequestContext::current_tenant()
            .ok_or_else(|| DomainError::invariant("loan event raised without a tenant"))?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| DomainError::invariant("activity journal lock poisoned"))?;
        entries.push(JournalEntry {
            sequence,
            tenant_id,
            loan_id,
            event_type: event.event_type(),
            recorded_at: Utc::now(),
        });
        drop(entries);

        let journal = self.entries.clone();
        TransactionManager::register_rollback(move || {
            if let Ok(mut entries) = journal.lock() {
                entries.retain(|e| e.sequence != sequence);
            }
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "activity-journal"
    }
}

#[cfg(test)]
mod tests {
    use finback_events::{EventDispatcher, ListenerRegistry, Phase};
    use serde_json::json;

    use super::*;

    #[test]
    fn records_every_loan_family_event() {
        let journal = ActivityJournal::new();
        let mut builder = ListenerRegistry::builder();
        journal.register(&mut builder);
        let dispatcher = EventDispatcher::new(Arc::new(builder.build()));
        let tenant = TenantId::parse("t").unwrap();
        let _ctx = RequestContext::new(tenant.clone()).install();

        for event_type in [
            EventType::LoanDisbursal,
            EventType::LoanTransactionMakeRepaymentPost,
            EventType::LoanBalanceChanged,
            EventType::ClientCreate,
        ] {
            let event = DomainEvent::new(event_type, json!({})).with_aggregate_id(5u64);
            dispatcher.dispatch(Phase::Post, &event).unwrap();
        }

        let types: Vec<_> = journal.for_loan(&tenant, 5).iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::LoanDisbursal,
                EventType::LoanTransactionMakeRepaymentPost,
                EventType::LoanBalanceChanged,
            ]
        );
    }
}
