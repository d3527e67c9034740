//! Outbox-backed external event sink.
//!
//! Envelopes are appended in delivery order. An append made while a
//! transaction is open is undone if that transaction rolls back, so the
//! outbox never holds an event for work that did not persist.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use finback_core::TenantId;
use finback_events::{BusinessEvent, ExternalEventEnvelope, ExternalSink, SinkError, TenantScoped};

use crate::transaction::TransactionManager;

#[derive(Debug, Clone, Default)]
pub struct ExternalEventOutbox {
    entries: Arc<RwLock<Vec<ExternalEventEnvelope>>>,
    unavailable: Arc<AtomicBool>,
}

impl ExternalEventOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent delivery fail (models an unreachable broker).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Envelopes of `tenant_id`, oldest first.
    pub fn list_for_tenant(&self, tenant_id: &TenantId) -> Vec<ExternalEventEnvelope> {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.belongs_to(tenant_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExternalSink for ExternalEventOutbox {
    fn deliver(&self, event: &BusinessEvent) -> Result<(), SinkError> {
        if self.unavailable.load(Ordering::SeqCst) {
            warn!(event_type = %event.event_type(), "outbox unavailable");
            return Err(SinkError::Unavailable("outbox is not accepting events".to_string()));
        }

        let envelope = ExternalEventEnvelope::from_event(event)?;
        let event_id = envelope.event_id();
        debug!(
            event_id = %event_id,
            tenant_id = %envelope.tenant_id(),
            event_type = %envelope.event_type(),
            "event appended to outbox"
        );
        self.entries
            .write()
            .map_err(|_| SinkError::Unavailable("outbox lock poisoned".to_string()))?
            .push(envelope);

        let entries = self.entries.clone();
        TransactionManager::register_rollback(move || {
            if let Ok(mut entries) = entries.write() {
                entries.retain(|e| e.event_id() != event_id);
            }
        });
        Ok(())
    }
}
