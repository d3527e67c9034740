use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::debug;

use finback_core::{CommandId, TenantId};

use super::{CommandLedger, CommandRecord, CommandStatus, LedgerError, NewCommand, StoredResult};
use crate::transaction::TransactionManager;

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<CommandId, CommandRecord>,
    by_key: HashMap<(TenantId, String), CommandId>,
    next_id: u64,
}

/// In-memory command ledger.
///
/// Writes made while a transaction is open on the calling thread are undone
/// if that transaction rolls back.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCommandLedger {
    inner: Arc<RwLock<Inner>>,
    lookups: Arc<AtomicUsize>,
}

impl InMemoryCommandLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records (all tenants).
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `find_by_key` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    fn update<F>(&self, id: CommandId, f: F) -> Result<CommandRecord, LedgerError>
    where
        F: FnOnce(&mut CommandRecord) -> Result<(), LedgerError>,
    {
        let mut inner = self.inner.write().map_err(|_| LedgerError::Poisoned)?;
        let record = inner.records.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        let before = record.clone();
        f(record)?;
        let after = record.clone();
        drop(inner);

        let store = self.inner.clone();
        TransactionManager::register_rollback(move || {
            if let Ok(mut inner) = store.write() {
                inner.records.insert(id, before);
            }
        });
        Ok(after)
    }
}

impl CommandLedger for InMemoryCommandLedger {
    fn find_by_key(
        &self,
        tenant_id: &TenantId,
        idempotency_key: &str,
    ) -> Result<Option<CommandRecord>, LedgerError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(inner
            .by_key
            .get(&(tenant_id.clone(), idempotency_key.to_string()))
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    fn create(&self, command: NewCommand) -> Result<CommandRecord, LedgerError> {
        let mut inner = self.inner.write().map_err(|_| LedgerError::Poisoned)?;
        let key = (command.tenant_id.clone(), command.idempotency_key.clone());
        if inner.by_key.contains_key(&key) {
            return Err(LedgerError::DuplicateKey {
                tenant_id: command.tenant_id,
                key: command.idempotency_key,
            });
        }

        inner.next_id += 1;
        let id = CommandId::new(inner.next_id);
        let record = CommandRecord {
            id,
            tenant_id: command.tenant_id,
            idempotency_key: command.idempotency_key,
            action: command.action,
            entity: command.entity,
            resource_id: None,
            status: CommandStatus::Processing,
            result: None,
            result_stored: false,
            created_at: Utc::now(),
            processed_at: None,
        };
        inner.records.insert(id, record.clone());
        inner.by_key.insert(key.clone(), id);
        drop(inner);

        debug!(command_id = %id, tenant_id = %record.tenant_id, "command record created");

        let store = self.inner.clone();
        TransactionManager::register_rollback(move || {
            if let Ok(mut inner) = store.write() {
                inner.records.remove(&id);
                inner.by_key.remove(&key);
            }
        });
        Ok(record)
    }

    fn mark_processed(
        &self,
        id: CommandId,
        resource_id: Option<u64>,
    ) -> Result<CommandRecord, LedgerError> {
        self.update(id, |record| {
            record.status = CommandStatus::Processed;
            record.resource_id = resource_id.or(record.resource_id);
            record.processed_at = Some(Utc::now());
            Ok(())
        })
    }

    fn mark_failed(&self, id: CommandId) -> Result<CommandRecord, LedgerError> {
        self.update(id, |record| {
            record.status = CommandStatus::Failed;
            record.processed_at = Some(Utc::now());
            Ok(())
        })
    }

    fn store_result(&self, id: CommandId, result: StoredResult) -> Result<(), LedgerError> {
        self.update(id, |record| {
            if record.result_stored {
                return Err(LedgerError::ResultAlreadyStored(id));
            }
            record.result = Some(result);
            record.result_stored = true;
            Ok(())
        })?;
        debug!(command_id = %id, "command result stored");
        Ok(())
    }

    fn get(&self, id: CommandId) -> Result<Option<CommandRecord>, LedgerError> {
        let inner = self.inner.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(inner.records.get(&id).cloned())
    }
}
