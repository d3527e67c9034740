//! Tenant-scoped in-memory storage that takes part in the calling thread's
//! transaction.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use finback_core::{DomainError, DomainResult, TenantId};
use finback_infra::TransactionManager;

use crate::client::Client;
use crate::loan::Loan;

/// A row stored by [`InMemoryRepository`].
pub trait Record: Clone + Send + Sync + 'static {
    fn tenant_id(&self) -> &TenantId;
    fn key(&self) -> u64;
}

impl Record for Client {
    fn tenant_id(&self) -> &TenantId {
        Client::tenant_id(self)
    }

    fn key(&self) -> u64 {
        self.id().get()
    }
}

impl Record for Loan {
    fn tenant_id(&self) -> &TenantId {
        Loan::tenant_id(self)
    }

    fn key(&self) -> u64 {
        self.id().get()
    }
}

#[derive(Debug)]
struct Rows<T> {
    rows: BTreeMap<(TenantId, u64), T>,
    next_id: u64,
}

impl<T> Default for Rows<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 0,
        }
    }
}

/// Writes register an undo action with the open transaction, if any.
/// Allocated ids are not reused after a rollback.
#[derive(Debug)]
pub struct InMemoryRepository<T> {
    inner: Arc<RwLock<Rows<T>>>,
}

impl<T> Clone for InMemoryRepository<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Rows::default())),
        }
    }
}

fn poisoned() -> DomainError {
    DomainError::invariant("repository lock poisoned")
}

impl<T: Record> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> DomainResult<u64> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        inner.next_id += 1;
        Ok(inner.next_id)
    }

    pub fn get(&self, tenant_id: &TenantId, id: u64) -> DomainResult<Option<T>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.rows.get(&(tenant_id.clone(), id)).cloned())
    }

    pub fn list(&self, tenant_id: &TenantId) -> DomainResult<Vec<T>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .rows
            .iter()
            .filter(|((t, _), _)| t == tenant_id)
            .map(|(_, row)| row.clone())
            .collect())
    }

    pub fn count(&self, tenant_id: &TenantId) -> DomainResult<usize> {
        Ok(self.list(tenant_id)?.len())
    }

    /// Insert or replace `row`.
    pub fn save(&self, row: T) -> DomainResult<()> {
        let key = (row.tenant_id().clone(), row.key());
        let previous = self
            .inner
            .write()
            .map_err(|_| poisoned())?
            .rows
            .insert(key.clone(), row);

        let store = self.inner.clone();
        TransactionManager::register_rollback(move || {
            if let Ok(mut inner) = store.write() {
                match previous {
                    Some(previous) => inner.rows.insert(key, previous),
                    None => inner.rows.remove(&key),
                };
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use finback_core::ClientId;
    use finback_infra::{Propagation, TransactionError};

    use super::*;

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    fn client(repo: &InMemoryRepository<Client>, tenant_id: &str, name: &str) -> Client {
        let id = ClientId::new(repo.next_id().unwrap());
        Client::submit(id, tenant(tenant_id), name, None).unwrap()
    }

    #[test]
    fn rows_are_tenant_scoped() {
        let repo = InMemoryRepository::new();
        let a = client(&repo, "a", "Ada");
        repo.save(a.clone()).unwrap();
        repo.save(client(&repo, "b", "Bob")).unwrap();

        assert_eq!(repo.get(&tenant("a"), a.id().get()).unwrap(), Some(a.clone()));
        assert_eq!(repo.get(&tenant("b"), a.id().get()).unwrap(), None);
        assert_eq!(repo.count(&tenant("a")).unwrap(), 1);
    }

    #[test]
    fn rollback_restores_previous_rows() {
        let repo = InMemoryRepository::new();
        let original = client(&repo, "a", "Ada");
        repo.save(original.clone()).unwrap();
        let tm = TransactionManager::new();

        let out: Result<(), TransactionError> = tm.execute(Propagation::Required, || {
            let mut changed = original.clone();
            changed.activate().unwrap();
            repo.save(changed).unwrap();
            repo.save(client(&repo, "a", "Eve")).unwrap();
            Err(TransactionError::RollbackOnly)
        });
        assert!(out.is_err());

        assert_eq!(repo.list(&tenant("a")).unwrap(), vec![original]);
    }
}
