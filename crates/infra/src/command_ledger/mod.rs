//! Command ledger: one record per keyed write request.
//!
//! A record is created when a keyed command starts executing, marked
//! processed or failed when it finishes, and receives the captured HTTP
//! result exactly once. Records are never deleted.
//!
//! Uniqueness per (tenant, idempotency key) is enforced by [`CommandLedger::create`];
//! a concurrent second create for the same key fails with
//! [`LedgerError::DuplicateKey`].

pub mod in_memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use finback_core::{CommandId, TenantId};

pub use in_memory::InMemoryCommandLedger;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Processing,
    Processed,
    Failed,
}

/// Captured response of a command: status code and raw body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResult {
    pub status: u16,
    pub body: String,
}

/// Everything needed to open a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommand {
    pub tenant_id: TenantId,
    pub idempotency_key: String,
    pub action: String,
    pub entity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: CommandId,
    pub tenant_id: TenantId,
    pub idempotency_key: String,
    pub action: String,
    pub entity: String,
    pub resource_id: Option<u64>,
    pub status: CommandStatus,
    pub result: Option<StoredResult>,
    pub result_stored: bool,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl CommandRecord {
    /// The stored result, if one was persisted.
    pub fn replayable(&self) -> Option<&StoredResult> {
        if self.result_stored {
            self.result.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("a command with idempotency key '{key}' already exists for tenant {tenant_id}")]
    DuplicateKey { tenant_id: TenantId, key: String },

    #[error("command {0} not found")]
    NotFound(CommandId),

    #[error("result of command {0} is already stored")]
    ResultAlreadyStored(CommandId),

    #[error("command ledger lock poisoned")]
    Poisoned,
}

pub trait CommandLedger: Send + Sync {
    fn find_by_key(
        &self,
        tenant_id: &TenantId,
        idempotency_key: &str,
    ) -> Result<Option<CommandRecord>, LedgerError>;

    /// Insert a `Processing` record; fails if (tenant, key) already exists.
    fn create(&self, command: NewCommand) -> Result<CommandRecord, LedgerError>;

    fn mark_processed(
        &self,
        id: CommandId,
        resource_id: Option<u64>,
    ) -> Result<CommandRecord, LedgerError>;

    fn mark_failed(&self, id: CommandId) -> Result<CommandRecord, LedgerError>;

    /// Attach the captured result. A second call for the same command fails.
    fn store_result(&self, id: CommandId, result: StoredResult) -> Result<(), LedgerError>;

    fn get(&self, id: CommandId) -> Result<Option<CommandRecord>, LedgerError>;
}

impl<L> CommandLedger for std::sync::Arc<L>
where
    L: CommandLedger + ?Sized,
{
    fn find_by_key(
        &self,
        tenant_id: &TenantId,
        idempotency_key: &str,
    ) -> Result<Option<CommandRecord>, LedgerError> {
        (**self).find_by_key(tenant_id, idempotency_key)
    }

    fn create(&self, command: NewCommand) -> Result<CommandRecord, LedgerError> {
        (**self).create(command)
    }

    fn mark_processed(
        &self,
        id: CommandId,
        resource_id: Option<u64>,
    ) -> Result<CommandRecord, LedgerError> {
        (**self).mark_processed(id, resource_id)
    }

    fn mark_failed(&self, id: CommandId) -> Result<CommandRecord, LedgerError> {
        (**self).mark_failed(id)
    }

    fn store_result(&self, id: CommandId, result: StoredResult) -> Result<(), LedgerError> {
        (**self).store_result(id, result)
    }

    fn get(&self, id: CommandId) -> Result<Option<CommandRecord>, LedgerError> {
        (**self).get(id)
    }
}
