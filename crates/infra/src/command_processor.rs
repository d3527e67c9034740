//! Command execution pipeline with idempotent replay.
//!
//! ## Command Execution Flow
//!
//! ```text
//! CommandWrapper + handler
//!   ↓
//! 1. No idempotency key in the request context → run handler in a
//!    `Required` transaction; the ledger is never touched
//!   ↓
//! 2. Look up (tenant, key) in the ledger
//!      - result stored      → Replayed, store flag = false
//!      - still Processing   → CommandInProgress
//!      - failed / unstored  → re-execute, reusing the record
//!      - nothing            → create a Processing record
//!   ↓
//! 3. Publish command id + store flag = true into the request context
//!   ↓
//! 4. Run handler in a `Required` transaction, then mark the record
//!    processed or failed
//! ```
//!
//! Persisting the captured response is the request layer's job; it goes
//! through [`ReplayRecorder`] once the response is known.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use finback_core::{CommandId, DomainError, RequestContext};
use finback_events::NotifyError;

use crate::command_ledger::{CommandLedger, CommandRecord, CommandStatus, LedgerError, NewCommand, StoredResult};
use crate::transaction::{Propagation, TransactionError, TransactionManager};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("command with idempotency key '{0}' is still being processed")]
    CommandInProgress(String),

    #[error("no tenant bound to the current request")]
    MissingTenant,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// What is being done to which kind of resource (e.g. `CREATE` / `LOAN`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandWrapper {
    pub action: String,
    pub entity: String,
}

impl CommandWrapper {
    pub fn new(action: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            entity: entity.into(),
        }
    }
}

/// Result of a successfully executed command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub resource_id: Option<u64>,
    pub body: JsonValue,
}

impl CommandResult {
    pub fn new(body: JsonValue) -> Self {
        Self {
            resource_id: None,
            body,
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<u64>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The handler ran.
    Executed(CommandResult),
    /// A previous execution's stored response; the handler did not run.
    Replayed(StoredResult),
}

#[derive(Clone)]
pub struct CommandProcessor {
    ledger: Arc<dyn CommandLedger>,
    transactions: Arc<TransactionManager>,
}

impl std::fmt::Debug for CommandProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProcessor").finish_non_exhaustive()
    }
}

impl CommandProcessor {
    pub fn new(ledger: Arc<dyn CommandLedger>, transactions: Arc<TransactionManager>) -> Self {
        Self {
            ledger,
            transactions,
        }
    }

    pub fn process<E, F>(&self, wrapper: CommandWrapper, handler: F) -> Result<CommandOutcome, E>
    where
        F: FnOnce() -> Result<CommandResult, E>,
        E: From<ProcessError> + From<TransactionError>,
    {
        let Some(key) = RequestContext::idempotency_key() else {
            return self
                .transactions
                .execute(Propagation::Required, handler)
                .map(CommandOutcome::Executed);
        };

        let record = match self.open_record(&wrapper, key)? {
            Ok(record) => record,
            Err(stored) => return Ok(CommandOutcome::Replayed(stored)),
        };
        RequestContext::set_command_id(record.id);
        RequestContext::set_store_result_flag(true);

        match self.transactions.execute(Propagation::Required, handler) {
            Ok(result) => {
                self.ledger
                    .mark_processed(record.id, result.resource_id)
                    .map_err(ProcessError::from)?;
                debug!(command_id = %record.id, "command processed");
                Ok(CommandOutcome::Executed(result))
            }
            Err(err) => {
                if let Err(ledger_err) = self.ledger.mark_failed(record.id) {
                    warn!(command_id = %record.id, error = %ledger_err, "could not mark command failed");
                }
                Err(err)
            }
        }
    }

    /// The record to execute under, or the stored result to replay.
    fn open_record(
        &self,
        wrapper: &CommandWrapper,
        key: String,
    ) -> Result<Result<CommandRecord, StoredResult>, ProcessError> {
        let tenant_id = RequestContext::current_tenant().ok_or(ProcessError::MissingTenant)?;

        if let Some(existing) = self.ledger.find_by_key(&tenant_id, &key)? {
            if let Some(stored) = existing.replayable() {
                info!(command_id = %existing.id, idempotency_key = %key, "replaying stored command result");
                RequestContext::set_command_id(existing.id);
                RequestContext::set_store_result_flag(false);
                return Ok(Err(stored.clone()));
            }
            if existing.status == CommandStatus::Processing {
                return Err(ProcessError::CommandInProgress(key));
            }
            debug!(command_id = %existing.id, status = ?existing.status, "re-executing command without stored result");
            return Ok(Ok(existing));
        }

        let created = self.ledger.create(NewCommand {
            tenant_id,
            idempotency_key: key.clone(),
            action: wrapper.action.clone(),
            entity: wrapper.entity.clone(),
        });
        match created {
            Ok(record) => Ok(Ok(record)),
            Err(LedgerError::DuplicateKey { .. }) => Err(ProcessError::CommandInProgress(key)),
            Err(err) => Err(err.into()),
        }
    }
}

/// Persists a captured response against its command record.
#[derive(Clone)]
pub struct ReplayRecorder {
    ledger: Arc<dyn CommandLedger>,
    transactions: Arc<TransactionManager>,
}

impl std::fmt::Debug for ReplayRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayRecorder").finish_non_exhaustive()
    }
}

impl ReplayRecorder {
    pub fn new(ledger: Arc<dyn CommandLedger>, transactions: Arc<TransactionManager>) -> Self {
        Self {
            ledger,
            transactions,
        }
    }

    /// Store `result`, joining the enclosing transaction if there is one.
    pub fn record(&self, command_id: CommandId, result: StoredResult) -> Result<(), ProcessError> {
        self.transactions.execute(Propagation::Required, || {
            self.ledger
                .store_result(command_id, result)
                .map_err(ProcessError::from)
        })
    }
}
