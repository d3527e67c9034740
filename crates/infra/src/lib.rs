//! Infrastructure layer: transactions, command ledger, outbox, config.

pub mod command_ledger;
pub mod command_processor;
pub mod config;
pub mod outbox;
pub mod transaction;

pub use command_ledger::{
    CommandLedger, CommandRecord, CommandStatus, InMemoryCommandLedger, LedgerError, NewCommand,
    StoredResult,
};
pub use command_processor::{
    CommandOutcome, CommandProcessor, CommandResult, CommandWrapper, ProcessError, ReplayRecorder,
};
pub use config::{ConfigError, PlatformConfig};
pub use outbox::ExternalEventOutbox;
pub use transaction::{Propagation, ThreadTransactionHost, TransactionError, TransactionHandle, TransactionManager};
