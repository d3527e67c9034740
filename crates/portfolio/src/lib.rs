//! Portfolio module: clients and loans.
//!
//! Domain rules live on [`Client`] and [`Loan`]; the write services persist
//! them in transaction-aware repositories and raise the business events.

pub mod client;
pub mod error;
pub mod listeners;
pub mod loan;
pub mod repository;
pub mod service;

pub use client::{Client, ClientStatus};
pub use error::{PortfolioError, PortfolioResult};
pub use listeners::{ActivityJournal, JournalEntry};
pub use loan::{Loan, LoanStatus, LoanTransaction, LoanTransactionKind};
pub use repository::{InMemoryRepository, Record};
pub use service::{AccrualSummary, ClientWriteService, LoanWriteService};
